use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{CommentResponse, Permission};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::schema::{comments, issues, machines};
use crate::error::{AppError, AppResult};
use crate::models::{Comment, Issue, Machine, NewComment};
use crate::services::notifications::{self, IssueEvent};
use crate::AppState;

use super::issues::find_issue;
use super::{required_text, user_names, OrgContext};

pub const MAX_COMMENT_LEN: usize = 10_000;

pub fn validate_content(content: &str) -> AppResult<String> {
    required_text("content", content, MAX_COMMENT_LEN)
}

pub async fn insert_comment(
    conn: &mut AsyncPgConnection,
    organization_id: i32,
    issue_id: i32,
    author_id: i32,
    content: String,
) -> Result<Comment, diesel::result::Error> {
    diesel::insert_into(comments::table)
        .values(&NewComment {
            organization_id,
            issue_id,
            author_id,
            content,
        })
        .returning(Comment::as_returning())
        .get_result(conn)
        .await
}

/// Deleted comments keep their place in the thread with the body withheld.
fn to_response(comment: Comment, names: &HashMap<i32, String>) -> CommentResponse {
    let deleted = comment.deleted_at.is_some();
    CommentResponse {
        id: comment.id,
        issue_id: comment.issue_id,
        author_id: comment.author_id,
        author_name: names
            .get(&comment.author_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        content: (!deleted).then_some(comment.content),
        deleted,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    }
}

async fn single_response(conn: &mut AsyncPgConnection, comment: Comment) -> AppResult<CommentResponse> {
    let names = user_names(conn, vec![comment.author_id]).await?;
    Ok(to_response(comment, &names))
}

async fn find_comment(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    comment_id: i32,
) -> AppResult<(Comment, Issue, Machine)> {
    comments::table
        .inner_join(issues::table.inner_join(machines::table))
        .filter(comments::organization_id.eq(org_id))
        .filter(comments::id.eq(comment_id))
        .select((Comment::as_select(), Issue::as_select(), Machine::as_select()))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Comment {comment_id}")))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<CommentResponse>>> {
    ctx.require(Permission::IssueView)?;
    let mut conn = ctx.conn(&state).await?;
    let (issue, _, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    let thread: Vec<Comment> = comments::table
        .filter(comments::issue_id.eq(issue.id))
        .order((comments::created_at.asc(), comments::id.asc()))
        .select(Comment::as_select())
        .load(&mut conn)
        .await?;
    let names = user_names(&mut conn, thread.iter().map(|c| c.author_id).collect()).await?;

    Ok(Json(
        thread.into_iter().map(|c| to_response(c, &names)).collect(),
    ))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateComment>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    ctx.require(Permission::CommentCreate)?;
    let content = validate_content(&payload.content)?;

    let mut conn = ctx.conn(&state).await?;
    let (issue, machine, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    let comment = insert_comment(&mut conn, ctx.org_id(), issue.id, ctx.user_id(), content).await?;
    tracing::info!(issue_id = issue.id, comment_id = comment.id, "comment added");

    notifications::dispatch(
        &state,
        &mut conn,
        IssueEvent::CommentAdded,
        &issue,
        &machine,
        Some(ctx.user_id()),
    )
    .await;

    Ok((StatusCode::CREATED, Json(single_response(&mut conn, comment).await?)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(comment_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateComment>,
) -> AppResult<Json<CommentResponse>> {
    let content = validate_content(&payload.content)?;
    let mut conn = ctx.conn(&state).await?;
    let (comment, _, _) = find_comment(&mut conn, ctx.org_id(), comment_id).await?;

    if !ctx.permissions.can_edit_comment(ctx.user_id(), &comment.access()) {
        return Err(AppError::Forbidden("Only the author may edit this comment".into()));
    }

    let updated: Comment = diesel::update(comments::table.find(comment_id))
        .set((
            comments::content.eq(content),
            comments::updated_at.eq(Utc::now()),
        ))
        .returning(Comment::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(Json(single_response(&mut conn, updated).await?))
}

/// Soft delete: the row stays so the thread and activity feed remain intact.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(comment_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    let mut conn = ctx.conn(&state).await?;
    let (comment, _, _) = find_comment(&mut conn, ctx.org_id(), comment_id).await?;

    if comment.deleted_at.is_some() {
        return Err(AppError::not_found(format!("Comment {comment_id}")));
    }
    if !ctx.permissions.can_delete_comment(ctx.user_id(), &comment.access()) {
        return Err(AppError::Forbidden("You may not delete this comment".into()));
    }

    diesel::update(comments::table.find(comment_id))
        .set((
            comments::deleted_at.eq(Some(Utc::now())),
            comments::deleted_by_id.eq(Some(ctx.user_id())),
        ))
        .execute(&mut conn)
        .await?;
    tracing::info!(comment_id, deleted_by = ctx.user_id(), "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(deleted: bool) -> Comment {
        let now = Utc::now();
        Comment {
            id: 9,
            organization_id: 1,
            issue_id: 4,
            author_id: 2,
            content: "Replaced the flipper coil".into(),
            created_at: now,
            updated_at: now,
            deleted_at: deleted.then_some(now),
            deleted_by_id: deleted.then_some(3),
        }
    }

    #[test]
    fn deleted_comment_is_a_tombstone() {
        let names = HashMap::from([(2, "Roger".to_string())]);
        let resp = to_response(comment(true), &names);
        assert!(resp.deleted);
        assert_eq!(resp.content, None);
        assert_eq!(resp.author_name, "Roger");

        let resp = to_response(comment(false), &names);
        assert_eq!(resp.content.as_deref(), Some("Replaced the flipper coil"));
    }

    #[test]
    fn unknown_author_gets_placeholder_name() {
        let resp = to_response(comment(false), &HashMap::new());
        assert_eq!(resp.author_name, "Unknown");
    }

    #[test]
    fn content_length_is_bounded() {
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(MAX_COMMENT_LEN + 1)).is_err());
        assert_eq!(validate_content(" ok ").unwrap(), "ok");
    }
}
