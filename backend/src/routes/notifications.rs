use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::{NotificationPreferences, NotificationResponse, UnreadCountResponse};
use std::sync::Arc;

use crate::db::{self, schema::{notifications, users}};
use crate::error::{AppError, AppResult};
use crate::models::{Notification, UpdatePreferences, User};
use crate::AppState;

use super::{AuthUser, OrgContext};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

fn to_response(n: Notification) -> AppResult<NotificationResponse> {
    Ok(NotificationResponse {
        id: n.id,
        kind: n
            .kind
            .parse()
            .map_err(|e| AppError::Internal(format!("stored notification has {e}")))?,
        message: n.message,
        issue_id: n.issue_id,
        machine_id: n.machine_id,
        action_url: n.action_url,
        read: n.read_at.is_some(),
        created_at: n.created_at,
    })
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let mut notifications_query = notifications::table
        .filter(notifications::organization_id.eq(ctx.org_id()))
        .filter(notifications::user_id.eq(ctx.user_id()))
        .into_boxed();
    if query.unread_only {
        notifications_query = notifications_query.filter(notifications::read_at.is_null());
    }

    let rows: Vec<Notification> = notifications_query
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
        .select(Notification::as_select())
        .load(&mut conn)
        .await?;

    rows.into_iter()
        .map(to_response)
        .collect::<AppResult<Vec<_>>>()
        .map(Json)
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<UnreadCountResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let unread: i64 = notifications::table
        .filter(notifications::organization_id.eq(ctx.org_id()))
        .filter(notifications::user_id.eq(ctx.user_id()))
        .filter(notifications::read_at.is_null())
        .count()
        .get_result(&mut conn)
        .await?;
    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    let mut conn = ctx.conn(&state).await?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(ctx.user_id())),
    )
    .set(notifications::read_at.eq(Some(Utc::now())))
    .execute(&mut conn)
    .await?;

    if updated == 0 {
        return Err(AppError::not_found(format!("Notification {notification_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<UnreadCountResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let marked = diesel::update(
        notifications::table
            .filter(notifications::organization_id.eq(ctx.org_id()))
            .filter(notifications::user_id.eq(ctx.user_id()))
            .filter(notifications::read_at.is_null()),
    )
    .set(notifications::read_at.eq(Some(Utc::now())))
    .execute(&mut conn)
    .await?;

    tracing::debug!(user_id = ctx.user_id(), marked, "notifications marked read");
    Ok(Json(UnreadCountResponse { unread: 0 }))
}

async fn load_user(state: &AppState, user_id: i32) -> AppResult<(db::DbConn, User)> {
    let mut conn = db::system(&state.pool).await?;
    let user = users::table
        .find(user_id)
        .select(User::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;
    Ok((conn, user))
}

pub async fn preferences(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<NotificationPreferences>> {
    let (_, user) = load_user(&state, auth.user_id).await?;
    Ok(Json(user.preferences()))
}

pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<shared::UpdateNotificationPreferences>,
) -> AppResult<Json<NotificationPreferences>> {
    let changes = UpdatePreferences {
        email_notifications_enabled: payload.email_notifications_enabled,
        in_app_notifications_enabled: payload.in_app_notifications_enabled,
        email_on_new_issue: payload.email_on_new_issue,
        email_on_assigned: payload.email_on_assigned,
        email_on_status_change: payload.email_on_status_change,
        email_on_comment: payload.email_on_comment,
    };

    let (mut conn, user) = load_user(&state, auth.user_id).await?;
    if changes.is_empty() {
        return Ok(Json(user.preferences()));
    }

    let user: User = diesel::update(users::table.find(auth.user_id))
        .set(&changes)
        .returning(User::as_returning())
        .get_result(&mut conn)
        .await?;
    tracing::info!(user_id = user.id, "notification preferences updated");
    Ok(Json(user.preferences()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::NotificationKind;

    fn notification(kind: &str, read: bool) -> Notification {
        let now = Utc::now();
        Notification {
            id: 1,
            organization_id: 1,
            user_id: 2,
            kind: kind.into(),
            issue_id: Some(3),
            machine_id: Some(4),
            message: "MM-01 was assigned to you".into(),
            action_url: Some("/issues/MM-01".into()),
            read_at: read.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn response_reflects_read_state() {
        let resp = to_response(notification("issue_assigned", true)).unwrap();
        assert!(resp.read);
        assert_eq!(resp.kind, NotificationKind::IssueAssigned);
        assert!(!to_response(notification("comment_added", false)).unwrap().read);
    }

    #[test]
    fn unknown_kind_is_an_internal_error() {
        let err = to_response(notification("carrier_pigeon", false)).unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
