use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    issue_reference, parse_issue_reference, IssueFilterParams, IssueFilters,
    IssueHistoryResponse, IssueListResponse, IssuePriority, IssueResponse, IssueSeverity,
    IssueStatus, Permission, PublicMachineInfo,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::issue_query::{filtered, issue_source, sorted};
use crate::db::schema::{issue_history, issue_watchers, issues, locations, machines, organizations};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{
    Issue, IssueHistory, Location, Machine, NewIssue, NewIssueHistory, NewIssueWatcher,
    Organization, UpdateIssue,
};
use crate::services::notifications::{self, IssueEvent};
use crate::AppState;

use super::comments::{insert_comment, validate_content};
use super::machines::find_machine;
use super::{is_member, optional_text, required_text, user_names, OrgContext};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

type IssueRow = (Issue, Machine, Location);

// ============================================================================
// Helpers
// ============================================================================

fn corrupt(err: shared::ParseEnumError) -> AppError {
    AppError::Internal(format!("stored issue has {err}"))
}

pub fn issue_response(
    issue: &Issue,
    machine: &Machine,
    location: &Location,
    names: &HashMap<i32, String>,
) -> AppResult<IssueResponse> {
    Ok(IssueResponse {
        id: issue.id,
        reference: issue_reference(&machine.initials, issue.number),
        number: issue.number,
        machine_id: machine.id,
        machine_name: machine.name.clone(),
        location_id: location.id,
        location_name: location.name.clone(),
        title: issue.title.clone(),
        description: issue.description.clone(),
        status: issue.status.parse().map_err(corrupt)?,
        severity: issue.severity.parse().map_err(corrupt)?,
        priority: issue.priority.parse().map_err(corrupt)?,
        reporter_id: issue.reporter_id,
        reporter_name: issue
            .reporter_id
            .and_then(|id| names.get(&id).cloned())
            .or_else(|| issue.reporter_name.clone()),
        assignee_id: issue.assignee_id,
        assignee_name: issue.assignee_id.and_then(|id| names.get(&id).cloned()),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        resolved_at: issue.resolved_at,
    })
}

async fn responses(
    conn: &mut AsyncPgConnection,
    rows: &[IssueRow],
) -> AppResult<Vec<IssueResponse>> {
    let ids: Vec<i32> = rows
        .iter()
        .flat_map(|(i, _, _)| [i.reporter_id, i.assignee_id])
        .flatten()
        .collect();
    let names = user_names(conn, ids).await?;
    rows.iter()
        .map(|(issue, machine, location)| issue_response(issue, machine, location, &names))
        .collect()
}

async fn single_response(conn: &mut AsyncPgConnection, row: IssueRow) -> AppResult<IssueResponse> {
    responses(conn, std::slice::from_ref(&row))
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("empty issue response".into()))
}

/// Looks an issue up by numeric id or by reference (`MM-07`).
pub async fn find_issue(conn: &mut AsyncPgConnection, org_id: i32, key: &str) -> AppResult<IssueRow> {
    let mut query = issue_source()
        .filter(issues::organization_id.eq(org_id))
        .into_boxed();

    if let Ok(id) = key.parse::<i32>() {
        query = query.filter(issues::id.eq(id));
    } else if let Some((initials, number)) = parse_issue_reference(key) {
        query = query
            .filter(machines::initials.eq(initials))
            .filter(issues::number.eq(number));
    } else {
        return Err(AppError::not_found(format!("Issue {key}")));
    }

    query
        .select((Issue::as_select(), Machine::as_select(), Location::as_select()))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Issue {key}")))
}

fn history_row(
    issue: &Issue,
    actor_id: Option<i32>,
    field: &str,
    old_value: Option<String>,
    new_value: Option<String>,
) -> NewIssueHistory {
    NewIssueHistory {
        organization_id: issue.organization_id,
        issue_id: issue.id,
        actor_id,
        field: field.to_string(),
        old_value,
        new_value,
    }
}

async fn add_watchers(
    conn: &mut AsyncPgConnection,
    issue_id: i32,
    user_ids: impl IntoIterator<Item = i32>,
) -> Result<(), diesel::result::Error> {
    let rows: Vec<NewIssueWatcher> = user_ids
        .into_iter()
        .map(|user_id| NewIssueWatcher { issue_id, user_id })
        .collect();
    if rows.is_empty() {
        return Ok(());
    }
    diesel::insert_into(issue_watchers::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

/// `Some(new)` when an `old -> new` status move changes `resolved_at`.
pub fn resolved_at_transition(
    old: IssueStatus,
    new: IssueStatus,
    now: DateTime<Utc>,
) -> Option<Option<DateTime<Utc>>> {
    match (old.is_open(), new.is_open()) {
        (true, false) => Some(Some(now)),
        (false, true) => Some(None),
        _ => None,
    }
}

/// Events raised by a status change that may carry a comment.
pub fn status_change_events(old: IssueStatus, new: IssueStatus, commented: bool) -> Vec<IssueEvent> {
    let mut events = Vec::new();
    if old != new {
        events.push(IssueEvent::StatusChanged { from: old, to: new });
    }
    if commented {
        events.push(IssueEvent::CommentAdded);
    }
    events
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Fields of an edit that actually differ from the stored issue.
pub fn edit_changes(
    issue: &Issue,
    title: Option<&str>,
    description: Option<Option<&str>>,
    severity: Option<IssueSeverity>,
    priority: Option<IssuePriority>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if let Some(title) = title.filter(|t| *t != issue.title) {
        changes.push(FieldChange {
            field: "title",
            old: Some(issue.title.clone()),
            new: Some(title.to_string()),
        });
    }
    if let Some(description) = description.filter(|d| *d != issue.description.as_deref()) {
        changes.push(FieldChange {
            field: "description",
            old: issue.description.clone(),
            new: description.map(str::to_string),
        });
    }
    if let Some(severity) = severity.filter(|s| s.as_str() != issue.severity) {
        changes.push(FieldChange {
            field: "severity",
            old: Some(issue.severity.clone()),
            new: Some(severity.as_str().to_string()),
        });
    }
    if let Some(priority) = priority.filter(|p| p.as_str() != issue.priority) {
        changes.push(FieldChange {
            field: "priority",
            old: Some(issue.priority.clone()),
            new: Some(priority.as_str().to_string()),
        });
    }
    changes
}

struct IssueDraft {
    title: String,
    description: Option<String>,
    severity: IssueSeverity,
    priority: IssuePriority,
    reporter_id: Option<i32>,
    reporter_name: Option<String>,
    reporter_email: Option<String>,
    assignee_id: Option<i32>,
}

/// Allocates the machine's next issue number and inserts the issue with
/// its `created` history row and initial watchers, in one transaction.
async fn insert_issue(
    conn: &mut AsyncPgConnection,
    machine: &Machine,
    draft: IssueDraft,
) -> AppResult<Issue> {
    let machine_id = machine.id;
    let organization_id = machine.organization_id;

    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let next: i32 = diesel::update(machines::table.find(machine_id))
                .set(machines::next_issue_number.eq(machines::next_issue_number + 1))
                .returning(machines::next_issue_number)
                .get_result(conn)
                .await?;

            let issue: Issue = diesel::insert_into(issues::table)
                .values(&NewIssue {
                    organization_id,
                    machine_id,
                    number: next - 1,
                    title: draft.title,
                    description: draft.description,
                    status: IssueStatus::New.as_str().to_string(),
                    severity: draft.severity.as_str().to_string(),
                    priority: draft.priority.as_str().to_string(),
                    reporter_id: draft.reporter_id,
                    reporter_name: draft.reporter_name,
                    reporter_email: draft.reporter_email,
                    assignee_id: draft.assignee_id,
                })
                .returning(Issue::as_returning())
                .get_result(conn)
                .await?;

            diesel::insert_into(issue_history::table)
                .values(&history_row(
                    &issue,
                    draft.reporter_id,
                    "created",
                    None,
                    Some(issue.title.clone()),
                ))
                .execute(conn)
                .await?;

            add_watchers(conn, issue.id, [issue.reporter_id, issue.assignee_id].into_iter().flatten())
                .await?;

            Ok(issue)
        }
        .scope_boxed()
    })
    .await
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IssueFilterParams>,
    ctx: OrgContext,
) -> AppResult<Json<IssueListResponse>> {
    ctx.require(Permission::IssueView)?;
    let filters = IssueFilters::parse(&params)?;
    let mut conn = ctx.conn(&state).await?;

    let total: i64 = filtered(ctx.org_id(), &filters, ctx.user_id())
        .select(count_star())
        .get_result(&mut conn)
        .await?;

    let rows: Vec<IssueRow> = sorted(filtered(ctx.org_id(), &filters, ctx.user_id()), filters.sort)
        .limit(filters.page_size as i64)
        .offset(filters.offset())
        .select((Issue::as_select(), Machine::as_select(), Location::as_select()))
        .load(&mut conn)
        .await?;

    Ok(Json(IssueListResponse {
        issues: responses(&mut conn, &rows).await?,
        total,
        page: filters.page,
        page_size: filters.page_size,
    }))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<Json<IssueResponse>> {
    ctx.require(Permission::IssueView)?;
    let mut conn = ctx.conn(&state).await?;
    let row = find_issue(&mut conn, ctx.org_id(), &key).await?;
    Ok(Json(single_response(&mut conn, row).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateIssue>,
) -> AppResult<(StatusCode, Json<IssueResponse>)> {
    ctx.require(Permission::IssueCreate)?;
    let org_id = ctx.org_id();

    let title = required_text("title", &payload.title, MAX_TITLE_LEN)?;
    let description = optional_text("description", payload.description.as_deref(), MAX_DESCRIPTION_LEN)?;

    let mut conn = ctx.conn(&state).await?;
    let (machine, _, location) = find_machine(&mut conn, org_id, payload.machine_id).await?;

    if let Some(assignee_id) = payload.assignee_id {
        if !ctx.permissions.can_assign() {
            return Err(AppError::Forbidden("You may not assign issues".into()));
        }
        if !is_member(&mut conn, org_id, assignee_id).await? {
            return Err(AppError::Validation("Assignee must be a member of the organization".into()));
        }
    }

    let issue = insert_issue(
        &mut conn,
        &machine,
        IssueDraft {
            title,
            description,
            severity: payload.severity,
            priority: payload.priority.unwrap_or_default(),
            reporter_id: Some(ctx.user_id()),
            reporter_name: None,
            reporter_email: None,
            assignee_id: payload.assignee_id,
        },
    )
    .await?;

    tracing::info!(
        organization_id = org_id,
        issue_id = issue.id,
        reference = %issue_reference(&machine.initials, issue.number),
        "issue created"
    );

    notifications::dispatch(&state, &mut conn, IssueEvent::Created, &issue, &machine, Some(ctx.user_id())).await;
    if let Some(assignee_id) = issue.assignee_id {
        notifications::dispatch(
            &state,
            &mut conn,
            IssueEvent::Assigned { assignee_id },
            &issue,
            &machine,
            Some(ctx.user_id()),
        )
        .await;
    }

    let response = single_response(&mut conn, (issue, machine, location)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateIssue>,
) -> AppResult<Json<IssueResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let (issue, machine, location) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    if !ctx.permissions.can_edit_issue(ctx.user_id(), &issue.access()) {
        return Err(AppError::Forbidden("You may not edit this issue".into()));
    }

    let title = payload
        .title
        .as_deref()
        .map(|t| required_text("title", t, MAX_TITLE_LEN))
        .transpose()?;
    let description = payload
        .description
        .map(|d| optional_text("description", d.as_deref(), MAX_DESCRIPTION_LEN))
        .transpose()?;

    let changes = edit_changes(
        &issue,
        title.as_deref(),
        description.as_ref().map(|d| d.as_deref()),
        payload.severity,
        payload.priority,
    );
    if changes.is_empty() {
        return Ok(Json(single_response(&mut conn, (issue, machine, location)).await?));
    }

    let changeset = UpdateIssue {
        title,
        description,
        severity: payload.severity.map(|s| s.as_str().to_string()),
        priority: payload.priority.map(|p| p.as_str().to_string()),
        updated_at: Some(Utc::now()),
        ..UpdateIssue::default()
    };
    let history: Vec<NewIssueHistory> = changes
        .into_iter()
        .map(|c| history_row(&issue, Some(ctx.user_id()), c.field, c.old, c.new))
        .collect();
    let issue_id = issue.id;

    let updated = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let updated: Issue = diesel::update(issues::table.find(issue_id))
                    .set(&changeset)
                    .returning(Issue::as_returning())
                    .get_result(conn)
                    .await?;
                diesel::insert_into(issue_history::table)
                    .values(&history)
                    .execute(conn)
                    .await?;
                Ok(updated)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(issue_id, "issue updated");
    Ok(Json(single_response(&mut conn, (updated, machine, location)).await?))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
    Json(payload): Json<shared::ChangeStatus>,
) -> AppResult<Json<IssueResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let (issue, machine, location) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    if !ctx.permissions.can_change_status(ctx.user_id(), &issue.access()) {
        return Err(AppError::Forbidden("You may not change the status of this issue".into()));
    }

    let comment = payload
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(validate_content)
        .transpose()?;
    if comment.is_some() {
        ctx.require(Permission::CommentCreate)?;
    }

    let old_status: IssueStatus = issue.status.parse().map_err(corrupt)?;
    let new_status = payload.status;
    if old_status == new_status && comment.is_none() {
        return Ok(Json(single_response(&mut conn, (issue, machine, location)).await?));
    }

    let now = Utc::now();
    let changeset = UpdateIssue {
        status: Some(new_status.as_str().to_string()),
        resolved_at: resolved_at_transition(old_status, new_status, now),
        updated_at: Some(now),
        ..UpdateIssue::default()
    };
    let history = (old_status != new_status).then(|| {
        history_row(
            &issue,
            Some(ctx.user_id()),
            "status",
            Some(old_status.as_str().to_string()),
            Some(new_status.as_str().to_string()),
        )
    });
    let issue_id = issue.id;
    let org_id = ctx.org_id();
    let actor = ctx.user_id();
    let commented = comment.is_some();

    let updated = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let updated: Issue = diesel::update(issues::table.find(issue_id))
                    .set(&changeset)
                    .returning(Issue::as_returning())
                    .get_result(conn)
                    .await?;
                if let Some(history) = history {
                    diesel::insert_into(issue_history::table)
                        .values(&history)
                        .execute(conn)
                        .await?;
                }
                if let Some(content) = comment {
                    insert_comment(conn, org_id, issue_id, actor, content).await?;
                }
                Ok(updated)
            }
            .scope_boxed()
        })
        .await?;

    if old_status != new_status {
        tracing::info!(issue_id, from = old_status.as_str(), to = new_status.as_str(), "issue status changed");
    }
    for event in status_change_events(old_status, new_status, commented) {
        notifications::dispatch(&state, &mut conn, event, &updated, &machine, Some(actor)).await;
    }

    Ok(Json(single_response(&mut conn, (updated, machine, location)).await?))
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
    Json(payload): Json<shared::AssignIssue>,
) -> AppResult<Json<IssueResponse>> {
    if !ctx.permissions.can_assign() {
        return Err(AppError::Forbidden("You may not assign issues".into()));
    }
    let mut conn = ctx.conn(&state).await?;
    let (issue, machine, location) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    if issue.assignee_id == payload.assignee_id {
        return Ok(Json(single_response(&mut conn, (issue, machine, location)).await?));
    }
    if let Some(assignee_id) = payload.assignee_id {
        if !is_member(&mut conn, ctx.org_id(), assignee_id).await? {
            return Err(AppError::Validation("Assignee must be a member of the organization".into()));
        }
    }

    let names = user_names(&mut conn, [issue.assignee_id, payload.assignee_id].into_iter().flatten().collect()).await?;
    let name_of = |id: Option<i32>| id.map(|id| names.get(&id).cloned().unwrap_or_else(|| format!("user {id}")));
    let history = history_row(
        &issue,
        Some(ctx.user_id()),
        "assignee",
        name_of(issue.assignee_id),
        name_of(payload.assignee_id),
    );
    let changeset = UpdateIssue {
        assignee_id: Some(payload.assignee_id),
        updated_at: Some(Utc::now()),
        ..UpdateIssue::default()
    };
    let issue_id = issue.id;
    let new_assignee = payload.assignee_id;

    let updated = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let updated: Issue = diesel::update(issues::table.find(issue_id))
                    .set(&changeset)
                    .returning(Issue::as_returning())
                    .get_result(conn)
                    .await?;
                diesel::insert_into(issue_history::table)
                    .values(&history)
                    .execute(conn)
                    .await?;
                add_watchers(conn, issue_id, new_assignee).await?;
                Ok(updated)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(issue_id, assignee_id = ?new_assignee, "issue assigned");
    if let Some(assignee_id) = new_assignee {
        notifications::dispatch(
            &state,
            &mut conn,
            IssueEvent::Assigned { assignee_id },
            &updated,
            &machine,
            Some(ctx.user_id()),
        )
        .await;
    }

    Ok(Json(single_response(&mut conn, (updated, machine, location)).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::IssueDelete)?;
    let mut conn = ctx.conn(&state).await?;
    let (issue, machine, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    diesel::delete(issues::table.find(issue.id))
        .execute(&mut conn)
        .await?;
    tracing::info!(
        issue_id = issue.id,
        reference = %issue_reference(&machine.initials, issue.number),
        "issue deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn watch(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::IssueView)?;
    let mut conn = ctx.conn(&state).await?;
    let (issue, _, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;
    add_watchers(&mut conn, issue.id, [ctx.user_id()]).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unwatch(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::IssueView)?;
    let mut conn = ctx.conn(&state).await?;
    let (issue, _, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;
    diesel::delete(
        issue_watchers::table
            .filter(issue_watchers::issue_id.eq(issue.id))
            .filter(issue_watchers::user_id.eq(ctx.user_id())),
    )
    .execute(&mut conn)
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<IssueHistoryResponse>>> {
    ctx.require(Permission::IssueView)?;
    let mut conn = ctx.conn(&state).await?;
    let (issue, _, _) = find_issue(&mut conn, ctx.org_id(), &key).await?;

    let entries: Vec<IssueHistory> = issue_history::table
        .filter(issue_history::issue_id.eq(issue.id))
        .order((issue_history::changed_at.asc(), issue_history::id.asc()))
        .select(IssueHistory::as_select())
        .load(&mut conn)
        .await?;
    let names = user_names(&mut conn, entries.iter().filter_map(|h| h.actor_id).collect()).await?;

    Ok(Json(
        entries
            .into_iter()
            .map(|h| IssueHistoryResponse {
                id: h.id,
                issue_id: h.issue_id,
                actor_id: h.actor_id,
                actor_name: h.actor_id.and_then(|id| names.get(&id).cloned()),
                field: h.field,
                old_value: h.old_value,
                new_value: h.new_value,
                changed_at: h.changed_at,
            })
            .collect(),
    ))
}

// ============================================================================
// Public QR reporting
// ============================================================================

async fn machine_by_qr(
    conn: &mut AsyncPgConnection,
    code: &str,
) -> AppResult<(Machine, Location, Organization)> {
    machines::table
        .inner_join(locations::table.inner_join(organizations::table))
        .filter(machines::qr_code_id.eq(code))
        .select((
            Machine::as_select(),
            Location::as_select(),
            Organization::as_select(),
        ))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound("Unknown QR code".into()))
}

pub async fn public_machine(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> AppResult<Json<PublicMachineInfo>> {
    let mut conn = db::system(&state.pool).await?;
    let (machine, location, organization) = machine_by_qr(&mut conn, &code).await?;
    Ok(Json(PublicMachineInfo {
        machine_name: machine.name,
        location_name: location.name,
        organization_name: organization.name,
        allow_anonymous_issues: organization.allow_anonymous_issues,
    }))
}

fn validate_reporter_email(email: Option<&str>) -> AppResult<Option<String>> {
    let email = optional_text("reporter_email", email, 255)?;
    match email {
        Some(e) if !e.contains('@') => Err(AppError::Validation(
            "reporter_email must be an email address".into(),
        )),
        other => Ok(other.map(|e| e.to_lowercase())),
    }
}

pub async fn public_report(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(payload): Json<shared::CreatePublicIssue>,
) -> AppResult<(StatusCode, Json<IssueResponse>)> {
    let title = required_text("title", &payload.title, MAX_TITLE_LEN)?;
    let description = optional_text("description", payload.description.as_deref(), MAX_DESCRIPTION_LEN)?;
    let reporter_name = optional_text("reporter_name", payload.reporter_name.as_deref(), 255)?;
    let reporter_email = validate_reporter_email(payload.reporter_email.as_deref())?;

    let mut conn = db::system(&state.pool).await?;
    let (machine, location, organization) = machine_by_qr(&mut conn, &code).await?;
    if !organization.allow_anonymous_issues {
        return Err(AppError::Forbidden(
            "This organization does not accept anonymous reports".into(),
        ));
    }
    db::set_organization(&mut conn, Some(organization.id)).await?;

    let issue = insert_issue(
        &mut conn,
        &machine,
        IssueDraft {
            title,
            description,
            severity: payload.severity,
            priority: IssuePriority::default(),
            reporter_id: None,
            reporter_name,
            reporter_email,
            assignee_id: None,
        },
    )
    .await?;

    tracing::info!(
        organization_id = organization.id,
        issue_id = issue.id,
        "anonymous issue reported via QR"
    );
    notifications::dispatch(&state, &mut conn, IssueEvent::Created, &issue, &machine, None).await;

    let response = single_response(&mut conn, (issue, machine, location)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn go_redirect(Path(reference): Path<String>) -> Redirect {
    Redirect::to(&format!("/issues/{}", urlencoding::encode(&reference)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        let now = Utc::now();
        Issue {
            id: 1,
            organization_id: 1,
            machine_id: 1,
            number: 3,
            title: "Ball stuck".into(),
            description: Some("In the castle".into()),
            status: "new".into(),
            severity: "playable".into(),
            priority: "medium".into(),
            reporter_id: Some(2),
            reporter_name: None,
            reporter_email: None,
            assignee_id: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    #[test]
    fn resolved_at_follows_status_group() {
        let now = Utc::now();
        assert_eq!(
            resolved_at_transition(IssueStatus::InProgress, IssueStatus::Fixed, now),
            Some(Some(now))
        );
        assert_eq!(
            resolved_at_transition(IssueStatus::Fixed, IssueStatus::New, now),
            Some(None)
        );
        assert_eq!(resolved_at_transition(IssueStatus::New, IssueStatus::NeedsParts, now), None);
        assert_eq!(resolved_at_transition(IssueStatus::Fixed, IssueStatus::Duplicate, now), None);
    }

    #[test]
    fn status_change_with_comment_raises_both_events() {
        let events = status_change_events(IssueStatus::New, IssueStatus::Fixed, true);
        assert_eq!(
            events,
            vec![
                IssueEvent::StatusChanged {
                    from: IssueStatus::New,
                    to: IssueStatus::Fixed,
                },
                IssueEvent::CommentAdded,
            ]
        );
        assert_eq!(
            status_change_events(IssueStatus::Fixed, IssueStatus::Fixed, true),
            vec![IssueEvent::CommentAdded]
        );
        assert_eq!(
            status_change_events(IssueStatus::New, IssueStatus::InProgress, false),
            vec![IssueEvent::StatusChanged {
                from: IssueStatus::New,
                to: IssueStatus::InProgress,
            }]
        );
    }

    #[test]
    fn edit_changes_skip_unchanged_fields() {
        let i = issue();
        let changes = edit_changes(
            &i,
            Some("Ball stuck"),
            Some(None),
            Some(IssueSeverity::Unplayable),
            Some(IssuePriority::Medium),
        );
        let fields: Vec<&str> = changes.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["description", "severity"]);
        assert_eq!(changes[0].old.as_deref(), Some("In the castle"));
        assert_eq!(changes[0].new, None);
        assert_eq!(changes[1].new.as_deref(), Some("unplayable"));
    }

    #[test]
    fn response_uses_reference_and_anonymous_name() {
        let mut i = issue();
        i.reporter_id = None;
        i.reporter_name = Some("Visitor".into());
        let now = Utc::now();
        let machine = Machine {
            id: 1,
            organization_id: 1,
            location_id: 1,
            model_id: 1,
            name: "Medieval Madness".into(),
            initials: "MM".into(),
            next_issue_number: 4,
            owner_id: None,
            qr_code_id: "q".into(),
            qr_code_generated_at: now,
            owner_notifications_enabled: true,
            notify_on_new_issues: true,
            notify_on_status_changes: true,
            notify_on_comments: false,
            created_at: now,
            updated_at: now,
        };
        let location = Location {
            id: 1,
            organization_id: 1,
            name: "Arcade".into(),
            address: None,
            city: None,
            state: None,
            pinballmap_id: None,
            sync_enabled: false,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        let resp = issue_response(&i, &machine, &location, &HashMap::new()).unwrap();
        assert_eq!(resp.reference, "MM-03");
        assert_eq!(resp.reporter_name.as_deref(), Some("Visitor"));
        assert_eq!(resp.status, IssueStatus::New);
    }

    #[test]
    fn reporter_email_validation() {
        assert_eq!(validate_reporter_email(None).unwrap(), None);
        assert_eq!(
            validate_reporter_email(Some(" Fan@Example.com ")).unwrap().as_deref(),
            Some("fan@example.com")
        );
        assert!(validate_reporter_email(Some("nope")).is_err());
    }
}
