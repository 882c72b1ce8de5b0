use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::{IssueSeverity, IssueStatus, MachineResponse, Permission, StatusGroup};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::schema::{issues, locations, machine_models, machines};
use crate::error::{AppError, AppResult};
use crate::models::{Location, Machine, MachineModel, NewMachine, UpdateMachine};
use crate::services::qr;
use crate::AppState;

use super::locations::find_location;
use super::{is_member, required_text, user_names, OrgContext};

#[derive(Debug, Deserialize)]
pub struct MachinesQuery {
    pub location: Option<i32>,
}

#[derive(Debug, Default, Clone, Copy)]
struct OpenIssueSummary {
    count: i64,
    worst: Option<IssueSeverity>,
}

pub fn machine_response(
    machine: &Machine,
    model: &MachineModel,
    location: &Location,
    owner_name: Option<String>,
    open_issue_count: i64,
    worst_open_severity: Option<IssueSeverity>,
    public_url: &str,
) -> MachineResponse {
    MachineResponse {
        id: machine.id,
        name: machine.name.clone(),
        initials: machine.initials.clone(),
        location_id: location.id,
        location_name: location.name.clone(),
        model: model.to_response(),
        owner_id: machine.owner_id,
        owner_name,
        qr_code_id: machine.qr_code_id.clone(),
        qr_code_url: qr::code_url(public_url, &machine.qr_code_id),
        owner_notifications_enabled: machine.owner_notifications_enabled,
        notify_on_new_issues: machine.notify_on_new_issues,
        notify_on_status_changes: machine.notify_on_status_changes,
        notify_on_comments: machine.notify_on_comments,
        open_issue_count,
        worst_open_severity,
        created_at: machine.created_at,
    }
}

async fn open_issue_summaries(
    conn: &mut AsyncPgConnection,
    machine_ids: &[i32],
) -> AppResult<HashMap<i32, OpenIssueSummary>> {
    let open: Vec<&'static str> = StatusGroup::Open
        .statuses()
        .iter()
        .map(IssueStatus::as_str)
        .collect();
    let rows: Vec<(i32, String)> = issues::table
        .filter(issues::machine_id.eq_any(machine_ids))
        .filter(issues::status.eq_any(&open))
        .select((issues::machine_id, issues::severity))
        .load(conn)
        .await?;

    let mut summaries: HashMap<i32, OpenIssueSummary> = HashMap::new();
    for (machine_id, severity) in rows {
        let entry = summaries.entry(machine_id).or_default();
        entry.count += 1;
        if let Ok(severity) = severity.parse::<IssueSeverity>() {
            entry.worst = entry.worst.max(Some(severity));
        }
    }
    Ok(summaries)
}

pub async fn load_responses(
    conn: &mut AsyncPgConnection,
    rows: Vec<(Machine, MachineModel, Location)>,
    public_url: &str,
) -> AppResult<Vec<MachineResponse>> {
    let ids: Vec<i32> = rows.iter().map(|(m, _, _)| m.id).collect();
    let summaries = open_issue_summaries(conn, &ids).await?;
    let owners = user_names(conn, rows.iter().filter_map(|(m, _, _)| m.owner_id).collect()).await?;

    Ok(rows
        .iter()
        .map(|(machine, model, location)| {
            let summary = summaries.get(&machine.id).copied().unwrap_or_default();
            machine_response(
                machine,
                model,
                location,
                machine.owner_id.and_then(|id| owners.get(&id).cloned()),
                summary.count,
                summary.worst,
                public_url,
            )
        })
        .collect())
}

pub async fn find_machine(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    machine_id: i32,
) -> AppResult<(Machine, MachineModel, Location)> {
    machines::table
        .inner_join(machine_models::table)
        .inner_join(locations::table)
        .filter(machines::organization_id.eq(org_id))
        .filter(machines::id.eq(machine_id))
        .select((
            Machine::as_select(),
            MachineModel::as_select(),
            Location::as_select(),
        ))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Machine {machine_id}")))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MachinesQuery>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<MachineResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let mut machines_query = machines::table
        .inner_join(machine_models::table)
        .inner_join(locations::table)
        .filter(machines::organization_id.eq(ctx.org_id()))
        .into_boxed();
    if let Some(location_id) = query.location {
        machines_query = machines_query.filter(machines::location_id.eq(location_id));
    }

    let rows: Vec<(Machine, MachineModel, Location)> = machines_query
        .order((locations::name.asc(), machines::name.asc()))
        .select((
            Machine::as_select(),
            MachineModel::as_select(),
            Location::as_select(),
        ))
        .load(&mut conn)
        .await?;

    Ok(Json(load_responses(&mut conn, rows, &state.config.public_url).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<Json<MachineResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let row = find_machine(&mut conn, ctx.org_id(), machine_id).await?;
    let mut responses = load_responses(&mut conn, vec![row], &state.config.public_url).await?;
    responses
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Machine {machine_id}")))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateMachine>,
) -> AppResult<(StatusCode, Json<MachineResponse>)> {
    ctx.require(Permission::MachineEdit)?;
    let org_id = ctx.org_id();

    let initials = payload.initials.trim().to_ascii_uppercase();
    if !shared::is_valid_machine_initials(&initials) {
        return Err(AppError::Validation(
            "Initials must be 2-4 letters or digits".into(),
        ));
    }

    let mut conn = ctx.conn(&state).await?;

    let model: MachineModel = machine_models::table
        .filter(machine_models::id.eq(payload.model_id))
        .filter(
            machine_models::organization_id
                .is_null()
                .or(machine_models::organization_id.eq(org_id)),
        )
        .select(MachineModel::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::Validation(format!("Model {} does not exist", payload.model_id)))?;

    let location = find_location(&mut conn, org_id, payload.location_id).await?;

    if let Some(owner_id) = payload.owner_id {
        if !is_member(&mut conn, org_id, owner_id).await? {
            return Err(AppError::Validation("Owner must be a member of the organization".into()));
        }
    }

    let name = match payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => required_text("name", n, 255)?,
        None => model.name.clone(),
    };

    let machine: Machine = diesel::insert_into(machines::table)
        .values(&NewMachine {
            organization_id: org_id,
            location_id: location.id,
            model_id: model.id,
            name,
            initials: initials.clone(),
            owner_id: payload.owner_id,
            qr_code_id: qr::generate_code(),
        })
        .returning(Machine::as_returning())
        .get_result(&mut conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::Conflict(format!("Initials {initials} are already in use")),
            other => other.into(),
        })?;

    tracing::info!(organization_id = org_id, machine_id = machine.id, initials = %machine.initials, "machine created");

    let mut responses =
        load_responses(&mut conn, vec![(machine, model, location)], &state.config.public_url).await?;
    let response = responses
        .pop()
        .ok_or_else(|| AppError::Internal("machine vanished after insert".into()))?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateMachine>,
) -> AppResult<Json<MachineResponse>> {
    ctx.require(Permission::MachineEdit)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    find_machine(&mut conn, org_id, machine_id).await?;

    if let Some(location_id) = payload.location_id {
        find_location(&mut conn, org_id, location_id).await?;
    }
    if let Some(Some(owner_id)) = payload.owner_id {
        if !is_member(&mut conn, org_id, owner_id).await? {
            return Err(AppError::Validation("Owner must be a member of the organization".into()));
        }
    }

    let changeset = UpdateMachine {
        name: payload
            .name
            .as_deref()
            .map(|n| required_text("name", n, 255))
            .transpose()?,
        location_id: payload.location_id,
        owner_id: payload.owner_id,
        owner_notifications_enabled: payload.owner_notifications_enabled,
        notify_on_new_issues: payload.notify_on_new_issues,
        notify_on_status_changes: payload.notify_on_status_changes,
        notify_on_comments: payload.notify_on_comments,
        updated_at: Some(Utc::now()),
    };

    diesel::update(machines::table.find(machine_id))
        .set(&changeset)
        .execute(&mut conn)
        .await?;

    let row = find_machine(&mut conn, org_id, machine_id).await?;
    let mut responses = load_responses(&mut conn, vec![row], &state.config.public_url).await?;
    responses
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Machine {machine_id}")))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::MachineDelete)?;
    let mut conn = ctx.conn(&state).await?;
    let (machine, _, _) = find_machine(&mut conn, ctx.org_id(), machine_id).await?;

    diesel::delete(machines::table.find(machine.id))
        .execute(&mut conn)
        .await?;
    tracing::info!(organization_id = ctx.org_id(), machine_id, initials = %machine.initials, "machine deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Issues a fresh QR code id; previously printed stickers stop working.
pub async fn regenerate_qr(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<Json<MachineResponse>> {
    ctx.require(Permission::MachineEdit)?;
    let mut conn = ctx.conn(&state).await?;
    find_machine(&mut conn, ctx.org_id(), machine_id).await?;

    let now = Utc::now();
    diesel::update(machines::table.find(machine_id))
        .set((
            machines::qr_code_id.eq(qr::generate_code()),
            machines::qr_code_generated_at.eq(now),
            machines::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;

    let row = find_machine(&mut conn, ctx.org_id(), machine_id).await?;
    let mut responses = load_responses(&mut conn, vec![row], &state.config.public_url).await?;
    responses
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Machine {machine_id}")))
}

pub async fn qr_redirect(Path(code): Path<String>) -> Redirect {
    Redirect::to(&format!("/report/{}", urlencoding::encode(&code)))
}
