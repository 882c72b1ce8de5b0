use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::{IssueStatus, LocationResponse, Permission, StatusGroup, SyncReport};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::schema::{issues, locations, machines};
use crate::error::{AppError, AppResult};
use crate::models::{Location, NewLocation, UpdateLocation};
use crate::services::pinballmap;
use crate::AppState;

use super::{optional_text, required_text, OrgContext};

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub remove_stale: bool,
}

fn to_response(location: &Location, machine_count: i64, open_issue_count: i64) -> LocationResponse {
    LocationResponse {
        id: location.id,
        name: location.name.clone(),
        address: location.address.clone(),
        city: location.city.clone(),
        state: location.state.clone(),
        pinballmap_id: location.pinballmap_id,
        sync_enabled: location.sync_enabled,
        last_synced_at: location.last_synced_at,
        machine_count,
        open_issue_count,
        created_at: location.created_at,
    }
}

/// `(machine count, open issue count)` per location id.
async fn location_counts(
    conn: &mut AsyncPgConnection,
    org_id: i32,
) -> AppResult<HashMap<i32, (i64, i64)>> {
    let machine_counts: Vec<(i32, i64)> = machines::table
        .filter(machines::organization_id.eq(org_id))
        .group_by(machines::location_id)
        .select((machines::location_id, count_star()))
        .load(conn)
        .await?;

    let open: Vec<&'static str> = StatusGroup::Open
        .statuses()
        .iter()
        .map(IssueStatus::as_str)
        .collect();
    let issue_counts: Vec<(i32, i64)> = issues::table
        .inner_join(machines::table)
        .filter(issues::organization_id.eq(org_id))
        .filter(issues::status.eq_any(&open))
        .group_by(machines::location_id)
        .select((machines::location_id, count_star()))
        .load(conn)
        .await?;

    let mut counts: HashMap<i32, (i64, i64)> = HashMap::new();
    for (location_id, n) in machine_counts {
        counts.entry(location_id).or_default().0 = n;
    }
    for (location_id, n) in issue_counts {
        counts.entry(location_id).or_default().1 = n;
    }
    Ok(counts)
}

pub async fn find_location(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    location_id: i32,
) -> AppResult<Location> {
    locations::table
        .filter(locations::organization_id.eq(org_id))
        .filter(locations::id.eq(location_id))
        .select(Location::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Location {location_id}")))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<LocationResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let location_list: Vec<Location> = locations::table
        .filter(locations::organization_id.eq(ctx.org_id()))
        .order(locations::name.asc())
        .select(Location::as_select())
        .load(&mut conn)
        .await?;
    let counts = location_counts(&mut conn, ctx.org_id()).await?;

    Ok(Json(
        location_list
            .iter()
            .map(|l| {
                let (machine_count, open_count) = counts.get(&l.id).copied().unwrap_or_default();
                to_response(l, machine_count, open_count)
            })
            .collect(),
    ))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<Json<LocationResponse>> {
    let mut conn = ctx.conn(&state).await?;
    let location = find_location(&mut conn, ctx.org_id(), location_id).await?;
    let counts = location_counts(&mut conn, ctx.org_id()).await?;
    let (machine_count, open_count) = counts.get(&location.id).copied().unwrap_or_default();
    Ok(Json(to_response(&location, machine_count, open_count)))
}

fn validate_pinballmap_id(id: Option<i32>) -> AppResult<Option<i32>> {
    match id {
        Some(id) if id <= 0 => Err(AppError::Validation(
            "pinballmap_id must be a positive integer".into(),
        )),
        other => Ok(other),
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateLocation>,
) -> AppResult<(StatusCode, Json<LocationResponse>)> {
    ctx.require(Permission::LocationEdit)?;

    let new_location = NewLocation {
        organization_id: ctx.org_id(),
        name: required_text("name", &payload.name, 255)?,
        address: optional_text("address", payload.address.as_deref(), 1000)?,
        city: optional_text("city", payload.city.as_deref(), 100)?,
        state: optional_text("state", payload.state.as_deref(), 100)?,
        pinballmap_id: validate_pinballmap_id(payload.pinballmap_id)?,
    };

    let mut conn = ctx.conn(&state).await?;
    let location: Location = diesel::insert_into(locations::table)
        .values(&new_location)
        .returning(Location::as_returning())
        .get_result(&mut conn)
        .await?;

    tracing::info!(organization_id = ctx.org_id(), location_id = location.id, "location created");
    Ok((StatusCode::CREATED, Json(to_response(&location, 0, 0))))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateLocation>,
) -> AppResult<Json<LocationResponse>> {
    ctx.require(Permission::LocationEdit)?;

    let changeset = UpdateLocation {
        name: payload
            .name
            .as_deref()
            .map(|n| required_text("name", n, 255))
            .transpose()?,
        address: payload
            .address
            .map(|v| optional_text("address", v.as_deref(), 1000))
            .transpose()?,
        city: payload
            .city
            .map(|v| optional_text("city", v.as_deref(), 100))
            .transpose()?,
        state: payload
            .state
            .map(|v| optional_text("state", v.as_deref(), 100))
            .transpose()?,
        pinballmap_id: payload
            .pinballmap_id
            .map(validate_pinballmap_id)
            .transpose()?,
        sync_enabled: payload.sync_enabled,
        updated_at: Some(Utc::now()),
    };

    let mut conn = ctx.conn(&state).await?;
    find_location(&mut conn, ctx.org_id(), location_id).await?;

    let location: Location = diesel::update(locations::table.find(location_id))
        .set(&changeset)
        .returning(Location::as_returning())
        .get_result(&mut conn)
        .await?;

    if location.sync_enabled && location.pinballmap_id.is_none() {
        tracing::warn!(location_id, "sync enabled but no PinballMap id set");
    }

    let counts = location_counts(&mut conn, ctx.org_id()).await?;
    let (machine_count, open_count) = counts.get(&location.id).copied().unwrap_or_default();
    Ok(Json(to_response(&location, machine_count, open_count)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::LocationDelete)?;
    let mut conn = ctx.conn(&state).await?;
    find_location(&mut conn, ctx.org_id(), location_id).await?;

    let machine_count: i64 = machines::table
        .filter(machines::location_id.eq(location_id))
        .count()
        .get_result(&mut conn)
        .await?;
    if machine_count > 0 {
        return Err(AppError::Conflict(format!(
            "Location still has {machine_count} machine(s); move or delete them first"
        )));
    }

    diesel::delete(locations::table.find(location_id))
        .execute(&mut conn)
        .await?;
    tracing::info!(organization_id = ctx.org_id(), location_id, "location deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<i32>,
    Query(query): Query<SyncQuery>,
    ctx: OrgContext,
) -> AppResult<Json<SyncReport>> {
    ctx.require(Permission::LocationEdit)?;
    let mut conn = ctx.conn(&state).await?;
    let location = find_location(&mut conn, ctx.org_id(), location_id).await?;

    let report = pinballmap::sync_location(
        &state.pinballmap,
        &mut conn,
        &location,
        query.dry_run,
        query.remove_stale,
    )
    .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinballmap_id_must_be_positive() {
        assert!(validate_pinballmap_id(Some(0)).is_err());
        assert!(validate_pinballmap_id(Some(-4)).is_err());
        assert_eq!(validate_pinballmap_id(Some(12)).unwrap(), Some(12));
        assert_eq!(validate_pinballmap_id(None).unwrap(), None);
    }
}
