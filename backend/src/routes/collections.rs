use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::{CollectionResponse, MachineResponse, Permission};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::db::schema::{collection_machines, collections, locations, machine_models, machines};
use crate::error::{AppError, AppResult};
use crate::models::{
    Collection, Location, Machine, MachineModel, NewCollection, NewCollectionMachine,
    UpdateCollection,
};
use crate::AppState;

use super::locations::find_location;
use super::machines::load_responses;
use super::{optional_text, required_text, OrgContext};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CollectionsQuery {
    pub location: Option<i32>,
}

/// One automatic collection per manufacturer, alphabetical.
/// Machines whose model has no manufacturer are left out.
pub fn manufacturer_collections(rows: &[(i32, Option<String>)]) -> Vec<CollectionResponse> {
    let mut groups: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for (machine_id, manufacturer) in rows {
        if let Some(name) = manufacturer.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            groups.entry(name).or_default().push(*machine_id);
        }
    }
    groups
        .into_iter()
        .map(|(name, mut machine_ids)| {
            machine_ids.sort_unstable();
            CollectionResponse::Manufacturer {
                name: name.to_string(),
                machine_ids,
            }
        })
        .collect()
}

fn manual_response(collection: &Collection, machine_ids: Vec<i32>) -> CollectionResponse {
    CollectionResponse::Manual {
        id: collection.id,
        name: collection.name.clone(),
        description: collection.description.clone(),
        location_id: collection.location_id,
        machine_ids,
    }
}

async fn find_collection(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    collection_id: i32,
) -> AppResult<Collection> {
    collections::table
        .filter(collections::organization_id.eq(org_id))
        .filter(collections::id.eq(collection_id))
        .select(Collection::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Collection {collection_id}")))
}

async fn member_ids(conn: &mut AsyncPgConnection, collection_id: i32) -> AppResult<Vec<i32>> {
    Ok(collection_machines::table
        .filter(collection_machines::collection_id.eq(collection_id))
        .order(collection_machines::machine_id.asc())
        .select(collection_machines::machine_id)
        .load(conn)
        .await?)
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectionsQuery>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<CollectionResponse>>> {
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let mut collections_query = collections::table
        .filter(collections::organization_id.eq(org_id))
        .into_boxed();
    let mut machines_query = machines::table
        .inner_join(machine_models::table)
        .filter(machines::organization_id.eq(org_id))
        .into_boxed();
    if let Some(location_id) = query.location {
        collections_query = collections_query.filter(
            collections::location_id
                .is_null()
                .or(collections::location_id.eq(location_id)),
        );
        machines_query = machines_query.filter(machines::location_id.eq(location_id));
    }

    let manual: Vec<Collection> = collections_query
        .order((collections::sort_order.asc(), collections::name.asc()))
        .select(Collection::as_select())
        .load(&mut conn)
        .await?;
    let visible: Vec<(i32, Option<String>)> = machines_query
        .select((machines::id, machine_models::manufacturer))
        .load(&mut conn)
        .await?;
    let visible_ids: BTreeSet<i32> = visible.iter().map(|(id, _)| *id).collect();

    let ids: Vec<i32> = manual.iter().map(|c| c.id).collect();
    let links: Vec<(i32, i32)> = collection_machines::table
        .filter(collection_machines::collection_id.eq_any(&ids))
        .select((collection_machines::collection_id, collection_machines::machine_id))
        .load(&mut conn)
        .await?;
    let mut by_collection: HashMap<i32, Vec<i32>> = HashMap::new();
    for (collection_id, machine_id) in links {
        if visible_ids.contains(&machine_id) {
            by_collection.entry(collection_id).or_default().push(machine_id);
        }
    }

    let mut response: Vec<CollectionResponse> = manual
        .iter()
        .map(|c| {
            let mut machine_ids = by_collection.remove(&c.id).unwrap_or_default();
            machine_ids.sort_unstable();
            manual_response(c, machine_ids)
        })
        .collect();
    response.extend(manufacturer_collections(&visible));
    Ok(Json(response))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateCollection>,
) -> AppResult<(StatusCode, Json<CollectionResponse>)> {
    ctx.require(Permission::CollectionManage)?;
    let name = required_text("name", &payload.name, MAX_NAME_LEN)?;
    let description = optional_text("description", payload.description.as_deref(), 2000)?;

    let mut conn = ctx.conn(&state).await?;
    if let Some(location_id) = payload.location_id {
        find_location(&mut conn, ctx.org_id(), location_id).await?;
    }

    let collection: Collection = diesel::insert_into(collections::table)
        .values(&NewCollection {
            organization_id: ctx.org_id(),
            location_id: payload.location_id,
            name,
            description,
        })
        .returning(Collection::as_returning())
        .get_result(&mut conn)
        .await?;

    tracing::info!(organization_id = ctx.org_id(), collection_id = collection.id, "collection created");
    Ok((StatusCode::CREATED, Json(manual_response(&collection, Vec::new()))))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateCollection>,
) -> AppResult<Json<CollectionResponse>> {
    ctx.require(Permission::CollectionManage)?;
    let changes = UpdateCollection {
        name: payload
            .name
            .as_deref()
            .map(|n| required_text("name", n, MAX_NAME_LEN))
            .transpose()?,
        description: payload
            .description
            .map(|d| optional_text("description", d.as_deref(), 2000))
            .transpose()?,
        sort_order: payload.sort_order,
    };

    let mut conn = ctx.conn(&state).await?;
    let existing = find_collection(&mut conn, ctx.org_id(), collection_id).await?;
    let collection = if changes.name.is_none()
        && changes.description.is_none()
        && changes.sort_order.is_none()
    {
        existing
    } else {
        diesel::update(collections::table.find(collection_id))
            .set(&changes)
            .returning(Collection::as_returning())
            .get_result(&mut conn)
            .await?
    };

    let machine_ids = member_ids(&mut conn, collection_id).await?;
    Ok(Json(manual_response(&collection, machine_ids)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::CollectionManage)?;
    let mut conn = ctx.conn(&state).await?;
    find_collection(&mut conn, ctx.org_id(), collection_id).await?;

    diesel::delete(collections::table.find(collection_id))
        .execute(&mut conn)
        .await?;
    tracing::info!(organization_id = ctx.org_id(), collection_id, "collection deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn machines(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<MachineResponse>>> {
    let mut conn = ctx.conn(&state).await?;
    find_collection(&mut conn, ctx.org_id(), collection_id).await?;

    let rows: Vec<(Machine, MachineModel, Location)> = collection_machines::table
        .inner_join(
            machines::table
                .inner_join(machine_models::table)
                .inner_join(locations::table),
        )
        .filter(collection_machines::collection_id.eq(collection_id))
        .order(machines::name.asc())
        .select((
            Machine::as_select(),
            MachineModel::as_select(),
            Location::as_select(),
        ))
        .load(&mut conn)
        .await?;

    Ok(Json(load_responses(&mut conn, rows, &state.config.public_url).await?))
}

/// Replaces the collection's membership with exactly `machine_ids`.
pub async fn set_machines(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::SetCollectionMachines>,
) -> AppResult<Json<CollectionResponse>> {
    ctx.require(Permission::CollectionManage)?;
    let mut conn = ctx.conn(&state).await?;
    let collection = find_collection(&mut conn, ctx.org_id(), collection_id).await?;

    let requested: BTreeSet<i32> = payload.machine_ids.iter().copied().collect();
    let ids: Vec<i32> = requested.iter().copied().collect();

    let found: Vec<(i32, i32)> = machines::table
        .filter(machines::organization_id.eq(ctx.org_id()))
        .filter(machines::id.eq_any(&ids))
        .select((machines::id, machines::location_id))
        .load(&mut conn)
        .await?;
    let found_ids: BTreeSet<i32> = found.iter().map(|(id, _)| *id).collect();
    if let Some(missing) = requested.difference(&found_ids).next() {
        return Err(AppError::Validation(format!("Machine {missing} does not exist")));
    }
    if let Some(location_id) = collection.location_id {
        if let Some((id, _)) = found.iter().find(|(_, loc)| *loc != location_id) {
            return Err(AppError::Validation(format!(
                "Machine {id} is not at this collection's location"
            )));
        }
    }

    let rows: Vec<NewCollectionMachine> = ids
        .iter()
        .map(|&machine_id| NewCollectionMachine {
            collection_id,
            machine_id,
        })
        .collect();

    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            diesel::delete(
                collection_machines::table
                    .filter(collection_machines::collection_id.eq(collection_id)),
            )
            .execute(conn)
            .await?;
            if !rows.is_empty() {
                diesel::insert_into(collection_machines::table)
                    .values(&rows)
                    .execute(conn)
                    .await?;
            }
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    tracing::info!(collection_id, machines = ids.len(), "collection membership replaced");
    Ok(Json(manual_response(&collection, ids)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manufacturers_group_and_sort() {
        let rows = vec![
            (4, Some("Williams".to_string())),
            (1, Some("Bally".to_string())),
            (2, Some("Williams".to_string())),
            (3, None),
            (5, Some("  ".to_string())),
        ];
        let groups = manufacturer_collections(&rows);
        assert_eq!(
            groups,
            vec![
                CollectionResponse::Manufacturer {
                    name: "Bally".into(),
                    machine_ids: vec![1],
                },
                CollectionResponse::Manufacturer {
                    name: "Williams".into(),
                    machine_ids: vec![2, 4],
                },
            ]
        );
    }

    #[test]
    fn no_machines_no_manufacturer_collections() {
        assert!(manufacturer_collections(&[]).is_empty());
    }
}
