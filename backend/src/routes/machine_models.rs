use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::{MachineModelResponse, Permission};
use std::sync::Arc;

use crate::db::issue_query::like_pattern;
use crate::db::schema::machine_models;
use crate::error::{AppError, AppResult};
use crate::models::{MachineModel, NewMachineModel};
use crate::AppState;

use super::{optional_text, required_text, OrgContext};

const SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub q: Option<String>,
}

/// Global catalog entries plus this organization's custom models.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelQuery>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<MachineModelResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let mut models_query = machine_models::table
        .filter(
            machine_models::organization_id
                .is_null()
                .or(machine_models::organization_id.eq(ctx.org_id())),
        )
        .into_boxed();

    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = like_pattern(q);
        models_query = models_query.filter(
            machine_models::name
                .ilike(pattern.clone())
                .or(machine_models::manufacturer.ilike(pattern)),
        );
    }

    let models: Vec<MachineModel> = models_query
        .order((machine_models::name.asc(), machine_models::year.asc()))
        .limit(SEARCH_LIMIT)
        .select(MachineModel::as_select())
        .load(&mut conn)
        .await?;

    Ok(Json(models.iter().map(MachineModel::to_response).collect()))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateMachineModel>,
) -> AppResult<(StatusCode, Json<MachineModelResponse>)> {
    ctx.require(Permission::MachineEdit)?;

    if let Some(year) = payload.year {
        if !(1930..=2100).contains(&year) {
            return Err(AppError::Validation(format!("{year} is not a plausible year")));
        }
    }

    let new_model = NewMachineModel {
        organization_id: Some(ctx.org_id()),
        name: required_text("name", &payload.name, 255)?,
        manufacturer: optional_text("manufacturer", payload.manufacturer.as_deref(), 255)?,
        year: payload.year,
        opdb_id: None,
        pinballmap_id: None,
        ipdb_id: None,
        is_custom: true,
    };

    let mut conn = ctx.conn(&state).await?;
    let model: MachineModel = diesel::insert_into(machine_models::table)
        .values(&new_model)
        .returning(MachineModel::as_returning())
        .get_result(&mut conn)
        .await?;

    tracing::info!(organization_id = ctx.org_id(), model_id = model.id, "custom model created");
    Ok((StatusCode::CREATED, Json(model.to_response())))
}
