use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{CountBy, IssueSeverity, IssueStatus, OrganizationStats, Permission, StatusGroup};
use std::sync::Arc;

use crate::db::schema::{issues, locations, machines, organizations};
use crate::db;
use crate::error::AppResult;
use crate::models::{Organization, UpdateOrganization};
use crate::AppState;

use super::{optional_text, required_text, AuthUser, OrgContext};

pub fn to_response(org: &Organization) -> shared::Organization {
    shared::Organization {
        id: org.id,
        name: org.name.clone(),
        subdomain: org.subdomain.clone(),
        logo_url: org.logo_url.clone(),
        allow_anonymous_issues: org.allow_anonymous_issues,
        created_at: org.created_at,
    }
}

pub async fn get(ctx: OrgContext) -> Json<shared::Organization> {
    Json(to_response(&ctx.organization))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateOrganization>,
) -> AppResult<Json<shared::Organization>> {
    ctx.require(Permission::OrganizationManage)?;

    let changeset = UpdateOrganization {
        name: payload
            .name
            .as_deref()
            .map(|n| required_text("name", n, 255))
            .transpose()?,
        logo_url: payload
            .logo_url
            .map(|url| optional_text("logo_url", url.as_deref(), 2048))
            .transpose()?,
        allow_anonymous_issues: payload.allow_anonymous_issues,
        updated_at: Some(Utc::now()),
    };

    let mut conn = ctx.conn(&state).await?;
    let org: Organization = diesel::update(organizations::table.find(ctx.org_id()))
        .set(&changeset)
        .returning(Organization::as_returning())
        .get_result(&mut conn)
        .await?;

    tracing::info!(organization_id = org.id, "organization updated");
    Ok(Json(to_response(&org)))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<OrganizationStats>> {
    ctx.require(Permission::IssueView)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let open: Vec<&'static str> = StatusGroup::Open
        .statuses()
        .iter()
        .map(IssueStatus::as_str)
        .collect();

    let by_status: Vec<(String, i64)> = issues::table
        .filter(issues::organization_id.eq(org_id))
        .group_by(issues::status)
        .select((issues::status, count_star()))
        .load(&mut conn)
        .await?;

    let open_by_severity: Vec<(String, i64)> = issues::table
        .filter(issues::organization_id.eq(org_id))
        .filter(issues::status.eq_any(&open))
        .group_by(issues::severity)
        .select((issues::severity, count_star()))
        .load(&mut conn)
        .await?;

    let machine_count: i64 = machines::table
        .filter(machines::organization_id.eq(org_id))
        .count()
        .get_result(&mut conn)
        .await?;

    let location_count: i64 = locations::table
        .filter(locations::organization_id.eq(org_id))
        .count()
        .get_result(&mut conn)
        .await?;

    let resolved_last_7_days: i64 = issues::table
        .filter(issues::organization_id.eq(org_id))
        .filter(issues::resolved_at.ge(Utc::now() - Duration::days(7)))
        .count()
        .get_result(&mut conn)
        .await?;

    let by_status = counts::<IssueStatus>(by_status, IssueStatus::all());
    let open_by_severity = counts::<IssueSeverity>(open_by_severity, IssueSeverity::all());
    let open_issues: i64 = by_status
        .iter()
        .filter(|c| c.key.is_open())
        .map(|c| c.count)
        .sum();

    Ok(Json(OrganizationStats {
        open_issues,
        open_by_severity,
        by_status,
        machine_count,
        location_count,
        resolved_last_7_days,
    }))
}

/// One entry per known value, in declaration order, zero-filled.
fn counts<T>(rows: Vec<(String, i64)>, all: &[T]) -> Vec<CountBy<T>>
where
    T: Copy + PartialEq + std::str::FromStr,
{
    let parsed: Vec<(T, i64)> = rows
        .into_iter()
        .filter_map(|(key, n)| key.parse::<T>().ok().map(|k| (k, n)))
        .collect();
    all.iter()
        .map(|&key| CountBy {
            key,
            count: parsed
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, n)| n)
                .sum(),
        })
        .collect()
}

pub async fn mine(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<Vec<shared::MembershipSummary>>> {
    let mut conn = db::system(&state.pool).await?;
    Ok(Json(super::auth::memberships_of(&mut conn, auth.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_zero_filled_in_order() {
        let rows = vec![("unplayable".to_string(), 2), ("minor".to_string(), 5)];
        let got = counts::<IssueSeverity>(rows, IssueSeverity::all());
        let flat: Vec<(IssueSeverity, i64)> = got.into_iter().map(|c| (c.key, c.count)).collect();
        assert_eq!(
            flat,
            vec![
                (IssueSeverity::Minor, 5),
                (IssueSeverity::Playable, 0),
                (IssueSeverity::Unplayable, 2),
            ]
        );
    }

    #[test]
    fn unknown_rows_are_ignored() {
        let rows = vec![("exploded".to_string(), 1)];
        let got = counts::<IssueStatus>(rows, IssueStatus::all());
        assert!(got.iter().all(|c| c.count == 0));
    }
}
