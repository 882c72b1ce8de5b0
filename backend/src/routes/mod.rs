pub mod activity;
pub mod auth;
pub mod collections;
pub mod comments;
pub mod health;
pub mod issues;
pub mod locations;
pub mod machine_models;
pub mod machines;
pub mod members;
pub mod notifications;
pub mod organizations;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::permissions::ADMIN_ROLE;
use shared::{Permission, PermissionSet};

use crate::db::schema::{memberships, organizations as orgs, role_permissions, roles, users};
use crate::db::{self, DbConn};
use crate::error::{AppError, AppResult};
use crate::models::{Organization, Role, User};
use crate::AppState;

const CLEAR_TOKEN_COOKIE: &str = "token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";

/// Header naming the organization subdomain, used by the SPA when it is
/// not served from the organization's own host.
pub const ORGANIZATION_HEADER: &str = "x-organization";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // email
    pub name: String,
    pub user_id: i32,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub email: String,
    pub name: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Dev mode bypass
        if state.config.dev_mode {
            return Ok(AuthUser {
                user_id: state.config.dev_user_id.unwrap_or(1),
                email: "dev@localhost".to_string(),
                name: "Dev User".to_string(),
            });
        }

        // Try to get token from cookie
        let cookie_header = parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let token = cookie_header
            .split(';')
            .find_map(|cookie| cookie.trim().strip_prefix("token="))
            .filter(|t| !t.is_empty())
            .or_else(|| {
                // Fallback to Authorization header
                parts
                    .headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        let Some(token) = token else {
            return Err(
                AppError::Unauthorized("Missing authentication token".into()).into_response(),
            );
        };

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| {
            (
                [(header::SET_COOKIE, CLEAR_TOKEN_COOKIE)],
                AppError::Unauthorized("Invalid or expired token".into()),
            )
                .into_response()
        })?;

        Ok(AuthUser {
            user_id: token_data.claims.user_id,
            email: token_data.claims.sub,
            name: token_data.claims.name,
        })
    }
}

/// The caller's membership in the organization a request targets.
///
/// The organization comes from the `X-Organization` header, then the Host
/// subdomain, then `DEFAULT_ORGANIZATION`, then the caller's first
/// membership. Non-members are rejected with 403.
pub struct OrgContext {
    pub user: AuthUser,
    pub organization: Organization,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl OrgContext {
    pub fn org_id(&self) -> i32 {
        self.organization.id
    }

    pub fn user_id(&self) -> i32 {
        self.user.user_id
    }

    pub fn require(&self, permission: Permission) -> AppResult<()> {
        self.permissions.require(permission)?;
        Ok(())
    }

    /// A connection limited to this organization by row-level security.
    pub async fn conn(&self, state: &AppState) -> AppResult<DbConn> {
        db::scoped(&state.pool, self.organization.id).await
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for OrgContext {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;

        let requested = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .and_then(subdomain_from_host)
            })
            .or_else(|| state.config.default_organization.clone());

        load_context(state, user, requested.as_deref())
            .await
            .map_err(IntoResponse::into_response)
    }
}

async fn load_context(
    state: &AppState,
    user: AuthUser,
    subdomain: Option<&str>,
) -> AppResult<OrgContext> {
    let mut conn = db::system(&state.pool).await?;

    let mut query = memberships::table
        .inner_join(orgs::table)
        .inner_join(roles::table)
        .filter(memberships::user_id.eq(user.user_id))
        .into_boxed();

    if let Some(subdomain) = subdomain {
        let exists: i64 = orgs::table
            .filter(orgs::subdomain.eq(subdomain))
            .count()
            .get_result(&mut conn)
            .await?;
        if exists == 0 {
            return Err(AppError::NotFound(format!(
                "Organization '{subdomain}' not found"
            )));
        }
        query = query.filter(orgs::subdomain.eq(subdomain));
    }

    let (organization, role): (Organization, Role) = query
        .order(orgs::id.asc())
        .select((Organization::as_select(), Role::as_select()))
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::Forbidden("You are not a member of this organization".into()))?;

    let permissions = role_permission_set(&mut conn, &role).await?;

    Ok(OrgContext {
        user,
        organization,
        role,
        permissions,
    })
}

pub fn is_admin_role(role: &Role) -> bool {
    role.is_system && role.name == ADMIN_ROLE
}

pub async fn role_permission_set(
    conn: &mut AsyncPgConnection,
    role: &Role,
) -> AppResult<PermissionSet> {
    if is_admin_role(role) {
        return Ok(PermissionSet::admin());
    }
    let names: Vec<String> = role_permissions::table
        .filter(role_permissions::role_id.eq(role.id))
        .select(role_permissions::permission)
        .load(conn)
        .await?;
    Ok(PermissionSet::from_permissions(parse_permissions(&names)))
}

/// Parses stored permission names, skipping ones this build doesn't know.
pub fn parse_permissions(names: &[String]) -> Vec<Permission> {
    names
        .iter()
        .filter_map(|name| match name.parse::<Permission>() {
            Ok(p) => Some(p),
            Err(_) => {
                tracing::warn!("ignoring unknown permission '{name}'");
                None
            }
        })
        .collect()
}

/// `arcade.pinpoint.app` -> `arcade`. Bare hosts, IP addresses and `www`
/// carry no organization.
pub fn subdomain_from_host(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let min_labels = if labels.last() == Some(&"localhost") { 2 } else { 3 };
    if labels.len() < min_labels {
        return None;
    }
    match labels[0] {
        "www" => None,
        sub => Some(sub.to_string()),
    }
}

/// `id -> name` for the given users, skipping ids that don't resolve.
pub async fn user_names(
    conn: &mut AsyncPgConnection,
    mut ids: Vec<i32>,
) -> AppResult<HashMap<i32, String>> {
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users_list: Vec<User> = users::table
        .filter(users::id.eq_any(&ids))
        .select(User::as_select())
        .load(conn)
        .await?;
    Ok(users_list.into_iter().map(|u| (u.id, u.name)).collect())
}

pub async fn is_member(
    conn: &mut AsyncPgConnection,
    organization_id: i32,
    user_id: i32,
) -> AppResult<bool> {
    let count: i64 = memberships::table
        .filter(memberships::organization_id.eq(organization_id))
        .filter(memberships::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .await?;
    Ok(count > 0)
}

/// Trims `value` and checks its length in characters.
pub fn required_text(field: &str, value: &str, max: usize) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{field} must be 1-{max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`] but blank input becomes `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> AppResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => required_text(field, v, max).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_parsing() {
        assert_eq!(subdomain_from_host("arcade.pinpoint.app").as_deref(), Some("arcade"));
        assert_eq!(subdomain_from_host("Arcade.pinpoint.app:443").as_deref(), Some("arcade"));
        assert_eq!(subdomain_from_host("arcade.localhost:8080").as_deref(), Some("arcade"));
        assert_eq!(subdomain_from_host("pinpoint.app"), None);
        assert_eq!(subdomain_from_host("localhost:8080"), None);
        assert_eq!(subdomain_from_host("www.pinpoint.app"), None);
        assert_eq!(subdomain_from_host("127.0.0.1:8080"), None);
    }

    #[test]
    fn unknown_permissions_are_skipped() {
        let names = vec!["issue:view".to_string(), "issue:teleport".to_string()];
        assert_eq!(parse_permissions(&names), vec![Permission::IssueView]);
    }

    #[test]
    fn text_validation() {
        assert_eq!(required_text("title", "  Flipper  ", 10).unwrap(), "Flipper");
        assert!(required_text("title", "   ", 10).is_err());
        assert!(required_text("title", "abcdefghijk", 10).is_err());
        assert_eq!(optional_text("desc", Some("  "), 10).unwrap(), None);
        assert_eq!(optional_text("desc", None, 10).unwrap(), None);
    }
}
