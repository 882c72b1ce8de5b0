use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::permissions::ADMIN_ROLE;
use shared::{MemberResponse, Permission, RoleResponse};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::schema::{memberships, role_permissions, roles, users};
use crate::error::{AppError, AppResult};
use crate::models::{Membership, NewMembership, NewRole, NewRolePermission, Role, UpdateRole, User};
use crate::AppState;

use super::auth::get_or_create_user;
use super::{is_admin_role, parse_permissions, required_text, OrgContext};

// ============================================================================
// Members
// ============================================================================

fn member_response(membership: &Membership, user: &User, role: &Role) -> MemberResponse {
    MemberResponse {
        user: user.summary(),
        role_id: role.id,
        role_name: role.name.clone(),
        is_admin: is_admin_role(role),
        joined_at: membership.created_at,
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let rows: Vec<(Membership, User, Role)> = memberships::table
        .inner_join(users::table)
        .inner_join(roles::table)
        .filter(memberships::organization_id.eq(ctx.org_id()))
        .order(users::name.asc())
        .select((Membership::as_select(), User::as_select(), Role::as_select()))
        .load(&mut conn)
        .await?;

    Ok(Json(
        rows.iter()
            .map(|(m, u, r)| member_response(m, u, r))
            .collect(),
    ))
}

pub async fn invite(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::InviteMember>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    ctx.require(Permission::UserManage)?;

    let email = payload.email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AppError::Validation("A valid email address is required".into()));
    };
    if local.is_empty() || !domain.contains('.') {
        return Err(AppError::Validation("A valid email address is required".into()));
    }
    let name = match payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => required_text("name", n, 255)?,
        None => local.to_string(),
    };

    let mut conn = ctx.conn(&state).await?;

    let role = match payload.role_id {
        Some(role_id) => find_role(&mut conn, ctx.org_id(), role_id).await?,
        None => roles::table
            .filter(roles::organization_id.eq(ctx.org_id()))
            .filter(roles::is_default.eq(true))
            .select(Role::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::Validation("Organization has no default role".into()))?,
    };

    let user = get_or_create_user(&mut conn, &email, &name).await?;

    let membership: Membership = diesel::insert_into(memberships::table)
        .values(&NewMembership {
            user_id: user.id,
            organization_id: ctx.org_id(),
            role_id: role.id,
        })
        .returning(Membership::as_returning())
        .get_result(&mut conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::Conflict(format!("{email} is already a member")),
            other => other.into(),
        })?;

    tracing::info!(
        organization_id = ctx.org_id(),
        user_id = user.id,
        role = %role.name,
        "member added"
    );
    Ok((
        StatusCode::CREATED,
        Json(member_response(&membership, &user, &role)),
    ))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateMember>,
) -> AppResult<Json<MemberResponse>> {
    ctx.require(Permission::RoleManage)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let new_role = find_role(&mut conn, org_id, payload.role_id).await?;
    let (membership, user) = change_member_role(&mut conn, org_id, user_id, &new_role).await?;

    tracing::info!(organization_id = org_id, user_id, role = %new_role.name, "member role changed");
    Ok(Json(member_response(&membership, &user, &new_role)))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::UserManage)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    remove_member(&mut conn, org_id, user_id).await?;

    tracing::info!(organization_id = org_id, user_id, "member removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn find_member(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    user_id: i32,
) -> AppResult<(Membership, User, Role)> {
    memberships::table
        .inner_join(users::table)
        .inner_join(roles::table)
        .filter(memberships::organization_id.eq(org_id))
        .filter(memberships::user_id.eq(user_id))
        .select((Membership::as_select(), User::as_select(), Role::as_select()))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("Member {user_id}")))
}

async fn find_role(conn: &mut AsyncPgConnection, org_id: i32, role_id: i32) -> AppResult<Role> {
    roles::table
        .filter(roles::organization_id.eq(org_id))
        .filter(roles::id.eq(role_id))
        .select(Role::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::Validation(format!("Role {role_id} does not exist")))
}

/// Locks the organization's admin memberships until the transaction ends
/// and returns how many there are.
async fn lock_admins(conn: &mut AsyncPgConnection, org_id: i32) -> AppResult<usize> {
    let ids: Vec<i32> = memberships::table
        .inner_join(roles::table)
        .filter(memberships::organization_id.eq(org_id))
        .filter(roles::is_system.eq(true))
        .filter(roles::name.eq(ADMIN_ROLE))
        .order(memberships::id)
        .select(memberships::id)
        .for_update()
        .load(conn)
        .await?;
    Ok(ids.len())
}

/// Moves a member to `new_role`. The organization's last admin cannot be
/// demoted.
pub async fn change_member_role(
    conn: &mut AsyncPgConnection,
    org_id: i32,
    user_id: i32,
    new_role: &Role,
) -> AppResult<(Membership, User)> {
    let role_id = new_role.id;
    let leaves_admin = !is_admin_role(new_role);

    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let admins = lock_admins(conn, org_id).await?;
            let (membership, user, current_role) = find_member(conn, org_id, user_id).await?;
            if is_admin_role(&current_role) && leaves_admin && admins <= 1 {
                return Err(AppError::Conflict(
                    "Cannot demote the last admin of the organization".into(),
                ));
            }
            let membership: Membership = diesel::update(memberships::table.find(membership.id))
                .set(memberships::role_id.eq(role_id))
                .returning(Membership::as_returning())
                .get_result(conn)
                .await?;
            Ok((membership, user))
        }
        .scope_boxed()
    })
    .await
}

/// Removes a member. The organization's last admin cannot be removed.
pub async fn remove_member(conn: &mut AsyncPgConnection, org_id: i32, user_id: i32) -> AppResult<()> {
    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            let admins = lock_admins(conn, org_id).await?;
            let (membership, _, role) = find_member(conn, org_id, user_id).await?;
            if is_admin_role(&role) && admins <= 1 {
                return Err(AppError::Conflict(
                    "Cannot remove the last admin of the organization".into(),
                ));
            }
            diesel::delete(memberships::table.find(membership.id))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await
}

// ============================================================================
// Roles
// ============================================================================

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<RoleResponse>>> {
    let mut conn = ctx.conn(&state).await?;

    let role_list: Vec<Role> = roles::table
        .filter(roles::organization_id.eq(ctx.org_id()))
        .order((roles::is_system.desc(), roles::name.asc()))
        .select(Role::as_select())
        .load(&mut conn)
        .await?;
    let role_ids: Vec<i32> = role_list.iter().map(|r| r.id).collect();

    let perms: Vec<(i32, String)> = role_permissions::table
        .filter(role_permissions::role_id.eq_any(&role_ids))
        .select((role_permissions::role_id, role_permissions::permission))
        .load(&mut conn)
        .await?;
    let mut perms_by_role: HashMap<i32, Vec<String>> = HashMap::new();
    for (role_id, perm) in perms {
        perms_by_role.entry(role_id).or_default().push(perm);
    }

    let member_counts: HashMap<i32, i64> = memberships::table
        .filter(memberships::role_id.eq_any(&role_ids))
        .group_by(memberships::role_id)
        .select((memberships::role_id, count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    Ok(Json(
        role_list
            .iter()
            .map(|role| {
                let names = perms_by_role.get(&role.id).cloned().unwrap_or_default();
                role_response(role, &names, member_counts.get(&role.id).copied().unwrap_or(0))
            })
            .collect(),
    ))
}

fn role_response(role: &Role, permission_names: &[String], member_count: i64) -> RoleResponse {
    let mut permissions = if is_admin_role(role) {
        Permission::all().to_vec()
    } else {
        parse_permissions(permission_names)
    };
    permissions.sort();
    RoleResponse {
        id: role.id,
        name: role.name.clone(),
        is_system: role.is_system,
        is_default: role.is_default,
        permissions,
        member_count,
    }
}

fn permission_rows(role_id: i32, permissions: &[Permission]) -> Vec<NewRolePermission> {
    let mut names: Vec<&'static str> = permissions.iter().map(Permission::as_str).collect();
    names.sort_unstable();
    names.dedup();
    names
        .into_iter()
        .map(|p| NewRolePermission {
            role_id,
            permission: p.to_string(),
        })
        .collect()
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    ctx: OrgContext,
    Json(payload): Json<shared::CreateRole>,
) -> AppResult<(StatusCode, Json<RoleResponse>)> {
    ctx.require(Permission::RoleManage)?;
    let name = required_text("name", &payload.name, 100)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let permissions = payload.permissions;
    let role = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let role: Role = diesel::insert_into(roles::table)
                    .values(&NewRole {
                        organization_id: org_id,
                        name,
                        is_system: false,
                        is_default: false,
                    })
                    .returning(Role::as_returning())
                    .get_result(conn)
                    .await?;
                let rows = permission_rows(role.id, &permissions);
                if !rows.is_empty() {
                    diesel::insert_into(role_permissions::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }
                let names: Vec<String> = rows.into_iter().map(|r| r.permission).collect();
                Ok(role_response(&role, &names, 0))
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(organization_id = org_id, role = %role.name, "role created");
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<i32>,
    ctx: OrgContext,
    Json(payload): Json<shared::UpdateRole>,
) -> AppResult<Json<RoleResponse>> {
    ctx.require(Permission::RoleManage)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let role = find_role(&mut conn, org_id, role_id)
        .await
        .map_err(|_| AppError::not_found(format!("Role {role_id}")))?;
    if role.is_system {
        return Err(AppError::Conflict("System roles cannot be modified".into()));
    }
    if role.is_default && payload.is_default == Some(false) {
        return Err(AppError::Conflict(
            "Choose another default role instead of unsetting this one".into(),
        ));
    }

    let name = payload
        .name
        .as_deref()
        .map(|n| required_text("name", n, 100))
        .transpose()?;
    let make_default = payload.is_default == Some(true) && !role.is_default;
    let permissions = payload.permissions;

    conn.transaction::<_, AppError, _>(|conn| {
        async move {
            if make_default {
                diesel::update(
                    roles::table
                        .filter(roles::organization_id.eq(org_id))
                        .filter(roles::is_default.eq(true)),
                )
                .set(roles::is_default.eq(false))
                .execute(conn)
                .await?;
            }
            if name.is_some() || make_default {
                diesel::update(roles::table.find(role_id))
                    .set(&UpdateRole {
                        name,
                        is_default: make_default.then_some(true),
                    })
                    .execute(conn)
                    .await?;
            }
            if let Some(permissions) = permissions {
                diesel::delete(role_permissions::table.filter(role_permissions::role_id.eq(role_id)))
                    .execute(conn)
                    .await?;
                let rows = permission_rows(role_id, &permissions);
                if !rows.is_empty() {
                    diesel::insert_into(role_permissions::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }
            }
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    let role = find_role(&mut conn, org_id, role_id).await?;
    let names: Vec<String> = role_permissions::table
        .filter(role_permissions::role_id.eq(role_id))
        .select(role_permissions::permission)
        .load(&mut conn)
        .await?;
    let member_count: i64 = memberships::table
        .filter(memberships::role_id.eq(role_id))
        .count()
        .get_result(&mut conn)
        .await?;

    tracing::info!(organization_id = org_id, role_id, "role updated");
    Ok(Json(role_response(&role, &names, member_count)))
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<i32>,
    ctx: OrgContext,
) -> AppResult<StatusCode> {
    ctx.require(Permission::RoleManage)?;
    let org_id = ctx.org_id();
    let mut conn = ctx.conn(&state).await?;

    let role = find_role(&mut conn, org_id, role_id)
        .await
        .map_err(|_| AppError::not_found(format!("Role {role_id}")))?;
    if role.is_system {
        return Err(AppError::Conflict("System roles cannot be deleted".into()));
    }
    if role.is_default {
        return Err(AppError::Conflict("The default role cannot be deleted".into()));
    }
    let members: i64 = memberships::table
        .filter(memberships::role_id.eq(role_id))
        .count()
        .get_result(&mut conn)
        .await?;
    if members > 0 {
        return Err(AppError::Conflict(format!(
            "Role is assigned to {members} member(s)"
        )));
    }

    diesel::delete(roles::table.find(role_id))
        .execute(&mut conn)
        .await?;
    tracing::info!(organization_id = org_id, role_id, "role deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn role(name: &str, is_system: bool) -> Role {
        Role {
            id: 1,
            organization_id: 1,
            name: name.into(),
            is_system,
            is_default: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_role_reports_every_permission() {
        let resp = role_response(&role(ADMIN_ROLE, true), &[], 1);
        assert_eq!(resp.permissions.len(), Permission::all().len());
    }

    #[test]
    fn custom_admin_name_is_not_admin() {
        let resp = role_response(&role(ADMIN_ROLE, false), &["issue:view".into()], 0);
        assert_eq!(resp.permissions, vec![Permission::IssueView]);
    }

    #[test]
    fn permission_rows_dedupe() {
        let rows = permission_rows(
            3,
            &[Permission::IssueView, Permission::IssueEdit, Permission::IssueView],
        );
        let names: Vec<&str> = rows.iter().map(|r| r.permission.as_str()).collect();
        assert_eq!(names, vec!["issue:edit", "issue:view"]);
    }
}
