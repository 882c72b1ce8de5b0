use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::schema::{memberships, organizations, roles, users};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::AppState;

use super::{AuthUser, Claims, CLEAR_TOKEN_COOKIE};

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    #[allow(dead_code)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
    name: String,
}

pub async fn login(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    if state.config.dev_mode {
        // In dev mode, just redirect to callback with a fake code
        return Ok(Redirect::to("/auth/callback?code=dev").into_response());
    }

    let client_id = state
        .config
        .google_client_id
        .as_ref()
        .ok_or_else(|| AppError::Internal("OAuth not configured".into()))?;

    let redirect_uri = format!("{}/auth/callback", state.config.public_url);
    let auth_url = format!(
        "https://accounts.google.com/o/oauth2/v2/auth?\
        client_id={}&\
        redirect_uri={}&\
        response_type=code&\
        scope=email%20profile&\
        access_type=offline",
        client_id,
        urlencoding::encode(&redirect_uri)
    );

    Ok(Redirect::to(&auth_url).into_response())
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let mut conn = db::system(&state.pool).await?;

    if state.config.dev_mode {
        let dev_user = get_or_create_user(&mut conn, "dev@localhost", "Dev User").await?;
        let token = create_jwt(&state.config.jwt_secret, &dev_user)?;
        return Ok(set_token_cookie_and_redirect(token));
    }

    let (client_id, client_secret) = match (
        &state.config.google_client_id,
        &state.config.google_client_secret,
    ) {
        (Some(id), Some(secret)) => (id, secret),
        _ => return Err(AppError::Internal("OAuth not configured".into())),
    };

    let redirect_uri = format!("{}/auth/callback", state.config.public_url);

    // Exchange code for token
    let token_response: GoogleTokenResponse = state
        .http
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("code", query.code.as_str()),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", &redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to exchange code for token: {e}")))?
        .json()
        .await
        .map_err(|_| AppError::Validation("Failed to parse token response".into()))?;

    // Get user info
    let user_info: GoogleUserInfo = state
        .http
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(&token_response.access_token)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to get user info: {e}")))?
        .json()
        .await
        .map_err(|_| AppError::Validation("Failed to parse user info".into()))?;

    if !email_domain_allowed(&state.config.allowed_email_domains, &user_info.email) {
        return Err(AppError::Forbidden("Email domain not allowed".into()));
    }

    tracing::info!("Looking up user by email: {}", user_info.email);
    let user = get_or_create_user(&mut conn, &user_info.email, &user_info.name).await?;

    let token = create_jwt(&state.config.jwt_secret, &user)?;
    Ok(set_token_cookie_and_redirect(token))
}

pub async fn logout() -> Response {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, CLEAR_TOKEN_COOKIE)],
        Json(shared::LogoutResponse {
            status: "logged out".to_string(),
        }),
    )
        .into_response()
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<shared::CurrentUserResponse>> {
    let mut conn = db::system(&state.pool).await?;
    let memberships = memberships_of(&mut conn, auth_user.user_id).await?;

    Ok(Json(shared::CurrentUserResponse {
        user_id: auth_user.user_id,
        email: auth_user.email,
        name: auth_user.name,
        memberships,
    }))
}

pub async fn memberships_of(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> AppResult<Vec<shared::MembershipSummary>> {
    let rows: Vec<(i32, String, String, i32, String)> = memberships::table
        .inner_join(organizations::table)
        .inner_join(roles::table)
        .filter(memberships::user_id.eq(user_id))
        .order(organizations::name.asc())
        .select((
            organizations::id,
            organizations::name,
            organizations::subdomain,
            roles::id,
            roles::name,
        ))
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(
            |(organization_id, organization_name, subdomain, role_id, role_name)| {
                shared::MembershipSummary {
                    organization_id,
                    organization_name,
                    subdomain,
                    role_id,
                    role_name,
                }
            },
        )
        .collect())
}

pub async fn get_or_create_user(
    conn: &mut AsyncPgConnection,
    email: &str,
    name: &str,
) -> AppResult<User> {
    let email = email.trim().to_lowercase();
    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;

    if let Some(user) = existing {
        tracing::info!("Found existing user: id={}", user.id);
        return Ok(user);
    }

    tracing::info!("User not found, creating new user for {}", email);
    let new_user = NewUser {
        email,
        name: name.trim().to_string(),
        initials: Some(name_initials(name)),
    };
    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .await?;
    tracing::info!("Created new user: id={}", user.id);
    Ok(user)
}

pub fn name_initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .take(2)
        .collect::<String>()
        .to_uppercase()
}

pub fn email_domain_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let domain = email.rsplit('@').next().unwrap_or("").to_lowercase();
    allowed.iter().any(|d| *d == domain)
}

fn create_jwt(secret: &str, user: &User) -> AppResult<String> {
    let now = Utc::now();
    let exp = now + Duration::hours(TOKEN_LIFETIME_HOURS);

    let claims = Claims {
        sub: user.email.clone(),
        name: user.name.clone(),
        user_id: user.id,
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to create JWT: {e}")))
}

fn set_token_cookie_and_redirect(token: String) -> Response {
    let cookie = format!(
        "token={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token,
        TOKEN_LIFETIME_HOURS * 3600
    );
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initials_from_name() {
        assert_eq!(name_initials("Roger Sharpe"), "RS");
        assert_eq!(name_initials("cher"), "C");
        assert_eq!(name_initials("Mary Jane Watson"), "MJ");
    }

    #[test]
    fn domain_allow_list() {
        assert!(email_domain_allowed(&[], "a@anything.com"));
        let allowed = vec!["arcade.org".to_string()];
        assert!(email_domain_allowed(&allowed, "tech@Arcade.org"));
        assert!(!email_domain_allowed(&allowed, "tech@evil.org"));
    }

    #[test]
    fn jwt_round_trips_claims() {
        let user = User {
            id: 42,
            email: "tech@arcade.org".into(),
            name: "Tech".into(),
            initials: None,
            email_notifications_enabled: true,
            in_app_notifications_enabled: true,
            email_on_new_issue: true,
            email_on_assigned: true,
            email_on_status_change: true,
            email_on_comment: false,
            created_at: Utc::now(),
        };
        let token = create_jwt("secret", &user).unwrap();
        let data = jsonwebtoken::decode::<Claims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(b"secret"),
            &jsonwebtoken::Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.user_id, 42);
        assert_eq!(data.claims.sub, "tech@arcade.org");
    }
}
