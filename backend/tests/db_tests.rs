//! Tests against a live Postgres database.
//!
//! Point `DATABASE_URL` at a disposable database to run them; without it
//! every test returns early. Pending migrations are applied on first use
//! and each test works inside organizations of its own.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text, Timestamptz};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use pinpoint_server::config::AppConfig;
use pinpoint_server::routes::ORGANIZATION_HEADER;
use pinpoint_server::{build_router, AppState};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../migrations");

/// A role without superuser or BYPASSRLS, so policies apply to it.
const TENANT_ROLE: &str = "pinpoint_tenant";

macro_rules! database_url {
    () => {
        match std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => {
                eprintln!("DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

fn connect(url: &str) -> PgConnection {
    static MIGRATED: Mutex<bool> = Mutex::new(false);

    let mut conn = PgConnection::establish(url).expect("connect to DATABASE_URL");
    let mut migrated = MIGRATED.lock().unwrap_or_else(|e| e.into_inner());
    if !*migrated {
        conn.run_pending_migrations(MIGRATIONS)
            .expect("run migrations");
        *migrated = true;
    }
    conn
}

fn unique(prefix: &str) -> String {
    format!("{prefix}{}", rand::random::<u32>())
}

#[derive(QueryableByName)]
struct Id {
    #[diesel(sql_type = Integer)]
    id: i32,
}

#[derive(QueryableByName)]
struct Count {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

#[derive(QueryableByName)]
struct Flag {
    #[diesel(sql_type = Bool)]
    value: bool,
}

#[derive(QueryableByName)]
struct ResolvedAt {
    #[diesel(sql_type = Nullable<Timestamptz>)]
    resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

struct Org {
    id: i32,
    subdomain: String,
    admin_role: i32,
    member_role: i32,
}

fn create_org(conn: &mut PgConnection) -> Org {
    let subdomain = unique("arcade");
    let id = diesel::sql_query(
        "INSERT INTO organizations (name, subdomain) VALUES ($1, $1) RETURNING id",
    )
    .bind::<Text, _>(&subdomain)
    .get_result::<Id>(conn)
    .unwrap()
    .id;
    let admin_role = diesel::sql_query(
        "INSERT INTO roles (organization_id, name, is_system) VALUES ($1, 'Admin', TRUE) RETURNING id",
    )
    .bind::<Integer, _>(id)
    .get_result::<Id>(conn)
    .unwrap()
    .id;
    let member_role = diesel::sql_query(
        "INSERT INTO roles (organization_id, name, is_system, is_default) \
         VALUES ($1, 'Member', TRUE, TRUE) RETURNING id",
    )
    .bind::<Integer, _>(id)
    .get_result::<Id>(conn)
    .unwrap()
    .id;
    Org {
        id,
        subdomain,
        admin_role,
        member_role,
    }
}

fn create_user(conn: &mut PgConnection, name: &str) -> i32 {
    diesel::sql_query("INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id")
        .bind::<Text, _>(format!("{}@example.com", unique("user")))
        .bind::<Text, _>(name)
        .get_result::<Id>(conn)
        .unwrap()
        .id
}

fn join(conn: &mut PgConnection, org: &Org, user_id: i32, role_id: i32) {
    diesel::sql_query(
        "INSERT INTO memberships (user_id, organization_id, role_id) VALUES ($1, $2, $3)",
    )
    .bind::<Integer, _>(user_id)
    .bind::<Integer, _>(org.id)
    .bind::<Integer, _>(role_id)
    .execute(conn)
    .unwrap();
}

fn create_location(conn: &mut PgConnection, org: &Org, name: &str) -> i32 {
    diesel::sql_query("INSERT INTO locations (organization_id, name) VALUES ($1, $2) RETURNING id")
        .bind::<Integer, _>(org.id)
        .bind::<Text, _>(name)
        .get_result::<Id>(conn)
        .unwrap()
        .id
}

fn create_machine(
    conn: &mut PgConnection,
    org: &Org,
    location_id: i32,
    initials: &str,
    owner_id: Option<i32>,
) -> i32 {
    let model_id = diesel::sql_query(
        "INSERT INTO machine_models (organization_id, name, is_custom) VALUES ($1, $2, TRUE) RETURNING id",
    )
    .bind::<Integer, _>(org.id)
    .bind::<Text, _>(format!("{initials} model"))
    .get_result::<Id>(conn)
    .unwrap()
    .id;
    diesel::sql_query(
        "INSERT INTO machines (organization_id, location_id, model_id, name, initials, owner_id, qr_code_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind::<Integer, _>(org.id)
    .bind::<Integer, _>(location_id)
    .bind::<Integer, _>(model_id)
    .bind::<Text, _>(format!("{initials} machine"))
    .bind::<Text, _>(initials)
    .bind::<Nullable<Integer>, _>(owner_id)
    .bind::<Text, _>(unique("qr"))
    .get_result::<Id>(conn)
    .unwrap()
    .id
}

fn notification_count(conn: &mut PgConnection, user_id: i32, kind: &str) -> i64 {
    diesel::sql_query("SELECT COUNT(*) AS n FROM notifications WHERE user_id = $1 AND kind = $2")
        .bind::<Integer, _>(user_id)
        .bind::<Text, _>(kind)
        .get_result::<Count>(conn)
        .unwrap()
        .n
}

/// The router as seen by `user_id`, authenticated through dev mode.
fn app_as(url: &str, user_id: i32) -> Router {
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some(url.to_string()),
        "DEV_MODE" => Some("true".to_string()),
        "DEV_USER_ID" => Some(user_id.to_string()),
        "DB_POOL_SIZE" => Some("2".to_string()),
        _ => None,
    })
    .expect("test config");
    build_router(Arc::new(AppState::new(config).expect("test state")))
}

async fn call(
    app: &Router,
    org: &Org,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ORGANIZATION_HEADER, &org.subdomain);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Should parse JSON")
    };
    (status, value)
}

#[tokio::test]
async fn issue_numbers_history_and_resolution() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let admin = create_user(&mut conn, "Ada Admin");
    join(&mut conn, &org, admin, org.admin_role);
    let location = create_location(&mut conn, &org, "Main Floor");
    let machine = create_machine(&mut conn, &org, location, "MM", None);
    let app = app_as(&url, admin);

    let new_issue = json!({ "machine_id": machine, "title": "Ball stuck", "severity": "minor" });
    let (status, first) = call(&app, &org, "POST", "/api/issues", Some(new_issue.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["reference"], "MM-01");
    let (_, second) = call(&app, &org, "POST", "/api/issues", Some(new_issue)).await;
    assert_eq!(second["reference"], "MM-02");

    let (_, before) = call(&app, &org, "GET", "/api/issues/MM-01/history", None).await;
    let before = before.as_array().unwrap().len();
    let (status, _) = call(
        &app,
        &org,
        "PATCH",
        "/api/issues/MM-01",
        Some(json!({ "title": "Ball stuck in castle", "priority": "high", "severity": "minor" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, after) = call(&app, &org, "GET", "/api/issues/MM-01/history", None).await;
    let after = after.as_array().unwrap();
    assert_eq!(after.len(), before + 2);
    let mut fields: Vec<&str> = after
        .iter()
        .filter_map(|h| h["field"].as_str())
        .filter(|f| *f == "title" || *f == "priority" || *f == "severity")
        .collect();
    fields.sort_unstable();
    assert_eq!(fields, vec!["priority", "title"]);

    let resolved_at = |conn: &mut PgConnection| {
        diesel::sql_query("SELECT resolved_at FROM issues WHERE machine_id = $1 AND number = 1")
            .bind::<Integer, _>(machine)
            .get_result::<ResolvedAt>(conn)
            .unwrap()
            .resolved_at
    };
    let (status, fixed) = call(
        &app,
        &org,
        "POST",
        "/api/issues/MM-01/status",
        Some(json!({ "status": "fixed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!fixed["resolved_at"].is_null());
    assert!(resolved_at(&mut conn).is_some());

    let (_, reopened) = call(
        &app,
        &org,
        "POST",
        "/api/issues/MM-01/status",
        Some(json!({ "status": "new" })),
    )
    .await;
    assert!(reopened["resolved_at"].is_null());
    assert!(resolved_at(&mut conn).is_none());
}

#[tokio::test]
async fn last_admin_cannot_be_demoted_or_removed() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    let bob = create_user(&mut conn, "Bob");
    join(&mut conn, &org, ada, org.admin_role);
    join(&mut conn, &org, bob, org.member_role);
    let app = app_as(&url, ada);

    let demote = json!({ "role_id": org.member_role });
    let (status, _) = call(&app, &org, "PATCH", &format!("/api/members/{ada}"), Some(demote.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(&app, &org, "DELETE", &format!("/api/members/{ada}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let promote = json!({ "role_id": org.admin_role });
    let (status, _) = call(&app, &org, "PATCH", &format!("/api/members/{bob}"), Some(promote)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, &org, "PATCH", &format!("/api/members/{ada}"), Some(demote)).await;
    assert_eq!(status, StatusCode::OK);

    let bob_app = app_as(&url, bob);
    let (status, _) = call(&bob_app, &org, "DELETE", &format!("/api/members/{bob}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_demotions_keep_one_admin() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    let bob = create_user(&mut conn, "Bob");
    join(&mut conn, &org, ada, org.admin_role);
    join(&mut conn, &org, bob, org.admin_role);
    let (ada_app, bob_app) = (app_as(&url, ada), app_as(&url, bob));

    let demote = json!({ "role_id": org.member_role });
    let bob_uri = format!("/api/members/{bob}");
    let ada_uri = format!("/api/members/{ada}");
    let ((a, _), (b, _)) = tokio::join!(
        call(&ada_app, &org, "PATCH", &bob_uri, Some(demote.clone())),
        call(&bob_app, &org, "PATCH", &ada_uri, Some(demote.clone())),
    );
    let mut statuses = vec![a, b];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let admins = diesel::sql_query(
        "SELECT COUNT(*) AS n FROM memberships WHERE organization_id = $1 AND role_id = $2",
    )
    .bind::<Integer, _>(org.id)
    .bind::<Integer, _>(org.admin_role)
    .get_result::<Count>(&mut conn)
    .unwrap()
    .n;
    assert_eq!(admins, 1);
}

#[tokio::test]
async fn assigned_roles_cannot_be_deleted() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    let bob = create_user(&mut conn, "Bob");
    join(&mut conn, &org, ada, org.admin_role);
    join(&mut conn, &org, bob, org.member_role);
    let app = app_as(&url, ada);

    let (status, role) = call(
        &app,
        &org,
        "POST",
        "/api/roles",
        Some(json!({ "name": "Technician", "permissions": ["issue:view"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{role}");
    let role_id = role["id"].as_i64().unwrap();

    let (status, _) = call(
        &app,
        &org,
        "PATCH",
        &format!("/api/members/{bob}"),
        Some(json!({ "role_id": role_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, &org, "DELETE", &format!("/api/roles/{role_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, &org, "DELETE", &format!("/api/roles/{}", org.admin_role), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    call(
        &app,
        &org,
        "PATCH",
        &format!("/api/members/{bob}"),
        Some(json!({ "role_id": org.member_role })),
    )
    .await;
    let (status, _) = call(&app, &org, "DELETE", &format!("/api/roles/{role_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn deleted_comments_stay_in_thread() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    join(&mut conn, &org, ada, org.admin_role);
    let location = create_location(&mut conn, &org, "Back Room");
    let machine = create_machine(&mut conn, &org, location, "TZ", None);
    let app = app_as(&url, ada);

    call(
        &app,
        &org,
        "POST",
        "/api/issues",
        Some(json!({ "machine_id": machine, "title": "Clock stuck", "severity": "minor" })),
    )
    .await;
    let (status, first) = call(
        &app,
        &org,
        "POST",
        "/api/issues/TZ-01/comments",
        Some(json!({ "content": "Ordered a new motor" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    call(
        &app,
        &org,
        "POST",
        "/api/issues/TZ-01/comments",
        Some(json!({ "content": "Motor installed" })),
    )
    .await;

    let first_id = first["id"].as_i64().unwrap();
    let (status, _) = call(&app, &org, "DELETE", &format!("/api/comments/{first_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, &org, "DELETE", &format!("/api/comments/{first_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, thread) = call(&app, &org, "GET", "/api/issues/TZ-01/comments", None).await;
    let thread = thread.as_array().unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0]["deleted"], true);
    assert!(thread[0]["content"].is_null());
    assert_eq!(thread[1]["content"], "Motor installed");
}

#[tokio::test]
async fn location_collections_only_take_local_machines() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    join(&mut conn, &org, ada, org.admin_role);
    let upstairs = create_location(&mut conn, &org, "Upstairs");
    let downstairs = create_location(&mut conn, &org, "Downstairs");
    let local = create_machine(&mut conn, &org, upstairs, "AFM", None);
    let elsewhere = create_machine(&mut conn, &org, downstairs, "CV", None);
    let app = app_as(&url, ada);

    let (status, collection) = call(
        &app,
        &org,
        "POST",
        "/api/collections",
        Some(json!({ "name": "Bally classics", "location_id": upstairs })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{collection}");
    let uri = format!("/api/collections/{}/machines", collection["id"]);

    let (status, _) = call(&app, &org, "PUT", &uri, Some(json!({ "machine_ids": [local, elsewhere] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, &org, "PUT", &uri, Some(json!({ "machine_ids": [local] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["machine_ids"], json!([local]));
}

#[tokio::test]
async fn organizations_are_isolated() {
    let url = database_url!();
    let mut conn = connect(&url);
    let (north, south) = (create_org(&mut conn), create_org(&mut conn));
    let ada = create_user(&mut conn, "Ada");
    let bob = create_user(&mut conn, "Bob");
    join(&mut conn, &north, ada, north.admin_role);
    join(&mut conn, &south, bob, south.admin_role);
    let north_location = create_location(&mut conn, &north, "North");
    let north_machine = create_machine(&mut conn, &north, north_location, "MM", None);
    let south_location = create_location(&mut conn, &south, "South");
    let south_machine = create_machine(&mut conn, &south, south_location, "MM", None);
    let (ada_app, bob_app) = (app_as(&url, ada), app_as(&url, bob));

    let issue = |machine: i32| json!({ "machine_id": machine, "title": "Dead flipper", "severity": "unplayable" });
    call(&ada_app, &north, "POST", "/api/issues", Some(issue(north_machine))).await;
    call(&bob_app, &south, "POST", "/api/issues", Some(issue(south_machine))).await;

    let (status, _) = call(&ada_app, &south, "GET", "/api/issues", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, listed) = call(&ada_app, &north, "GET", "/api/issues", None).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["issues"][0]["machine_id"], north_machine);

    // Row-level security on its own, below the application filters.
    let bypasses = diesel::sql_query(
        "SELECT rolsuper OR rolbypassrls AS value FROM pg_roles WHERE rolname = current_user",
    )
    .get_result::<Flag>(&mut conn)
    .unwrap()
    .value;
    if bypasses {
        diesel::sql_query(format!(
            "DO $$ BEGIN CREATE ROLE {TENANT_ROLE} NOLOGIN; \
             EXCEPTION WHEN duplicate_object THEN NULL; END $$"
        ))
        .execute(&mut conn)
        .unwrap();
        diesel::sql_query(format!("GRANT SELECT ON ALL TABLES IN SCHEMA public TO {TENANT_ROLE}"))
            .execute(&mut conn)
            .unwrap();
    }
    let visible = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            if bypasses {
                diesel::sql_query(format!("SET LOCAL ROLE {TENANT_ROLE}")).execute(conn)?;
            }
            diesel::sql_query("SELECT set_config('app.current_organization_id', $1, true)")
                .bind::<Text, _>(north.id.to_string())
                .execute(conn)?;
            diesel::sql_query("SELECT COUNT(*) AS n FROM issues")
                .get_result::<Count>(conn)
                .map(|c| c.n)
        })
        .unwrap();
    assert_eq!(visible, 1);
}

#[tokio::test]
async fn in_app_preference_gates_notification_rows() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    let owner = create_user(&mut conn, "Owner");
    join(&mut conn, &org, ada, org.admin_role);
    join(&mut conn, &org, owner, org.member_role);
    let location = create_location(&mut conn, &org, "Main Floor");
    let machine = create_machine(&mut conn, &org, location, "GZ", Some(owner));
    let app = app_as(&url, ada);

    let issue = json!({ "machine_id": machine, "title": "Tilt bob loose", "severity": "minor" });
    call(&app, &org, "POST", "/api/issues", Some(issue.clone())).await;
    assert_eq!(notification_count(&mut conn, owner, "issue_created"), 1);
    assert_eq!(notification_count(&mut conn, ada, "issue_created"), 0);

    diesel::sql_query("UPDATE users SET in_app_notifications_enabled = FALSE WHERE id = $1")
        .bind::<Integer, _>(owner)
        .execute(&mut conn)
        .unwrap();
    call(&app, &org, "POST", "/api/issues", Some(issue)).await;
    assert_eq!(notification_count(&mut conn, owner, "issue_created"), 1);
}

#[tokio::test]
async fn status_change_comment_reaches_comment_subscribers() {
    let url = database_url!();
    let mut conn = connect(&url);
    let org = create_org(&mut conn);
    let ada = create_user(&mut conn, "Ada");
    let owner = create_user(&mut conn, "Owner");
    join(&mut conn, &org, ada, org.admin_role);
    join(&mut conn, &org, owner, org.member_role);
    let location = create_location(&mut conn, &org, "Main Floor");
    let machine = create_machine(&mut conn, &org, location, "TAF", Some(owner));
    diesel::sql_query(
        "UPDATE machines SET notify_on_new_issues = FALSE, notify_on_status_changes = FALSE, \
         notify_on_comments = TRUE WHERE id = $1",
    )
    .bind::<Integer, _>(machine)
    .execute(&mut conn)
    .unwrap();
    let app = app_as(&url, ada);

    call(
        &app,
        &org,
        "POST",
        "/api/issues",
        Some(json!({ "machine_id": machine, "title": "Thing hand weak", "severity": "minor" })),
    )
    .await;
    let (status, _) = call(
        &app,
        &org,
        "POST",
        "/api/issues/TAF-01/status",
        Some(json!({ "status": "in_progress", "comment": "Magnet coil ordered" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notification_count(&mut conn, owner, "comment_added"), 1);
    assert_eq!(notification_count(&mut conn, owner, "status_changed"), 0);
}
