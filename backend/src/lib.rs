pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod static_files;

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::AppConfig;
use db::DbPool;
use routes::{
    activity, auth, collections, comments, health, issues, locations, machine_models, machines,
    members, notifications, organizations,
};
use services::email::{self, EmailSender};
use services::pinballmap::PinballMapClient;

pub struct AppState {
    pub pool: DbPool,
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub email: Arc<dyn EmailSender>,
    pub pinballmap: PinballMapClient,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::build_pool(&config.database_url, config.db_pool_size)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("pinpoint/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let email: Arc<dyn EmailSender> = Arc::from(email::from_config(http.clone(), &config.email));
        let pinballmap = PinballMapClient::new(http.clone(), config.pinballmap_api_url.clone());

        Ok(Self {
            pool,
            config,
            http,
            email,
            pinballmap,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth routes
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // Organization routes
        .route(
            "/api/organization",
            get(organizations::get).patch(organizations::update),
        )
        .route("/api/organization/stats", get(organizations::stats))
        .route("/api/me/organizations", get(organizations::mine))
        // Member and role routes
        .route("/api/members", get(members::list).post(members::invite))
        .route(
            "/api/members/:user_id",
            patch(members::update).delete(members::remove),
        )
        .route("/api/roles", get(members::list_roles).post(members::create_role))
        .route(
            "/api/roles/:id",
            patch(members::update_role).delete(members::delete_role),
        )
        // Location routes
        .route("/api/locations", get(locations::list).post(locations::create))
        .route(
            "/api/locations/:id",
            get(locations::get)
                .patch(locations::update)
                .delete(locations::delete),
        )
        .route("/api/locations/:id/sync", post(locations::sync))
        // Machine model routes
        .route(
            "/api/machine-models",
            get(machine_models::search).post(machine_models::create),
        )
        // Machine routes
        .route("/api/machines", get(machines::list).post(machines::create))
        .route(
            "/api/machines/:id",
            get(machines::get)
                .patch(machines::update)
                .delete(machines::delete),
        )
        .route("/api/machines/:id/qr", post(machines::regenerate_qr))
        // Issue routes
        .route("/api/issues", get(issues::list).post(issues::create))
        .route(
            "/api/issues/:id",
            get(issues::get).patch(issues::update).delete(issues::delete),
        )
        .route("/api/issues/:id/status", post(issues::change_status))
        .route("/api/issues/:id/assign", post(issues::assign))
        .route(
            "/api/issues/:id/watch",
            post(issues::watch).delete(issues::unwatch),
        )
        .route("/api/issues/:id/history", get(issues::history))
        // Comment routes
        .route(
            "/api/issues/:id/comments",
            get(comments::list).post(comments::create),
        )
        .route(
            "/api/comments/:id",
            patch(comments::update).delete(comments::delete),
        )
        // Activity feed
        .route("/api/activity", get(activity::activity))
        // Notification routes
        .route("/api/notifications", get(notifications::list))
        .route(
            "/api/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .route(
            "/api/me/notification-preferences",
            get(notifications::preferences).patch(notifications::update_preferences),
        )
        // Collection routes
        .route(
            "/api/collections",
            get(collections::list).post(collections::create),
        )
        .route(
            "/api/collections/:id",
            patch(collections::update).delete(collections::delete),
        )
        .route(
            "/api/collections/:id/machines",
            get(collections::machines).put(collections::set_machines),
        )
        // Public QR reporting
        .route("/api/public/qr/:code", get(issues::public_machine))
        .route("/api/public/qr/:code/issues", post(issues::public_report))
        // Deep link redirects
        .route("/qr/:code", get(machines::qr_redirect))
        .route("/go/:reference", get(issues::go_redirect))
        // Static files (frontend) - fallback for everything else
        .fallback(static_files::static_handler)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
