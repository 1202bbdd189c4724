pub mod auth;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub base_path: Arc<String>,
}

pub fn create_app(state: AppState) -> Router {
    let base_path = state.base_path.clone();

    let app_routes = Router::new()
        .route("/api/register", post(handlers::auth::register))
        .route("/api/login", post(handlers::auth::login))
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/me", get(handlers::auth::me))
        .route("/api/tasks", get(handlers::api::list_all_tasks))
        .route("/api/tasks", post(handlers::api::create_new_task))
        .route("/api/tasks/{id}", get(handlers::api::get_single_task))
        .route("/api/tasks/{id}", put(handlers::api::update_existing_task))
        .route(
            "/api/tasks/{id}",
            delete(handlers::api::delete_existing_task),
        )
        .route("/api/tasks/{id}/toggle", post(handlers::api::toggle_task))
        .route("/api/completions", get(handlers::api::list_date_completions))
        .route("/api/scores/{date}", get(handlers::api::get_score))
        .route("/api/scores", get(handlers::api::list_scores))
        .route("/api/stats", get(handlers::api::get_stats))
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::compression::CompressionLayer::new()),
        )
        .with_state(state);

    tracing::info!("base_path: {base_path:?}");

    if base_path.is_empty() {
        app_routes
    } else {
        Router::new().nest(&*base_path, app_routes)
    }
}
