pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;

pub use middleware::require_auth;
pub use rest::{import_schedule_handler, openapi_handler, upload_media_handler};
pub use ws_handler::ws_handler;

use state::AppState;

/// Builds the application router. CORS is layered on by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes: the planner socket resolves identity itself, since
    // anonymous viewers of a shared link are allowed in.
    let public_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .nest_service("/media/files", ServeDir::new(&state.config.media_dir));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/media", post(upload_media_handler))
        .route("/imports", post(import_schedule_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
}
