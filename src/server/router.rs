use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{self, AppState};
use super::static_files;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/summary", get(handlers::get_summary))
        .route("/usage/{service}", get(handlers::get_service_usage))
        .route("/refresh", get(handlers::refresh));

    // The dashboard may be served from a dev server on another port
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes)
        .route("/", get(static_files::index))
        .route("/static/{*path}", get(static_files::asset))
        .layer(cors)
        .with_state(state)
}
