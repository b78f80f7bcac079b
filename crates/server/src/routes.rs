//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/v1/capabilities", get(handlers::get_capabilities))
        .route("/v1/health", get(handlers::health_check))
        // Upload sessions
        .route("/v1/uploads", post(handlers::create_uploads))
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload).delete(handlers::abort_upload),
        )
        .route("/v1/uploads/{upload_id}/chunks", put(handlers::upload_chunk))
        // Published files
        .route("/v1/files", get(handlers::list_files))
        .route("/v1/files/{name}", get(handlers::download_file));

    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
