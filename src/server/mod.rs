mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;
pub use self::types::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::ingest_handler,
        api::media_handler,
        api::preview_handler,
        api::delete_media_handler,
        api::stats_handler,
    ),
    components(schemas(
        types::SearchRequest,
        types::SearchResponse,
        types::IngestRequest,
        types::MediaResponse,
        types::ErrorResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/search", post(api::search_handler))
        .route("/ingest", post(api::ingest_handler))
        .route("/media/{hash}", get(api::media_handler).delete(api::delete_media_handler))
        .route("/media/{hash}/preview", get(api::preview_handler))
        .route("/stats", get(api::stats_handler))
        // 请求只包含 JSON，限制为 1M
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state)
}
