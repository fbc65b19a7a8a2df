use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_auth::AuthBearer;
use log::info;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::error::Error;
use crate::library::LibraryStats;
use crate::media::{ContentHash, MediaItem, Target};
use crate::pipeline::IngestReport;

fn authorize(state: &AppState, token: &str) -> Result<()> {
    if token == state.token { Ok(()) } else { Err(AppError::Unauthorized) }
}

async fn find_media(state: &AppState, hash: &str) -> Result<MediaItem> {
    let hash: ContentHash = hash.parse().map_err(Error::InvalidArgument)?;
    state
        .engine
        .library()
        .media_by_hash(&hash)
        .await?
        .ok_or_else(|| Error::NotFound(format!("media {hash}")).into())
}

/// 使用自然语言搜索媒体
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, body = ErrorResponse),
        (status = 503, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let k = data.k.unwrap_or(state.search.k);
    let scope = data.scope.unwrap_or(state.search.scope);

    info!("搜索: {:?} (k = {k})", data.query);
    let result = state.engine.search(&data.query, k, scope).await?;

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 入库服务器上的一个文件
#[utoipa::path(
    post,
    path = "/ingest",
    request_body = IngestRequest,
    responses(
        (status = 200, body = IngestReport),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn ingest_handler(
    AuthBearer(token): AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(data): Json<IngestRequest>,
) -> Result<Json<IngestReport>> {
    authorize(&state, &token)?;
    let Some(pipeline) = &state.pipeline else {
        return Err(Error::InvalidArgument("ingestion is disabled: no descriptor configured".into()).into());
    };
    info!("入库: {}", data.path);
    let report = pipeline.ingest(&data.path).await?;
    Ok(Json(report))
}

/// 获取媒体项详情
#[utoipa::path(
    get,
    path = "/media/{hash}",
    params(("hash" = String, Path, description = "内容哈希")),
    responses(
        (status = 200, body = MediaResponse),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn media_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<MediaResponse>> {
    let media = find_media(&state, &hash).await?;
    let library = state.engine.library();
    let keyframes = library.keyframes(media.id).await?;
    let records = library
        .media_records(media.id, true)
        .await?
        .into_iter()
        .map(|r| RecordView {
            id: r.id,
            keyframe_id: match r.target {
                Target::Keyframe(id) => Some(id),
                Target::Media(_) => None,
            },
            caption: r.caption,
            score: r.score,
            model_version: r.model_version,
            created_at: r.created_at,
        })
        .collect();
    let aggregate = state.engine.video_aggregate(media.id).await?.map(|a| (*a).clone());
    let preview = library.preview(&media).await.map(|_| format!("/media/{}/preview", media.hash));
    Ok(Json(MediaResponse { media, keyframes, records, aggregate, preview }))
}

/// 获取媒体项的预览图
#[utoipa::path(
    get,
    path = "/media/{hash}/preview",
    params(("hash" = String, Path, description = "内容哈希")),
    responses(
        (status = 200, content_type = "image/*", body = Vec<u8>),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn preview_handler(State(state): State<Arc<AppState>>, Path(hash): Path<String>) -> Result<Response> {
    let media = find_media(&state, &hash).await?;
    let Some(path) = state.engine.library().preview(&media).await else {
        return Err(Error::NotFound(format!("preview of {}", media.hash)).into());
    };
    let data = tokio::fs::read(&path).await.map_err(Error::from)?;
    let mime = match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, mime)], data).into_response())
}

/// 删除媒体项及其所有记录
#[utoipa::path(
    delete,
    path = "/media/{hash}",
    params(("hash" = String, Path, description = "内容哈希")),
    responses(
        (status = 204),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn delete_media_handler(
    AuthBearer(token): AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<StatusCode> {
    authorize(&state, &token)?;
    let media = find_media(&state, &hash).await?;
    state.engine.library().delete_cascade(media.id).await?;
    info!("删除: {} {}", media.hash, media.path);
    Ok(StatusCode::NO_CONTENT)
}

/// 获取媒体库统计信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = LibraryStats),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<LibraryStats>> {
    Ok(Json(state.engine.library().stats().await?))
}
