use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;
use crate::error::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub enum AppError {
    Library(Error),
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid token".to_owned()),
            Self::Library(e) => {
                let status = match &e {
                    Error::InvalidArgument(_) | Error::Ingestion { .. } => StatusCode::BAD_REQUEST,
                    Error::NotFound(_) => StatusCode::NOT_FOUND,
                    Error::Model(_) | Error::Backend(_) | Error::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
                    Error::SupersedeConflict { .. } => StatusCode::CONFLICT,
                    Error::StoreConsistency(_) | Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!("请求失败: {e}");
                }
                (status, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self::Library(err)
    }
}
