//! 上传引擎错误类型与 HTTP 状态映射。

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::backend::StoreError;

/// 携带错误码的响应头。
pub const UPLOAD_ERROR_HEADER: HeaderName = HeaderName::from_static("x-upload-error");

/// 上传引擎错误。
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("offset mismatch: upload is at {expected}, request starts at {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("upload size exceeded: limit {limit} bytes, attempted {attempted} bytes")]
    SizeExceeded { limit: u64, attempted: u64 },

    #[error("upload length already fixed for {0}")]
    LengthAlreadyFixed(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("upload {0} is locked by another request")]
    LockBusy(String),

    #[error("partial upload not found: {0}")]
    PartialNotFound(String),

    #[error("partial upload incomplete: {0}")]
    PartialIncomplete(String),

    #[error("upload already final: {0}")]
    PartialAlreadyFinal(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid upload state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

/// 引擎操作结果类型。
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// 每种引擎错误对应的稳定错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    OffsetMismatch,
    SizeExceeded,
    LengthAlreadyFixed,
    ChecksumMismatch,
    LockBusy,
    PartialNotFound,
    PartialIncomplete,
    PartialAlreadyFinal,
    InvalidMetadata,
    InvalidState,
    Storage,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::OffsetMismatch => "offset_mismatch",
            ErrorCode::SizeExceeded => "size_exceeded",
            ErrorCode::LengthAlreadyFixed => "length_already_fixed",
            ErrorCode::ChecksumMismatch => "checksum_mismatch",
            ErrorCode::LockBusy => "lock_busy",
            ErrorCode::PartialNotFound => "partial_not_found",
            ErrorCode::PartialIncomplete => "partial_incomplete",
            ErrorCode::PartialAlreadyFinal => "partial_already_final",
            ErrorCode::InvalidMetadata => "invalid_metadata",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::Storage => "storage",
        }
    }

    /// tus 接口使用的 HTTP 状态码。
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::OffsetMismatch => StatusCode::CONFLICT,
            ErrorCode::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::LengthAlreadyFixed => StatusCode::BAD_REQUEST,
            // tus checksum 扩展：460 Checksum Mismatch
            ErrorCode::ChecksumMismatch => {
                StatusCode::from_u16(460).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ErrorCode::LockBusy => StatusCode::CONFLICT,
            ErrorCode::PartialNotFound => StatusCode::BAD_REQUEST,
            ErrorCode::PartialIncomplete => StatusCode::BAD_REQUEST,
            ErrorCode::PartialAlreadyFinal => StatusCode::FORBIDDEN,
            ErrorCode::InvalidMetadata => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidState => StatusCode::FORBIDDEN,
            ErrorCode::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl UploadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UploadError::NotFound(_) => ErrorCode::NotFound,
            UploadError::OffsetMismatch { .. } => ErrorCode::OffsetMismatch,
            UploadError::SizeExceeded { .. } => ErrorCode::SizeExceeded,
            UploadError::LengthAlreadyFixed(_) => ErrorCode::LengthAlreadyFixed,
            UploadError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            UploadError::LockBusy(_) => ErrorCode::LockBusy,
            UploadError::PartialNotFound(_) => ErrorCode::PartialNotFound,
            UploadError::PartialIncomplete(_) => ErrorCode::PartialIncomplete,
            UploadError::PartialAlreadyFinal(_) => ErrorCode::PartialAlreadyFinal,
            UploadError::InvalidMetadata(_) => ErrorCode::InvalidMetadata,
            UploadError::InvalidState(_) => ErrorCode::InvalidState,
            UploadError::Storage(_) => ErrorCode::Storage,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }
}

impl From<StoreError> for UploadError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => UploadError::NotFound(id),
            other => UploadError::Storage(other),
        }
    }
}

/// HTTP 层错误：请求解析失败或引擎错误。
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnsupportedMediaType(String),
    RangeNotSatisfiable(u64),
    Internal(String),
    Upload(UploadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::UnsupportedMediaType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg).into_response()
            }
            ApiError::RangeNotSatisfiable(size) => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    headers,
                    "range not satisfiable",
                )
                    .into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
            ApiError::Upload(err) => {
                let code = err.code();
                let mut headers = HeaderMap::new();
                headers.insert(UPLOAD_ERROR_HEADER, HeaderValue::from_static(code.as_str()));
                (code.status(), headers, err.to_string()).into_response()
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        ApiError::Upload(error)
    }
}
