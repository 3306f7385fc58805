//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **`RecorderError`**: failures of the recording core (chunk store, registry,
//!   renamer, transcription bridge). These never cross the WebSocket as raw
//!   errors; the session turns them into log lines, `error` frames or a
//!   terminal completion status.
//! - **`AppError`**: what an HTTP handler returns. It implements actix's
//!   `ResponseError` so a handler can simply use `?`.
//!
//! ## Taxonomy notes
//! - A duplicate chunk is not an error. `add_chunk` reports it as
//!   `ChunkStatus::AlreadyProcessed`.
//! - A finalize that runs out of retries is not an error either. It becomes
//!   the `DATA_LOSS` terminal status and is reported to the client.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the recording core.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The id was never registered by this process (or by the startup scan).
    #[error("no such recording: {0}")]
    UnknownRecording(u64),

    /// A chunk index that is not a non-negative integer.
    #[error("bad chunk index: {0}")]
    InvalidIndex(String),

    /// The allocator handed out an id that is already registered.
    #[error("recording id {0} is already in use")]
    DuplicateRecordingId(u64),

    /// Operation needs a finalized recording but it is still receiving chunks.
    #[error("recording {0} is still active")]
    RecordingActive(u64),

    #[error("title cannot be used as a file name: {0:?}")]
    InvalidTitle(String),

    #[error("rename source not found: {}", .0.display())]
    RenameSourceMissing(PathBuf),

    #[error("rename destination already exists: {}", .0.display())]
    RenameDestinationExists(PathBuf),

    /// A `completion_log.txt` that could not be parsed.
    #[error("malformed completion record {}: {reason}", .path.display())]
    MalformedCompletionRecord { path: PathBuf, reason: String },

    /// The external transcription worker refused or failed a request.
    #[error("transcription worker error: {0}")]
    Transcription(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for the recording core.
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **Conflict**: The request clashes with what is on disk (409 errors)
/// - **Unavailable**: The server is at its session limit (503 errors)
/// - **ConfigError**: Configuration problems (500 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "no such recording: 7",
///     "timestamp": "2026-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Maps core failures onto HTTP status classes.
impl From<RecorderError> for AppError {
    fn from(err: RecorderError) -> Self {
        match err {
            RecorderError::UnknownRecording(_) => AppError::NotFound(err.to_string()),
            RecorderError::InvalidIndex(_)
            | RecorderError::InvalidTitle(_)
            | RecorderError::RecordingActive(_) => AppError::BadRequest(err.to_string()),
            RecorderError::RenameDestinationExists(_)
            | RecorderError::RenameSourceMissing(_)
            | RecorderError::DuplicateRecordingId(_) => AppError::Conflict(err.to_string()),
            RecorderError::MalformedCompletionRecord { .. }
            | RecorderError::Transcription(_)
            | RecorderError::Io(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
