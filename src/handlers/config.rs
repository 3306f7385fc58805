use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Read-only view of the running configuration.
///
/// The transcription command line is left out; it may carry local paths.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "storage": {
                "media_root": config.storage.media_root
            },
            "recording": {
                "finalize_max_attempts": config.recording.finalize_max_attempts,
                "finalize_retry_interval_ms": config.recording.finalize_retry_interval_ms,
                "heartbeat_interval_secs": config.recording.heartbeat_interval_secs,
                "client_timeout_secs": config.recording.client_timeout_secs
            },
            "transcription": {
                "poll_interval_ms": config.transcription.poll_interval_ms,
                "default_model": config.transcription.default_model,
                "default_language": config.transcription.default_language
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions,
                "broadcast_capacity": config.performance.broadcast_capacity
            }
        }
    })))
}
