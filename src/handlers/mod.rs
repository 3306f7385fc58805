pub mod config;
pub mod recordings;

pub use self::config::*;
pub use self::recordings::*;

use crate::health;
use crate::websocket;
use actix_web::web;

/// All routes, shared by `main` and the integration tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/recordings", web::get().to(list_recordings))
            .route("/recordings/{id}", web::get().to(get_recording))
            .route("/recordings/{id}/title", web::put().to(rename_recording)),
    )
    // Also provide health check at root level for convenience
    .route("/health", web::get().to(health::health_check))
    .route("/ws/dictaphone/data", web::get().to(websocket::recording_websocket))
    .route("/ws/dictaphone/data/", web::get().to(websocket::recording_websocket));
}
