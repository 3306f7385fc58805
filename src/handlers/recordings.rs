//! REST view of the recording registry.
//!
//! WebSocket clients get the same data through `initialize`; these routes
//! exist for tooling that doesn't speak the streaming protocol.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// Every known recording, ordered by id.
pub async fn list_recordings(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let recordings = state.manager.list();
    Ok(HttpResponse::Ok().json(json!({
        "count": recordings.len(),
        "recordings": recordings
    })))
}

pub async fn get_recording(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    state
        .manager
        .get(id)
        .map(|summary| HttpResponse::Ok().json(summary))
        .ok_or_else(|| AppError::NotFound(format!("no such recording: {}", id)))
}

/// Retitle a finished recording, moving its directory, audio file and
/// transcription outputs to match.
pub async fn rename_recording(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<RenameRequest>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let title = body.into_inner().title;

    // Filesystem moves; keep them off the async workers.
    let manager = state.manager.clone();
    let summary = web::block(move || manager.rename_recording(id, &title))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    info!(recording_id = id, title = %summary.title, "Recording retitled over HTTP");
    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use tempfile::TempDir;

    fn app_state() -> (TempDir, AppState) {
        let root = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.media_root = root.path().to_path_buf();
        (root, AppState::new(config).unwrap())
    }

    #[actix_web::test]
    async fn test_rename_finished_recording() {
        let (_root, state) = app_state();
        let id = state.manager.start("Take 1").unwrap();
        state.manager.add_chunk(id, 0, b"RIFF".to_vec()).unwrap();
        state.manager.finalize(id, Some(1)).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::handlers::configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri(&format!("/api/v1/recordings/{}/title", id))
            .set_json(json!({ "title": "Interview" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["title"], "Interview");
        assert!(body["path"].as_str().unwrap().ends_with("Interview.wav"));

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/recordings/{}", id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["completionStatus"], "VERIFIED");
    }

    #[actix_web::test]
    async fn test_rename_active_recording_is_rejected() {
        let (_root, state) = app_state();
        let id = state.manager.start("live").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri(&format!("/api/v1/recordings/{}/title", id))
            .set_json(json!({ "title": "other" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unknown_recording_is_404() {
        let (_root, state) = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/recordings/42").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
