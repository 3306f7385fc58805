use crate::recording::model::RecordingStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::collections::BTreeMap;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "dictaphone-server",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "storage": {
            "recordings_dir": state.manager.recordings_dir(),
            "last_recording_id": state.manager.last_id()
        },
        "sessions": {
            "active": metrics.active_sessions,
            "max": config.performance.max_concurrent_sessions
        },
        "chunks": {
            "applied": metrics.chunks_applied,
            "duplicates": metrics.duplicate_chunks,
            "resend_requests": metrics.resend_requests
        },
        "recordings": recordings_by_status(&state),
        "transcription": {
            "outstanding_tasks": state.bridge.outstanding(),
            "monitoring": state.bridge.is_monitoring()
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let finalized: BTreeMap<&str, u64> = metrics
        .finalize_outcomes
        .iter()
        .map(|(status, count)| (status.as_code(), *count))
        .collect();

    let received = metrics.chunks_applied + metrics.duplicate_chunks;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.total_sessions,
            "rejected": metrics.rejected_sessions
        },
        "chunks": {
            "applied": metrics.chunks_applied,
            "duplicates": metrics.duplicate_chunks,
            "duplicate_rate": if received > 0 {
                metrics.duplicate_chunks as f64 / received as f64
            } else {
                0.0
            },
            "resend_requests": metrics.resend_requests
        },
        "protocol_errors": metrics.protocol_errors,
        "recordings": recordings_by_status(&state),
        "finalized_this_run": finalized,
        "finalize_jobs_running": state.finalizers.running(),
        "transcription": {
            "outstanding_tasks": state.bridge.outstanding()
        }
    }))
}

/// Count per status code, including the statuses nobody is in.
fn recordings_by_status(state: &AppState) -> BTreeMap<&'static str, usize> {
    let counts = state.manager.status_counts();
    RecordingStatus::all()
        .iter()
        .map(|status| (status.as_code(), counts.get(status).copied().unwrap_or(0)))
        .collect()
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};
    use tempfile::TempDir;

    #[actix_web::test]
    async fn test_metrics_lists_every_status() {
        let root = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.media_root = root.path().to_path_buf();
        let state = AppState::new(config).unwrap();
        state.manager.start("take").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["recordings"]["ACTIVE"], 1);
        assert_eq!(body["recordings"]["VERIFIED"], 0);
        assert_eq!(body["recordings"].as_object().unwrap().len(), 5);
        assert_eq!(body["finalize_jobs_running"], 0);
    }
}
