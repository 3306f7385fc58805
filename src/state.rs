//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every WebSocket actor.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets many connections share ownership of one registry
//! - **Thread safety**: Safe to clone into actors and background jobs
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer
//! - **Used for**: configuration and metrics, which are read far more often
//!   than written
//!
//! The recording registry, bus, finalize supervisor and transcription bridge
//! manage their own locking, so they are shared as plain `Arc`s.

use crate::bus::GroupBus;
use crate::config::AppConfig;
use crate::error::RecorderResult;
use crate::recording::model::RecordingStatus;
use crate::recording::registry::RecordingManager;
use crate::recording::store::ChunkStatus;
use crate::session::finalize::FinalizeSupervisor;
use crate::transcription::bridge::TranscriptionBridge;
use crate::transcription::worker::{ProcessWorker, TranscriptionWorker};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The state shared across all handlers and sessions.
///
/// ## Thread Safety Pattern:
/// Cloning `AppState` clones the `Arc`s, not the data, so every clone sees
/// the same recordings, tasks and counters.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, read on every new connection
    pub config: Arc<RwLock<AppConfig>>,

    /// Protocol counters, updated by every session
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Owner of every recording
    pub manager: Arc<RecordingManager>,

    /// Broadcast groups for completions
    pub bus: Arc<GroupBus>,

    /// Finalize jobs that outlived their connection
    pub finalizers: Arc<FinalizeSupervisor>,

    /// Outstanding transcription tasks
    pub bridge: TranscriptionBridge,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all sessions.
///
/// ## Why these metrics matter:
/// - **active_sessions**: current connections, checked against the session cap
/// - **resend_requests**: how lossy the clients' links are
/// - **finalize_outcomes**: how often recordings end in `DATA_LOSS`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub active_sessions: u32,
    pub total_sessions: u64,
    pub rejected_sessions: u64,
    pub chunks_applied: u64,
    pub duplicate_chunks: u64,
    pub resend_requests: u64,
    pub protocol_errors: u64,
    pub finalize_outcomes: HashMap<RecordingStatus, u64>,
}

impl AppState {
    /// Build the state with the child-process transcription worker.
    pub fn new(config: AppConfig) -> RecorderResult<Self> {
        let worker = Arc::new(ProcessWorker::new(config.transcription.clone()));
        Self::with_worker(config, worker)
    }

    /// Build the state around any worker implementation.
    ///
    /// Opens the registry, which scans `{media_root}/RECORDINGS` and recovers
    /// what a previous run left behind.
    pub fn with_worker(config: AppConfig, worker: Arc<dyn TranscriptionWorker>) -> RecorderResult<Self> {
        let manager = Arc::new(RecordingManager::open(&config.storage.media_root)?);
        let bus = Arc::new(GroupBus::new(config.performance.broadcast_capacity));
        let bridge = TranscriptionBridge::new(
            worker,
            manager.clone(),
            bus.clone(),
            config.transcription.poll_interval(),
            config.transcription.default_model.clone(),
            config.transcription.default_language.clone(),
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            manager,
            bus,
            finalizers: Arc::new(FinalizeSupervisor::new()),
            bridge,
            start_time: Instant::now(),
        })
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reserve a session slot. Returns `false` when `max` are already in use.
    ///
    /// Check and increment happen under one write lock so two upgrades can't
    /// both take the last slot.
    pub fn try_acquire_session(&self, max: usize) -> bool {
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions as usize >= max {
            metrics.rejected_sessions += 1;
            return false;
        }
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        true
    }

    /// Give a session slot back. Never goes below zero.
    pub fn release_session(&self) {
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_chunk(&self, status: ChunkStatus) {
        let mut metrics = self.metrics_mut();
        match status {
            ChunkStatus::Applied => metrics.chunks_applied += 1,
            ChunkStatus::AlreadyProcessed => metrics.duplicate_chunks += 1,
        }
    }

    pub fn record_resend_request(&self) {
        self.metrics_mut().resend_requests += 1;
    }

    pub fn record_protocol_error(&self) {
        self.metrics_mut().protocol_errors += 1;
    }

    pub fn record_finalize(&self, status: RecordingStatus) {
        *self.metrics_mut().finalize_outcomes.entry(status).or_insert(0) += 1;
    }

    /// Snapshot of the counters, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
