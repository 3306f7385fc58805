//! # Finalize Job
//!
//! The background activity that turns an `ACTIVE` recording into a terminal
//! one after `stop_recording` or a lost connection.
//!
//! ## Modes:
//! - **Requested** (client sent `stop_recording(n)`): up to `max_attempts`
//!   checks that chunks `0..n` are all present, `retry_interval` apart. Each
//!   failed check asks the client for the missing chunks. Running out of
//!   attempts marks the recording `DATA_LOSS`.
//! - **Disconnected**: one attempt with no expected count; always terminal.
//!
//! Either way the notifier's `finished` is called exactly once, so a job can
//! never end without the session (or the broadcast group) hearing about it.
//! The job sleeps between attempts without holding the registry lock.

use crate::error::RecorderResult;
use crate::recording::model::RecordingSummary;
use crate::recording::registry::{FinalizeOutcome, RecordingManager};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMode {
    Requested { total_chunks: u32 },
    Disconnected,
}

/// Where a finalize job reports to.
pub trait FinalizeNotifier: Send + Sync + 'static {
    /// Finalize is blocked on `chunk_index`.
    fn request_chunk(&self, recording_id: u64, chunk_index: u64);

    /// The job is over. Called exactly once.
    fn finished(&self, recording_id: u64, result: RecorderResult<RecordingSummary>);
}

pub struct FinalizeJob {
    pub manager: Arc<RecordingManager>,
    pub recording_id: u64,
    pub mode: FinalizeMode,
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

/// Handle to a spawned job.
pub struct FinalizeHandle {
    recording_id: u64,
    handle: JoinHandle<()>,
}

impl FinalizeHandle {
    pub fn recording_id(&self) -> u64 {
        self.recording_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the job between attempts. The recording stays `ACTIVE`; the
    /// caller is expected to start a replacement (the disconnect path).
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Keeps the jobs whose connection is already gone (disconnect finalizes),
/// so they are reaped as they end and awaited at shutdown.
pub struct FinalizeSupervisor {
    jobs: Mutex<JoinSet<()>>,
}

impl Default for FinalizeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizeSupervisor {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(JoinSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `job` on the current runtime and keep its handle.
    pub fn spawn<N: FinalizeNotifier>(&self, job: FinalizeJob, notifier: N) {
        let recording_id = job.recording_id;
        let mut jobs = self.lock();
        reap(&mut jobs);
        jobs.spawn(async move {
            job.run(&notifier).await;
        });
        debug!(recording_id, running = jobs.len(), "Supervising finalize job");
    }

    /// Jobs that have not ended yet.
    pub fn running(&self) -> usize {
        let mut jobs = self.lock();
        reap(&mut jobs);
        jobs.len()
    }

    /// Wait up to `timeout` for every supervised job; the rest are aborted.
    pub async fn drain(&self, timeout: Duration) {
        let mut jobs = std::mem::replace(&mut *self.lock(), JoinSet::new());
        if jobs.is_empty() {
            return;
        }

        info!(running = jobs.len(), "Waiting for finalize jobs");
        let waited = tokio::time::timeout(timeout, async {
            while let Some(result) = jobs.join_next().await {
                log_join(result);
            }
        })
        .await;

        if waited.is_err() {
            warn!(remaining = jobs.len(), "Finalize jobs still running at shutdown, aborting");
            jobs.abort_all();
        }
    }
}

fn reap(jobs: &mut JoinSet<()>) {
    while let Some(result) = jobs.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Finalize job panicked");
        }
    }
}

impl FinalizeJob {
    pub fn spawn<N: FinalizeNotifier>(self, notifier: N) -> FinalizeHandle {
        let recording_id = self.recording_id;
        let handle = tokio::spawn(async move {
            self.run(&notifier).await;
        });
        FinalizeHandle {
            recording_id,
            handle,
        }
    }

    /// Run to a terminal state and notify.
    pub async fn run<N: FinalizeNotifier>(self, notifier: &N) {
        let result = match self.mode {
            FinalizeMode::Requested { total_chunks } => self.run_requested(total_chunks, notifier).await,
            FinalizeMode::Disconnected => self.run_disconnected(),
        };

        match &result {
            Ok(summary) => info!(
                recording_id = self.recording_id,
                status = %summary.completion_status,
                size = summary.size,
                "Finalize finished"
            ),
            Err(e) => error!(recording_id = self.recording_id, error = %e, "Finalize failed"),
        }
        notifier.finished(self.recording_id, result);
    }

    async fn run_requested<N: FinalizeNotifier>(
        &self,
        total_chunks: u32,
        notifier: &N,
    ) -> RecorderResult<RecordingSummary> {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.manager.finalize(self.recording_id, Some(total_chunks)) {
                Ok(FinalizeOutcome::Finalized(summary)) => return Ok(summary),
                Ok(FinalizeOutcome::Incomplete { missing }) => {
                    debug!(
                        recording_id = self.recording_id,
                        attempt,
                        ?missing,
                        "Finalize incomplete, requesting resend"
                    );
                    for chunk_index in missing {
                        notifier.request_chunk(self.recording_id, chunk_index);
                    }
                }
                Err(e @ crate::error::RecorderError::UnknownRecording(_)) => return Err(e),
                Err(e) => {
                    warn!(recording_id = self.recording_id, attempt, error = %e, "Finalize attempt failed");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        warn!(
            recording_id = self.recording_id,
            attempts, "Finalize retries exhausted, marking data loss"
        );
        self.manager.mark_data_loss(self.recording_id)
    }

    fn run_disconnected(&self) -> RecorderResult<RecordingSummary> {
        match self.manager.finalize(self.recording_id, None)? {
            FinalizeOutcome::Finalized(summary) => Ok(summary),
            FinalizeOutcome::Incomplete { .. } => self.manager.mark_data_loss(self.recording_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::model::RecordingStatus;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    enum Note {
        Request(u64),
        Finished(RecordingStatus),
        Failed,
    }

    struct ChannelNotifier(mpsc::UnboundedSender<Note>);

    impl FinalizeNotifier for ChannelNotifier {
        fn request_chunk(&self, _recording_id: u64, chunk_index: u64) {
            let _ = self.0.send(Note::Request(chunk_index));
        }

        fn finished(&self, _recording_id: u64, result: RecorderResult<RecordingSummary>) {
            let _ = self.0.send(match result {
                Ok(summary) => Note::Finished(summary.completion_status),
                Err(_) => Note::Failed,
            });
        }
    }

    fn job(manager: &Arc<RecordingManager>, id: u64, mode: FinalizeMode) -> FinalizeJob {
        FinalizeJob {
            manager: manager.clone(),
            recording_id: id,
            mode,
            max_attempts: 3,
            retry_interval: Duration::from_millis(20),
        }
    }

    fn setup(indices: &[i64]) -> (TempDir, Arc<RecordingManager>, u64) {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(RecordingManager::open(root.path()).unwrap());
        let id = manager.start("take").unwrap();
        for &index in indices {
            manager.add_chunk(id, index, vec![index as u8]).unwrap();
        }
        (root, manager, id)
    }

    #[tokio::test]
    async fn test_complete_recording_verifies_first_try() {
        let (_root, manager, id) = setup(&[0, 1, 2]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        job(&manager, id, FinalizeMode::Requested { total_chunks: 3 })
            .run(&ChannelNotifier(tx))
            .await;

        assert!(matches!(rx.recv().await, Some(Note::Finished(RecordingStatus::Verified))));
    }

    #[tokio::test]
    async fn test_resend_during_retry_verifies() {
        let (_root, manager, id) = setup(&[0, 2]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = job(&manager, id, FinalizeMode::Requested { total_chunks: 3 })
            .spawn(ChannelNotifier(tx));

        assert!(matches!(rx.recv().await, Some(Note::Request(1))));
        manager.add_chunk(id, 1, vec![1]).unwrap();

        let mut last = None;
        while let Some(note) = rx.recv().await {
            if matches!(note, Note::Finished(_) | Note::Failed) {
                last = Some(note);
                break;
            }
        }
        assert!(matches!(last, Some(Note::Finished(RecordingStatus::Verified))));
        assert_eq!(handle.recording_id(), id);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_data_loss() {
        let (_root, manager, id) = setup(&[0]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        job(&manager, id, FinalizeMode::Requested { total_chunks: 2 })
            .run(&ChannelNotifier(tx))
            .await;

        let notes: Vec<Note> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let requests = notes.iter().filter(|n| matches!(n, Note::Request(1))).count();
        assert_eq!(requests, 3, "one resend request per attempt: {:?}", notes);
        assert!(matches!(notes.last(), Some(Note::Finished(RecordingStatus::DataLoss))));
        assert_eq!(manager.get(id).unwrap().completion_status, RecordingStatus::DataLoss);
    }

    #[tokio::test]
    async fn test_disconnect_mode() {
        let (_root, manager, id) = setup(&[0, 1, 3]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        job(&manager, id, FinalizeMode::Disconnected)
            .run(&ChannelNotifier(tx))
            .await;

        assert!(matches!(rx.recv().await, Some(Note::Finished(RecordingStatus::DataLoss))));
    }

    #[tokio::test]
    async fn test_huge_total_requests_a_bounded_batch() {
        let (_root, manager, id) = setup(&[0]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        job(&manager, id, FinalizeMode::Requested { total_chunks: u32::MAX })
            .run(&ChannelNotifier(tx))
            .await;

        let notes: Vec<Note> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let requests = notes.iter().filter(|n| matches!(n, Note::Request(_))).count();
        assert_eq!(requests, 3 * crate::recording::registry::MAX_RESEND_REQUESTS);
        assert!(matches!(notes.last(), Some(Note::Finished(RecordingStatus::DataLoss))));
    }

    #[tokio::test]
    async fn test_supervisor_tracks_and_drains_jobs() {
        let (_root, manager, id) = setup(&[0, 1]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = FinalizeSupervisor::new();

        supervisor.spawn(job(&manager, id, FinalizeMode::Disconnected), ChannelNotifier(tx));
        supervisor.drain(Duration::from_secs(5)).await;

        assert_eq!(supervisor.running(), 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(Note::Finished(RecordingStatus::InterruptedVerified))
        ));
        assert_eq!(
            manager.get(id).unwrap().completion_status,
            RecordingStatus::InterruptedVerified
        );
    }

    #[tokio::test]
    async fn test_unknown_recording_still_notifies() {
        let (_root, manager, _id) = setup(&[]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        job(&manager, 99, FinalizeMode::Requested { total_chunks: 1 })
            .run(&ChannelNotifier(tx))
            .await;

        assert!(matches!(rx.recv().await, Some(Note::Failed)));
    }
}
