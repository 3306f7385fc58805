//! # Transcription Task Bridge
//!
//! Connects finished recordings to the external worker and reports
//! completions to every listening client.
//!
//! ## Lifecycle:
//! 1. `start_transcription` submits the recording, records the start time
//!    and starts the monitor if it is not running
//! 2. The monitor polls every outstanding task each `poll_interval`
//! 3. A ready task is removed, its end time recorded, and a
//!    `TranscriptionCompleted` event published with the sorted results listing
//! 4. When no tasks remain the monitor stops; the next submission restarts it
//!
//! `cancel` aborts the worker task and forgets it, so a cancelled task is
//! never reported as completed.

use crate::bus::{GroupBus, GroupEvent, RECORDING_EVENTS};
use crate::error::{RecorderError, RecorderResult};
use crate::recording::registry::RecordingManager;
use crate::transcription::worker::{
    list_results, TaskPoll, TaskState, TranscriptionRequest, TranscriptionWorker,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reply to a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedTask {
    pub task_id: String,
    pub recording_id: u64,
    pub file_size: u64,
}

#[derive(Debug, Clone)]
struct TrackedTask {
    recording_id: u64,
    submitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct BridgeState {
    tasks: HashMap<String, TrackedTask>,
    monitor_running: bool,
}

struct BridgeShared {
    worker: Arc<dyn TranscriptionWorker>,
    manager: Arc<RecordingManager>,
    bus: Arc<GroupBus>,
    poll_interval: Duration,
    default_model: String,
    default_language: String,
    state: Mutex<BridgeState>,
}

/// Cheap to clone; all clones share the same task table.
#[derive(Clone)]
pub struct TranscriptionBridge {
    shared: Arc<BridgeShared>,
}

impl TranscriptionBridge {
    pub fn new(
        worker: Arc<dyn TranscriptionWorker>,
        manager: Arc<RecordingManager>,
        bus: Arc<GroupBus>,
        poll_interval: Duration,
        default_model: impl Into<String>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                worker,
                manager,
                bus,
                poll_interval,
                default_model: default_model.into(),
                default_language: default_language.into(),
                state: Mutex::new(BridgeState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a finished recording.
    pub async fn start_transcription(
        &self,
        recording_id: u64,
        model: Option<String>,
        language: Option<String>,
    ) -> RecorderResult<StartedTask> {
        let location = self.shared.manager.locate(recording_id)?;
        if !location.status.is_terminal() {
            return Err(RecorderError::RecordingActive(recording_id));
        }
        let file_size = match std::fs::metadata(&location.file_path) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                return Err(RecorderError::Transcription(format!(
                    "recording {} has no audio file",
                    recording_id
                )))
            }
        };

        let request = TranscriptionRequest {
            directory: location.directory,
            file_path: location.file_path,
            model: model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.shared.default_model.clone()),
            language: language
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| self.shared.default_language.clone()),
        };
        let task_id = self.shared.worker.submit(request).await?;

        if let Err(e) = self.shared.manager.mark_transcription_started(recording_id) {
            warn!(recording_id, error = %e, "Could not record transcription start");
        }

        let start_monitor = {
            let mut state = self.state();
            state.tasks.insert(
                task_id.clone(),
                TrackedTask {
                    recording_id,
                    submitted_at: Utc::now(),
                },
            );
            !std::mem::replace(&mut state.monitor_running, true)
        };
        if start_monitor {
            debug!("Starting transcription monitor");
            tokio::spawn(self.clone().monitor());
        }

        info!(task_id = %task_id, recording_id, "Transcription submitted");
        Ok(StartedTask {
            task_id,
            recording_id,
            file_size,
        })
    }

    /// Abort and forget a task. Unknown ids are logged and ignored.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let removed = self.state().tasks.remove(task_id);
        let Some(task) = removed else {
            warn!(task_id, "Cancel requested for unknown transcription task");
            return false;
        };

        if let Err(e) = self.shared.worker.abort(task_id).await {
            warn!(task_id, error = %e, "Worker refused abort");
        }
        info!(task_id, recording_id = task.recording_id, "Transcription cancelled");
        true
    }

    /// Number of tasks still being watched.
    pub fn outstanding(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_monitoring(&self) -> bool {
        self.state().monitor_running
    }

    async fn monitor(self) {
        loop {
            tokio::time::sleep(self.shared.poll_interval).await;

            let snapshot: Vec<(String, TrackedTask)> = {
                let mut state = self.state();
                if state.tasks.is_empty() {
                    state.monitor_running = false;
                    debug!("Transcription monitor stopped, no tasks left");
                    return;
                }
                state
                    .tasks
                    .iter()
                    .map(|(id, task)| (id.clone(), task.clone()))
                    .collect()
            };

            let polls = join_all(
                snapshot
                    .iter()
                    .map(|(task_id, _)| self.shared.worker.poll(task_id)),
            )
            .await;

            for ((task_id, task), poll) in snapshot.into_iter().zip(polls) {
                match poll {
                    Ok(poll) if poll.ready => self.complete(task_id, task, poll),
                    Ok(_) => {}
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "Polling transcription task failed");
                        let results_dir = self
                            .shared
                            .manager
                            .locate(task.recording_id)
                            .map(|l| l.directory.join(crate::recording::rename::TRANSCRIPTIONS_DIR))
                            .unwrap_or_default();
                        self.complete(
                            task_id,
                            task,
                            TaskPoll {
                                ready: true,
                                state: TaskState::Failure,
                                results_dir,
                            },
                        );
                    }
                }
            }
        }
    }

    fn complete(&self, task_id: String, task: TrackedTask, poll: TaskPoll) {
        // Cancelled while the poll was in flight.
        if self.state().tasks.remove(&task_id).is_none() {
            return;
        }

        if let Err(e) = self.shared.manager.mark_transcription_finished(task.recording_id) {
            warn!(recording_id = task.recording_id, error = %e, "Could not record transcription end");
        }

        let elapsed = Utc::now() - task.submitted_at;
        info!(
            task_id = %task_id,
            recording_id = task.recording_id,
            state = ?poll.state,
            elapsed_secs = elapsed.num_seconds(),
            "Transcription finished"
        );

        self.shared.bus.publish(
            RECORDING_EVENTS,
            GroupEvent::TranscriptionCompleted {
                task_id,
                recording_id: task.recording_id,
                state: poll.state,
                results: list_results(&poll.results_dir),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::registry::FinalizeOutcome;
    use crate::recording::rename::TRANSCRIPTIONS_DIR;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Worker whose tasks finish when the test says so.
    #[derive(Default)]
    struct ScriptedWorker {
        tasks: Mutex<HashMap<String, (TaskState, PathBuf)>>,
        aborted: Mutex<Vec<String>>,
    }

    impl ScriptedWorker {
        fn finish(&self, task_id: &str, state: TaskState) {
            if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
                task.0 = state;
            }
        }
    }

    #[async_trait]
    impl TranscriptionWorker for ScriptedWorker {
        async fn submit(&self, request: TranscriptionRequest) -> RecorderResult<String> {
            let results = request.directory.join(TRANSCRIPTIONS_DIR);
            std::fs::create_dir_all(&results)?;
            std::fs::write(results.join("b.txt"), "text")?;
            std::fs::write(results.join("a.srt"), "1")?;
            let id = format!("task-{}", self.tasks.lock().unwrap().len() + 1);
            self.tasks
                .lock()
                .unwrap()
                .insert(id.clone(), (TaskState::Started, results));
            Ok(id)
        }

        async fn poll(&self, task_id: &str) -> RecorderResult<TaskPoll> {
            let tasks = self.tasks.lock().unwrap();
            let (state, dir) = tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| RecorderError::Transcription("unknown".into()))?;
            Ok(TaskPoll {
                ready: state.is_ready(),
                state,
                results_dir: dir,
            })
        }

        async fn abort(&self, task_id: &str) -> RecorderResult<()> {
            self.aborted.lock().unwrap().push(task_id.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        manager: Arc<RecordingManager>,
        bus: Arc<GroupBus>,
        worker: Arc<ScriptedWorker>,
        bridge: TranscriptionBridge,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let manager = Arc::new(RecordingManager::open(root.path()).unwrap());
        let bus = Arc::new(GroupBus::new(16));
        let worker = Arc::new(ScriptedWorker::default());
        let bridge = TranscriptionBridge::new(
            worker.clone(),
            manager.clone(),
            bus.clone(),
            Duration::from_millis(10),
            "tiny",
            "auto",
        );
        Fixture {
            _root: root,
            manager,
            bus,
            worker,
            bridge,
        }
    }

    fn finished_recording(manager: &RecordingManager) -> u64 {
        let id = manager.start("Take 1").unwrap();
        manager.add_chunk(id, 0, vec![1, 2, 3]).unwrap();
        assert!(matches!(
            manager.finalize(id, Some(1)).unwrap(),
            FinalizeOutcome::Finalized(_)
        ));
        id
    }

    #[tokio::test]
    async fn test_completion_is_broadcast_and_monitor_stops() {
        let f = fixture();
        let id = finished_recording(&f.manager);
        let mut events = f.bus.subscribe(RECORDING_EVENTS);

        let started = f.bridge.start_transcription(id, None, None).await.unwrap();
        assert_eq!(started.recording_id, id);
        assert_eq!(started.file_size, 3);
        assert!(f.bridge.is_monitoring());
        assert!(f.manager.get(id).unwrap().transcription_start_time.is_some());

        f.worker.finish(&started.task_id, TaskState::Success);
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let GroupEvent::TranscriptionCompleted { task_id, state, results, .. } = event else {
            panic!("expected a transcription event");
        };
        assert_eq!(task_id, started.task_id);
        assert_eq!(state, TaskState::Success);
        let names: Vec<_> = results.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, ["a.srt", "b.txt"]);

        assert_eq!(f.bridge.outstanding(), 0);
        assert!(f.manager.get(id).unwrap().transcription_end_time.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!f.bridge.is_monitoring());
    }

    #[tokio::test]
    async fn test_active_recording_is_refused() {
        let f = fixture();
        let id = f.manager.start("live").unwrap();
        assert!(matches!(
            f.bridge.start_transcription(id, None, None).await,
            Err(RecorderError::RecordingActive(_))
        ));
        assert!(matches!(
            f.bridge.start_transcription(404, None, None).await,
            Err(RecorderError::UnknownRecording(404))
        ));
    }

    #[tokio::test]
    async fn test_cancel_forgets_task() {
        let f = fixture();
        let id = finished_recording(&f.manager);
        let mut events = f.bus.subscribe(RECORDING_EVENTS);

        let started = f.bridge.start_transcription(id, Some("small".into()), None).await.unwrap();
        assert!(f.bridge.cancel(&started.task_id).await);
        assert_eq!(f.worker.aborted.lock().unwrap().as_slice(), [started.task_id.clone()]);
        assert!(!f.bridge.cancel(&started.task_id).await, "second cancel is unknown");

        f.worker.finish(&started.task_id, TaskState::Aborted);
        let nothing = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(nothing.is_err(), "cancelled task must not be reported");
    }
}
