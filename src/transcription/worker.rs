//! # Transcription Worker Contract
//!
//! The server never transcribes anything itself. It hands a finished
//! recording to a worker and later asks whether the task is done.
//!
//! ## Contract:
//! - `submit(request) -> task_id`, returns immediately
//! - `poll(task_id) -> { ready, state, results_dir }`
//! - `abort(task_id)`
//!
//! `ProcessWorker` implements it by running a configurable command per task
//! (by default the Whisper GUI transcriber script). Tests plug in their own
//! implementations.

use crate::config::TranscriptionConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::recording::rename::TRANSCRIPTIONS_DIR;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

/// File the worker's stdout and stderr are captured into.
pub const TRANSCRIBER_OUTPUT: &str = "transcriber_output.txt";

/// State of a transcription task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
    Aborted,
}

impl TaskState {
    /// Whether the task has finished, one way or another.
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure | TaskState::Aborted)
    }
}

/// What to transcribe.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub directory: PathBuf,
    pub file_path: PathBuf,
    pub model: String,
    pub language: String,
}

/// Answer to `poll`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPoll {
    pub ready: bool,
    pub state: TaskState,
    pub results_dir: PathBuf,
}

/// One file in a results directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFile {
    pub file_name: String,
    pub path: String,
    pub size: u64,
}

/// Files in `dir`, sorted by name. A missing directory lists as empty.
pub fn list_results(dir: &Path) -> Vec<ResultFile> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<ResultFile> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            metadata.is_file().then(|| ResultFile {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
                size: metadata.len(),
            })
        })
        .collect();
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    files
}

#[async_trait]
pub trait TranscriptionWorker: Send + Sync {
    async fn submit(&self, request: TranscriptionRequest) -> RecorderResult<String>;

    async fn poll(&self, task_id: &str) -> RecorderResult<TaskPoll>;

    async fn abort(&self, task_id: &str) -> RecorderResult<()>;
}

struct ProcessTask {
    state: TaskState,
    results_dir: PathBuf,
    cancel: Option<oneshot::Sender<()>>,
}

/// Runs the configured command once per task as a child process.
pub struct ProcessWorker {
    config: TranscriptionConfig,
    tasks: Arc<Mutex<HashMap<String, ProcessTask>>>,
}

impl ProcessWorker {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Command line for one request, placeholders filled in.
    pub fn command_args(&self, request: &TranscriptionRequest, output_dir: &Path) -> Vec<String> {
        let input = request.file_path.to_string_lossy();
        let output = output_dir.to_string_lossy();
        let mut args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output)
                    .replace("{model}", &request.model)
            })
            .collect();

        if request.language != "auto" && !self.config.language_flag.is_empty() {
            args.push(self.config.language_flag.clone());
            args.push(request.language.clone());
        }
        args
    }
}

fn lock_tasks(tasks: &Mutex<HashMap<String, ProcessTask>>) -> MutexGuard<'_, HashMap<String, ProcessTask>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(tasks: &Mutex<HashMap<String, ProcessTask>>, task_id: &str, state: TaskState) {
    // Aborted tasks are already gone from the table.
    if let Some(task) = lock_tasks(tasks).get_mut(task_id) {
        task.state = state;
        if state.is_ready() {
            task.cancel = None;
        }
    }
}

#[async_trait]
impl TranscriptionWorker for ProcessWorker {
    async fn submit(&self, request: TranscriptionRequest) -> RecorderResult<String> {
        let task_id = Uuid::new_v4().to_string();
        let results_dir = request.directory.join(TRANSCRIPTIONS_DIR);
        tokio::fs::create_dir_all(&results_dir).await?;

        let args = self.command_args(&request, &results_dir);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        lock_tasks(&self.tasks).insert(
            task_id.clone(),
            ProcessTask {
                state: TaskState::Pending,
                results_dir: results_dir.clone(),
                cancel: Some(cancel_tx),
            },
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(task_id = %task_id, program = %self.config.program, ?args, "Starting transcription worker");

        let tasks = Arc::clone(&self.tasks);
        let id = task_id.clone();
        tokio::spawn(async move {
            let state = run_process(command, &results_dir, cancel_rx, &tasks, &id).await;
            info!(task_id = %id, ?state, "Transcription worker finished");
            set_state(&tasks, &id, state);
        });

        Ok(task_id)
    }

    /// A ready state is reported once; the task is forgotten after that.
    async fn poll(&self, task_id: &str) -> RecorderResult<TaskPoll> {
        let mut tasks = lock_tasks(&self.tasks);
        let task = tasks
            .get(task_id)
            .ok_or_else(|| RecorderError::Transcription(format!("unknown task {}", task_id)))?;
        let poll = TaskPoll {
            ready: task.state.is_ready(),
            state: task.state,
            results_dir: task.results_dir.clone(),
        };
        if poll.ready {
            tasks.remove(task_id);
        }
        Ok(poll)
    }

    /// Kill the process if it is still running and forget the task.
    async fn abort(&self, task_id: &str) -> RecorderResult<()> {
        let mut task = lock_tasks(&self.tasks)
            .remove(task_id)
            .ok_or_else(|| RecorderError::Transcription(format!("unknown task {}", task_id)))?;
        if let Some(cancel) = task.cancel.take() {
            // The receiver is gone only if the process already exited.
            let _ = cancel.send(());
        }
        Ok(())
    }
}

/// Run the child to completion or cancellation and capture its output.
async fn run_process(
    mut command: Command,
    results_dir: &Path,
    cancel: oneshot::Receiver<()>,
    tasks: &Mutex<HashMap<String, ProcessTask>>,
    task_id: &str,
) -> TaskState {
    let output_file = results_dir.join(TRANSCRIBER_OUTPUT);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(task_id, error = %e, "Failed to start transcription worker");
            if let Err(write_err) = tokio::fs::write(&output_file, e.to_string()).await {
                warn!(task_id, error = %write_err, "Failed to write transcriber output");
            }
            return TaskState::Failure;
        }
    };
    set_state(tasks, task_id, TaskState::Started);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            let _ = err.read_to_end(&mut buf).await;
        }
        buf
    });

    let state = tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => TaskState::Success,
            Ok(status) => {
                warn!(task_id, %status, "Transcription worker exited with failure");
                TaskState::Failure
            }
            Err(e) => {
                error!(task_id, error = %e, "Waiting for transcription worker failed");
                TaskState::Failure
            }
        },
        Ok(()) = cancel => {
            info!(task_id, "Aborting transcription worker");
            if let Err(e) = child.start_kill() {
                warn!(task_id, error = %e, "Failed to signal transcription worker");
            }
            let _ = child.wait().await;
            TaskState::Aborted
        }
    };

    let mut captured = stdout_reader.await.unwrap_or_default();
    captured.extend(stderr_reader.await.unwrap_or_default());
    if let Err(e) = tokio::fs::write(&output_file, captured).await {
        warn!(task_id, error = %e, "Failed to write transcriber output");
    }

    state
}
