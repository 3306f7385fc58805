//! # Recording Registry
//!
//! `RecordingManager` owns every `Recording` known to the process and is the
//! only way to touch one. It combines the chunk store and the lifecycle state
//! behind a single mutex.
//!
//! ## Key Responsibilities:
//! - **Id allocation**: `last_id + 1`, never reused, seeded by the startup scan
//! - **Chunk intake**: validates ids and indices, then defers to the store
//! - **Finalize**: turns `ACTIVE` into a terminal status and writes the
//!   completion record
//! - **Recovery**: rebuilds state from `RECORDINGS/` at startup
//!
//! ## Locking:
//! One coarse `std::sync::Mutex`. Every operation holds it for at most one
//! disk append or one small file write, so async callers can use it directly.
//! Retry loops sleep outside the lock.

use crate::error::{RecorderError, RecorderResult};
use crate::recording::completion::{CompletionRecord, COMPLETION_LOG};
use crate::recording::model::{Recording, RecordingStatus, RecordingSummary};
use crate::recording::naming;
use crate::recording::rename;
use crate::recording::store::{self, AddChunkOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Directory under the media root that holds one subdirectory per recording.
pub const RECORDINGS_DIR: &str = "RECORDINGS";

/// Most missing indices one finalize attempt reports. A client claiming far
/// more chunks than it sent gets the lowest ones re-requested each attempt.
pub const MAX_RESEND_REQUESTS: usize = 64;

/// Result of one finalize attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// The recording is in a terminal state (now or already).
    Finalized(RecordingSummary),
    /// Some of the declared chunks have not arrived yet.
    Incomplete { missing: Vec<u64> },
}

/// Where a recording lives on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingLocation {
    pub directory: PathBuf,
    pub file_path: PathBuf,
    pub status: RecordingStatus,
}

struct ManagerInner {
    recordings: HashMap<u64, Recording>,
    last_id: u64,
    recordings_dir: PathBuf,
}

/// Process-wide owner of all recordings.
pub struct RecordingManager {
    inner: Mutex<ManagerInner>,
}

impl RecordingManager {
    /// Open (creating if needed) `{media_root}/RECORDINGS` and recover what is there.
    pub fn open(media_root: &Path) -> RecorderResult<Self> {
        let recordings_dir = media_root.join(RECORDINGS_DIR);
        std::fs::create_dir_all(&recordings_dir)?;

        let (recordings, last_id) = scan(&recordings_dir)?;
        info!(
            recovered = recordings.len(),
            last_id,
            dir = %recordings_dir.display(),
            "Recording registry opened"
        );

        Ok(Self {
            inner: Mutex::new(ManagerInner {
                recordings,
                last_id,
                recordings_dir,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.lock().recordings_dir.clone()
    }

    pub fn last_id(&self) -> u64 {
        self.lock().last_id
    }

    /// Register a new `ACTIVE` recording and create its directory.
    pub fn start(&self, title: &str) -> RecorderResult<u64> {
        let mut inner = self.lock();
        let id = inner.last_id + 1;
        if inner.recordings.contains_key(&id) {
            return Err(RecorderError::DuplicateRecordingId(id));
        }

        let directory = inner.recordings_dir.join(naming::directory_name(id, title));
        std::fs::create_dir_all(&directory)?;
        let file_path = directory.join(naming::audio_file_name(title));

        inner.last_id = id;
        inner
            .recordings
            .insert(id, Recording::new(id, title.to_string(), directory.clone(), file_path));

        info!(recording_id = id, title, dir = %directory.display(), "Recording started");
        Ok(id)
    }

    /// Store one chunk. `index` must be non-negative.
    pub fn add_chunk(&self, id: u64, index: i64, payload: Vec<u8>) -> RecorderResult<AddChunkOutcome> {
        let index = u64::try_from(index).map_err(|_| RecorderError::InvalidIndex(index.to_string()))?;

        let mut inner = self.lock();
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;

        let outcome = store::add_chunk(recording, index, payload)?;
        if outcome.status == store::ChunkStatus::AlreadyProcessed {
            debug!(recording_id = id, chunk_index = index, "Chunk already processed");
        }
        Ok(outcome)
    }

    /// One finalize attempt.
    ///
    /// With `expected_chunks = Some(n)` every index in `0..n` must be present,
    /// otherwise the lowest missing indices (up to [`MAX_RESEND_REQUESTS`]) are
    /// returned and nothing changes. With
    /// `None` (connection lost) it always succeeds: `INTERRUPTED_VERIFIED` if
    /// what arrived is contiguous from 0, `DATA_LOSS` otherwise.
    ///
    /// Already-terminal recordings return their recorded status unchanged.
    pub fn finalize(&self, id: u64, expected_chunks: Option<u32>) -> RecorderResult<FinalizeOutcome> {
        let mut inner = self.lock();
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;

        if recording.status.is_terminal() {
            return Ok(FinalizeOutcome::Finalized(recording.summary()));
        }

        let status = match expected_chunks {
            Some(expected) => {
                store::assemble(recording)?;
                let missing = store::missing_indices(recording, u64::from(expected), MAX_RESEND_REQUESTS);
                if !missing.is_empty() {
                    debug!(recording_id = id, ?missing, "Finalize blocked on missing chunks");
                    return Ok(FinalizeOutcome::Incomplete { missing });
                }
                RecordingStatus::Verified
            }
            None => {
                if let Err(e) = store::assemble(recording) {
                    error!(recording_id = id, error = %e, "Assembly failed while finalizing after disconnect");
                }
                if store::is_contiguous(recording) {
                    RecordingStatus::InterruptedVerified
                } else {
                    RecordingStatus::DataLoss
                }
            }
        };

        Ok(FinalizeOutcome::Finalized(complete(recording, status)))
    }

    /// Give up on an active recording. No-op for terminal ones.
    pub fn mark_data_loss(&self, id: u64) -> RecorderResult<RecordingSummary> {
        let mut inner = self.lock();
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;

        if recording.status.is_terminal() {
            return Ok(recording.summary());
        }
        Ok(complete(recording, RecordingStatus::DataLoss))
    }

    pub fn mark_transcription_started(&self, id: u64) -> RecorderResult<()> {
        self.update_transcription_time(id, |recording, now| {
            recording.transcription_started_at = Some(now);
            recording.transcription_finished_at = None;
        })
    }

    pub fn mark_transcription_finished(&self, id: u64) -> RecorderResult<()> {
        self.update_transcription_time(id, |recording, now| {
            recording.transcription_finished_at = Some(now);
        })
    }

    fn update_transcription_time(
        &self,
        id: u64,
        apply: impl FnOnce(&mut Recording, DateTime<Utc>),
    ) -> RecorderResult<()> {
        let mut inner = self.lock();
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;

        apply(recording, Utc::now());
        if recording.status.is_terminal() {
            persist_completion(recording);
        }
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<RecordingSummary> {
        self.lock().recordings.get(&id).map(Recording::summary)
    }

    pub fn locate(&self, id: u64) -> RecorderResult<RecordingLocation> {
        let inner = self.lock();
        let recording = inner
            .recordings
            .get(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;
        Ok(RecordingLocation {
            directory: recording.directory.clone(),
            file_path: recording.file_path.clone(),
            status: recording.status,
        })
    }

    /// Every known recording, sorted by id.
    pub fn list(&self) -> Vec<RecordingSummary> {
        let inner = self.lock();
        let mut summaries: Vec<_> = inner.recordings.values().map(Recording::summary).collect();
        summaries.sort_by_key(|s| s.recording_id);
        summaries
    }

    /// Number of recordings in each status.
    pub fn status_counts(&self) -> HashMap<RecordingStatus, usize> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for recording in inner.recordings.values() {
            *counts.entry(recording.status).or_insert(0) += 1;
        }
        counts
    }

    /// Retitle a finished recording and move its files to match.
    pub fn rename_recording(&self, id: u64, new_title: &str) -> RecorderResult<RecordingSummary> {
        let safe = naming::sanitize_title(new_title)
            .ok_or_else(|| RecorderError::InvalidTitle(new_title.to_string()))?;

        let mut inner = self.lock();
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or(RecorderError::UnknownRecording(id))?;
        if recording.is_active() {
            return Err(RecorderError::RecordingActive(id));
        }

        let renamed = rename::rename_artifacts(
            &recording.directory,
            &recording.file_path,
            &naming::directory_name(id, new_title),
            &safe,
        )?;

        info!(
            recording_id = id,
            old_title = %recording.title,
            new_title,
            "Recording renamed"
        );
        recording.title = new_title.to_string();
        recording.directory = renamed.directory;
        recording.file_path = renamed.file_path;
        Ok(recording.summary())
    }
}

/// Apply a terminal status, drop buffered payloads and write the record.
fn complete(recording: &mut Recording, status: RecordingStatus) -> RecordingSummary {
    recording.status = status;
    recording.completed_at = Some(Utc::now());
    recording.chunks.clear();
    persist_completion(recording);
    info!(recording_id = recording.id, status = %status, "Recording finalized");
    recording.summary()
}

/// Failures are logged; the in-memory status stays authoritative for this run.
fn persist_completion(recording: &Recording) {
    let record = CompletionRecord {
        recording_id: recording.id,
        status: recording.status,
        completed_at: recording.completed_at.unwrap_or_else(Utc::now),
        transcription_started_at: recording.transcription_started_at,
        transcription_finished_at: recording.transcription_finished_at,
    };
    if let Err(e) = record.write_to(&recording.directory) {
        error!(
            recording_id = recording.id,
            error = %e,
            "Failed to write completion record"
        );
    }
}

/// Rebuild the registry from `recordings_dir`.
///
/// One bad directory never aborts the scan; it is logged and skipped.
pub fn scan(recordings_dir: &Path) -> RecorderResult<(HashMap<u64, Recording>, u64)> {
    let mut recordings = HashMap::new();
    let mut last_id = 0;

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(recordings_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let Some(dir_name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some((dir_id, title)) = naming::parse_directory_name(&dir_name) else {
            warn!(dir = %dir.display(), "Skipping directory without a recording id prefix");
            continue;
        };
        last_id = last_id.max(dir_id);

        let record = match CompletionRecord::read_from(&dir) {
            Ok(record) => record,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping recording with unreadable completion record");
                continue;
            }
        };
        let audio = find_audio_file(&dir);

        let recording = match (record, audio) {
            (Some(record), Some(audio)) => {
                last_id = last_id.max(record.recording_id);
                let mut recording = recovered(record.recording_id, &title, &dir, audio, record.status);
                recording.completed_at = Some(record.completed_at);
                recording.transcription_started_at = record.transcription_started_at;
                recording.transcription_finished_at = record.transcription_finished_at;
                recording
            }
            (None, Some(audio)) => {
                warn!(recording_id = dir_id, "Recording has no completion record; server stopped mid-recording");
                let mut recording =
                    recovered(dir_id, &title, &dir, audio, RecordingStatus::InterruptedNotVerified);
                recording.completed_at = Some(Utc::now());
                persist_completion(&recording);
                recording
            }
            (Some(_), None) => {
                warn!(dir = %dir.display(), "Completion record without audio file; cleaning up");
                if let Err(e) = std::fs::remove_file(dir.join(COMPLETION_LOG)) {
                    error!(dir = %dir.display(), error = %e, "Failed to remove orphaned completion record");
                }
                remove_if_empty(&dir);
                continue;
            }
            (None, None) => {
                remove_if_empty(&dir);
                continue;
            }
        };

        if recordings.contains_key(&recording.id) {
            warn!(recording_id = recording.id, dir = %dir.display(), "Duplicate recording id on disk; skipping");
            continue;
        }
        recordings.insert(recording.id, recording);
    }

    Ok((recordings, last_id))
}

fn recovered(id: u64, title: &str, dir: &Path, audio: PathBuf, status: RecordingStatus) -> Recording {
    let mut recording = Recording::new(id, title.replace('_', " "), dir.to_path_buf(), audio);
    recording.status = status;
    if let Ok(modified) = std::fs::metadata(dir).and_then(|m| m.modified()) {
        recording.created_at = DateTime::<Utc>::from(modified);
    }
    recording
}

/// First `*.wav` in the directory, by name.
fn find_audio_file(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == naming::AUDIO_EXTENSION)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn remove_if_empty(dir: &Path) {
    // remove_dir refuses non-empty directories, which is exactly what we want.
    match std::fs::remove_dir(dir) {
        Ok(()) => debug!(dir = %dir.display(), "Removed empty recording directory"),
        Err(e) => debug!(dir = %dir.display(), error = %e, "Left recording directory in place"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::store::ChunkStatus;
    use tempfile::TempDir;

    fn manager() -> (TempDir, RecordingManager) {
        let root = TempDir::new().unwrap();
        let manager = RecordingManager::open(root.path()).unwrap();
        (root, manager)
    }

    fn send(manager: &RecordingManager, id: u64, indices: &[i64]) {
        for &index in indices {
            manager.add_chunk(id, index, vec![index as u8; 4]).unwrap();
        }
    }

    #[test]
    fn test_start_allocates_ids_and_directories() {
        let (root, manager) = manager();

        assert_eq!(manager.start("Take 1").unwrap(), 1);
        assert_eq!(manager.start("Take 2").unwrap(), 2);
        assert!(root.path().join("RECORDINGS/1_Take_1").is_dir());

        let summary = manager.get(1).unwrap();
        assert_eq!(summary.completion_status, RecordingStatus::Active);
        assert!(summary.path.ends_with("1_Take_1/Take_1.wav"));
    }

    #[test]
    fn test_add_chunk_validation() {
        let (_root, manager) = manager();
        let id = manager.start("x").unwrap();

        assert!(matches!(
            manager.add_chunk(id, -1, vec![]),
            Err(RecorderError::InvalidIndex(_))
        ));
        assert!(matches!(
            manager.add_chunk(99, 0, vec![]),
            Err(RecorderError::UnknownRecording(99))
        ));
        assert_eq!(manager.add_chunk(id, 0, vec![1]).unwrap().status, ChunkStatus::Applied);
    }

    #[test]
    fn test_finalize_waits_for_missing_chunk_then_verifies() {
        let (root, manager) = manager();
        let id = manager.start("Take 1").unwrap();
        send(&manager, id, &[0, 1, 2, 4]);

        assert_eq!(
            manager.finalize(id, Some(5)).unwrap(),
            FinalizeOutcome::Incomplete { missing: vec![3] }
        );

        send(&manager, id, &[3]);
        let FinalizeOutcome::Finalized(summary) = manager.finalize(id, Some(5)).unwrap() else {
            panic!("expected finalized recording");
        };
        assert_eq!(summary.completion_status, RecordingStatus::Verified);
        assert_eq!(summary.size, 20);

        let record = CompletionRecord::read_from(&root.path().join("RECORDINGS/1_Take_1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordingStatus::Verified);
    }

    #[test]
    fn test_finalize_with_huge_total_reports_bounded_gaps() {
        let (_root, manager) = manager();
        let id = manager.start("short").unwrap();
        send(&manager, id, &[0]);

        let FinalizeOutcome::Incomplete { missing } = manager.finalize(id, Some(u32::MAX)).unwrap() else {
            panic!("expected incomplete recording");
        };
        assert_eq!(missing.len(), MAX_RESEND_REQUESTS);
        assert_eq!(missing[0], 1);
        assert_eq!(*missing.last().unwrap(), MAX_RESEND_REQUESTS as u64);

        // The registry is still usable by other sessions.
        let other = manager.start("other").unwrap();
        assert_eq!(manager.add_chunk(other, 0, vec![1]).unwrap().status, ChunkStatus::Applied);
        assert_eq!(manager.get(id).unwrap().completion_status, RecordingStatus::Active);
    }

    #[test]
    fn test_disconnect_finalize_statuses() {
        let (_root, manager) = manager();

        let contiguous = manager.start("a").unwrap();
        send(&manager, contiguous, &[0, 1]);
        let gapped = manager.start("b").unwrap();
        send(&manager, gapped, &[0, 1, 3]);
        let empty = manager.start("c").unwrap();

        let status_of = |id| match manager.finalize(id, None).unwrap() {
            FinalizeOutcome::Finalized(summary) => summary.completion_status,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(status_of(contiguous), RecordingStatus::InterruptedVerified);
        assert_eq!(status_of(gapped), RecordingStatus::DataLoss);
        assert_eq!(status_of(empty), RecordingStatus::InterruptedVerified);
    }

    #[test]
    fn test_terminal_recordings_ignore_chunks_and_refinalize() {
        let (_root, manager) = manager();
        let id = manager.start("x").unwrap();
        send(&manager, id, &[0]);
        manager.mark_data_loss(id).unwrap();

        assert_eq!(
            manager.add_chunk(id, 1, vec![1]).unwrap().status,
            ChunkStatus::AlreadyProcessed
        );
        let FinalizeOutcome::Finalized(summary) = manager.finalize(id, Some(1)).unwrap() else {
            panic!("terminal finalize must not be incomplete");
        };
        assert_eq!(summary.completion_status, RecordingStatus::DataLoss);
    }

    #[test]
    fn test_scan_recovers_all_four_cases() {
        let root = TempDir::new().unwrap();
        let recordings = root.path().join(RECORDINGS_DIR);

        // (a) audio + record
        let done = recordings.join("2_done");
        std::fs::create_dir_all(&done).unwrap();
        std::fs::write(done.join("done.wav"), b"abc").unwrap();
        CompletionRecord::new(2, RecordingStatus::Verified, Utc::now())
            .write_to(&done)
            .unwrap();

        // (b) audio only
        let crashed = recordings.join("5_crashed");
        std::fs::create_dir_all(&crashed).unwrap();
        std::fs::write(crashed.join("crashed.wav"), b"abc").unwrap();

        // (c) record only
        let orphan = recordings.join("7_orphan");
        std::fs::create_dir_all(&orphan).unwrap();
        CompletionRecord::new(7, RecordingStatus::Verified, Utc::now())
            .write_to(&orphan)
            .unwrap();

        // (d) nothing
        let empty = recordings.join("3_empty");
        std::fs::create_dir_all(&empty).unwrap();

        let manager = RecordingManager::open(root.path()).unwrap();

        assert_eq!(manager.get(2).unwrap().completion_status, RecordingStatus::Verified);
        assert_eq!(
            manager.get(5).unwrap().completion_status,
            RecordingStatus::InterruptedNotVerified
        );
        assert!(manager.get(7).is_none());
        assert!(!orphan.exists());
        assert!(!empty.exists());
        assert_eq!(manager.last_id(), 7);
        assert_eq!(manager.start("next").unwrap(), 8);
    }

    #[test]
    fn test_scan_skips_malformed_record_but_reserves_id() {
        let root = TempDir::new().unwrap();
        let bad = root.path().join(RECORDINGS_DIR).join("4_bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("bad.wav"), b"abc").unwrap();
        std::fs::write(bad.join(COMPLETION_LOG), "not a record").unwrap();

        let manager = RecordingManager::open(root.path()).unwrap();
        assert!(manager.get(4).is_none());
        assert_eq!(manager.start("fresh").unwrap(), 5);
    }

    #[test]
    fn test_rename_requires_terminal_recording() {
        let (root, manager) = manager();
        let id = manager.start("Take 1").unwrap();
        send(&manager, id, &[0]);

        assert!(matches!(
            manager.rename_recording(id, "Interview"),
            Err(RecorderError::RecordingActive(_))
        ));

        manager.finalize(id, Some(1)).unwrap();
        assert!(matches!(
            manager.rename_recording(id, "../escape"),
            Err(RecorderError::InvalidTitle(_))
        ));

        let summary = manager.rename_recording(id, "Interview").unwrap();
        assert_eq!(summary.title, "Interview");
        assert!(root.path().join("RECORDINGS/1_Interview/Interview.wav").is_file());
        assert!(root.path().join("RECORDINGS/1_Interview").join(COMPLETION_LOG).is_file());
    }

    #[test]
    fn test_transcription_times_are_persisted() {
        let (root, manager) = manager();
        let id = manager.start("t").unwrap();
        send(&manager, id, &[0]);
        manager.finalize(id, Some(1)).unwrap();

        manager.mark_transcription_started(id).unwrap();
        manager.mark_transcription_finished(id).unwrap();

        let record = CompletionRecord::read_from(&root.path().join("RECORDINGS/1_t"))
            .unwrap()
            .unwrap();
        assert!(record.transcription_started_at.is_some());
        assert!(record.transcription_finished_at.is_some());
    }
}
