//! # Recording Data Model
//!
//! The types shared by the chunk store, the registry and the wire protocol.
//!
//! ## Lifecycle:
//! `ACTIVE → VERIFIED | INTERRUPTED_VERIFIED | DATA_LOSS | INTERRUPTED_NOT_VERIFIED`
//!
//! `ACTIVE` is the only state that accepts chunks. Once a recording leaves it
//! the status never changes again; late chunks are answered with
//! `AlreadyProcessed` rather than an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle state of a recording.
///
/// The serialized form is the wire/disk code (`"VERIFIED"`, `"DATA_LOSS"`, ...),
/// used both in `completion_log.txt` and in `completionStatus` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    /// Receiving chunks
    Active,
    /// Client declared a chunk total and every chunk arrived
    Verified,
    /// Connection dropped; everything that did arrive is contiguous
    InterruptedVerified,
    /// Chunks are missing for good
    DataLoss,
    /// Found on disk at startup without a completion record
    InterruptedNotVerified,
}

impl RecordingStatus {
    /// Wire and completion-record code for this status.
    pub fn as_code(&self) -> &'static str {
        match self {
            RecordingStatus::Active => "ACTIVE",
            RecordingStatus::Verified => "VERIFIED",
            RecordingStatus::InterruptedVerified => "INTERRUPTED_VERIFIED",
            RecordingStatus::DataLoss => "DATA_LOSS",
            RecordingStatus::InterruptedNotVerified => "INTERRUPTED_NOT_VERIFIED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordingStatus::Active)
    }

    /// Every status, in lifecycle order.
    pub fn all() -> [RecordingStatus; 5] {
        [
            RecordingStatus::Active,
            RecordingStatus::Verified,
            RecordingStatus::InterruptedVerified,
            RecordingStatus::DataLoss,
            RecordingStatus::InterruptedNotVerified,
        ]
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordingStatus::all()
            .into_iter()
            .find(|status| status.as_code() == s)
            .ok_or_else(|| format!("unknown recording status: {}", s))
    }
}

/// Payload of a buffered chunk. Released once it has been appended to disk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Pending(Vec<u8>),
    Released,
}

/// One fragment of a recording.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub received_at: DateTime<Utc>,
    pub payload: ChunkPayload,
}

impl Chunk {
    pub fn new(index: u64, payload: Vec<u8>) -> Self {
        Self {
            index,
            received_at: Utc::now(),
            payload: ChunkPayload::Pending(payload),
        }
    }

    /// Whether the payload has been written to the audio file.
    pub fn is_flushed(&self) -> bool {
        matches!(self.payload, ChunkPayload::Released)
    }

    /// Take the payload out for writing, leaving `Released` behind.
    pub(crate) fn release(&mut self) -> Option<Vec<u8>> {
        match std::mem::replace(&mut self.payload, ChunkPayload::Released) {
            ChunkPayload::Pending(bytes) => Some(bytes),
            ChunkPayload::Released => None,
        }
    }
}

/// One logical audio capture, backed by one file.
///
/// Owned by [`RecordingManager`](crate::recording::registry::RecordingManager);
/// nothing else holds a mutable reference to it.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: u64,
    pub title: String,
    pub status: RecordingStatus,
    /// `RECORDINGS/{id}_{title}`
    pub directory: PathBuf,
    /// `RECORDINGS/{id}_{title}/{title}.wav`
    pub file_path: PathBuf,
    /// Highest index appended to the file with no gaps below it.
    pub flushed_index: Option<u64>,
    pub chunks: BTreeMap<u64, Chunk>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transcription_started_at: Option<DateTime<Utc>>,
    pub transcription_finished_at: Option<DateTime<Utc>>,
}

impl Recording {
    pub fn new(id: u64, title: String, directory: PathBuf, file_path: PathBuf) -> Self {
        Self {
            id,
            title,
            status: RecordingStatus::Active,
            directory,
            file_path,
            flushed_index: None,
            chunks: BTreeMap::new(),
            created_at: Utc::now(),
            completed_at: None,
            transcription_started_at: None,
            transcription_finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordingStatus::Active
    }

    /// Size of the assembled audio file, 0 if it does not exist yet.
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0)
    }

    /// Client-facing snapshot.
    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            recording_id: self.id,
            title: self.title.clone(),
            completion_status: self.status,
            path: self.file_path.to_string_lossy().into_owned(),
            size: self.file_size(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            transcription_start_time: self.transcription_started_at,
            transcription_end_time: self.transcription_finished_at,
        }
    }
}

/// Snapshot of a recording as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub recording_id: u64,
    pub title: String,
    pub completion_status: RecordingStatus,
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transcription_start_time: Option<DateTime<Utc>>,
    pub transcription_end_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_through_from_str() {
        for status in RecordingStatus::all() {
            assert_eq!(status.as_code().parse::<RecordingStatus>(), Ok(status));
        }
        assert!("FINISHED".parse::<RecordingStatus>().is_err());
    }

    #[test]
    fn test_only_active_is_non_terminal() {
        assert!(!RecordingStatus::Active.is_terminal());
        assert!(RecordingStatus::DataLoss.is_terminal());
        assert!(RecordingStatus::InterruptedNotVerified.is_terminal());
    }

    #[test]
    fn test_serde_uses_wire_codes() {
        let json = serde_json::to_string(&RecordingStatus::InterruptedVerified).unwrap();
        assert_eq!(json, "\"INTERRUPTED_VERIFIED\"");
    }

    #[test]
    fn test_release_frees_payload_once() {
        let mut chunk = Chunk::new(0, vec![1, 2, 3]);
        assert!(!chunk.is_flushed());
        assert_eq!(chunk.release(), Some(vec![1, 2, 3]));
        assert!(chunk.is_flushed());
        assert_eq!(chunk.release(), None);
    }
}
