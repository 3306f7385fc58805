//! # Completion Record
//!
//! `completion_log.txt` is written next to the audio file whenever a recording
//! reaches a terminal state, and rewritten when transcription starts or ends.
//! It is the only thing that survives a restart, so the startup scan trusts it
//! over everything else.
//!
//! ## Format:
//! ```text
//! Recording ID: 1
//! Status: VERIFIED
//! Completion time: 2026-10-19T09:30:00+00:00
//! Transcription start time: 2026-10-19T09:31:00+00:00
//! Transcription end time: 2026-10-19T09:35:12+00:00
//! ```
//! The two transcription lines are optional. Unknown keys are ignored.

use crate::error::{RecorderError, RecorderResult};
use crate::recording::model::RecordingStatus;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File name of the record inside a recording directory.
pub const COMPLETION_LOG: &str = "completion_log.txt";

const KEY_ID: &str = "Recording ID";
const KEY_STATUS: &str = "Status";
const KEY_COMPLETED: &str = "Completion time";
const KEY_TRANSCRIPTION_START: &str = "Transcription start time";
const KEY_TRANSCRIPTION_END: &str = "Transcription end time";

/// Durable marker of a recording's terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub recording_id: u64,
    pub status: RecordingStatus,
    pub completed_at: DateTime<Utc>,
    pub transcription_started_at: Option<DateTime<Utc>>,
    pub transcription_finished_at: Option<DateTime<Utc>>,
}

impl CompletionRecord {
    pub fn new(recording_id: u64, status: RecordingStatus, completed_at: DateTime<Utc>) -> Self {
        Self {
            recording_id,
            status,
            completed_at,
            transcription_started_at: None,
            transcription_finished_at: None,
        }
    }

    /// Render as `key: value` lines.
    pub fn to_text(&self) -> String {
        let mut text = format!(
            "{}: {}\n{}: {}\n{}: {}\n",
            KEY_ID,
            self.recording_id,
            KEY_STATUS,
            self.status.as_code(),
            KEY_COMPLETED,
            self.completed_at.to_rfc3339()
        );
        if let Some(started) = self.transcription_started_at {
            text.push_str(&format!("{}: {}\n", KEY_TRANSCRIPTION_START, started.to_rfc3339()));
        }
        if let Some(finished) = self.transcription_finished_at {
            text.push_str(&format!("{}: {}\n", KEY_TRANSCRIPTION_END, finished.to_rfc3339()));
        }
        text
    }

    /// Parse the text form. `path` is only used for error messages.
    pub fn parse(text: &str, path: &Path) -> RecorderResult<Self> {
        let malformed = |reason: String| RecorderError::MalformedCompletionRecord {
            path: path.to_path_buf(),
            reason,
        };
        let timestamp = |key: &str, value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| malformed(format!("{}: {}", key, e)))
        };

        let mut recording_id = None;
        let mut status = None;
        let mut completed_at = None;
        let mut transcription_started_at = None;
        let mut transcription_finished_at = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((key, value)) = line.split_once(':') else {
                return Err(malformed(format!("line without separator: {:?}", line)));
            };
            let value = value.trim();
            match key.trim() {
                KEY_ID => {
                    recording_id = Some(
                        value
                            .parse::<u64>()
                            .map_err(|e| malformed(format!("{}: {}", KEY_ID, e)))?,
                    )
                }
                KEY_STATUS => status = Some(value.parse::<RecordingStatus>().map_err(malformed)?),
                KEY_COMPLETED => completed_at = Some(timestamp(KEY_COMPLETED, value)?),
                KEY_TRANSCRIPTION_START => {
                    transcription_started_at = Some(timestamp(KEY_TRANSCRIPTION_START, value)?)
                }
                KEY_TRANSCRIPTION_END => {
                    transcription_finished_at = Some(timestamp(KEY_TRANSCRIPTION_END, value)?)
                }
                _ => {}
            }
        }

        let status = status.ok_or_else(|| malformed(format!("missing {}", KEY_STATUS)))?;
        if !status.is_terminal() {
            return Err(malformed(format!("non-terminal status {}", status)));
        }

        Ok(Self {
            recording_id: recording_id.ok_or_else(|| malformed(format!("missing {}", KEY_ID)))?,
            status,
            completed_at: completed_at
                .ok_or_else(|| malformed(format!("missing {}", KEY_COMPLETED)))?,
            transcription_started_at,
            transcription_finished_at,
        })
    }

    /// Write to `{dir}/completion_log.txt` and sync before returning.
    pub fn write_to(&self, dir: &Path) -> RecorderResult<()> {
        let mut file = File::create(dir.join(COMPLETION_LOG))?;
        file.write_all(self.to_text().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read `{dir}/completion_log.txt`. `Ok(None)` if the file does not exist.
    pub fn read_from(dir: &Path) -> RecorderResult<Option<Self>> {
        let path = dir.join(COMPLETION_LOG);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> CompletionRecord {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();
        CompletionRecord::new(3, RecordingStatus::DataLoss, at)
    }

    #[test]
    fn test_text_layout() {
        let text = sample().to_text();
        assert!(text.starts_with("Recording ID: 3\nStatus: DATA_LOSS\nCompletion time: 2026-10-19T09:30:00"));
        assert!(!text.contains("Transcription"));
    }

    #[test]
    fn test_write_and_read_back_with_transcription_times() {
        let dir = TempDir::new().unwrap();
        let mut record = sample();
        record.transcription_started_at = Some(Utc.with_ymd_and_hms(2026, 10, 19, 9, 31, 0).unwrap());
        record.write_to(dir.path()).unwrap();

        let read = CompletionRecord::read_from(dir.path()).unwrap().unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(CompletionRecord::read_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        let path = Path::new("completion_log.txt");
        let cases = [
            "garbage",
            "Recording ID: x\nStatus: VERIFIED\nCompletion time: 2026-10-19T09:30:00Z",
            "Recording ID: 1\nStatus: FINISHED\nCompletion time: 2026-10-19T09:30:00Z",
            "Recording ID: 1\nStatus: ACTIVE\nCompletion time: 2026-10-19T09:30:00Z",
            "Recording ID: 1\nStatus: VERIFIED",
        ];
        for text in cases {
            let err = CompletionRecord::parse(text, path).unwrap_err();
            assert!(
                matches!(err, RecorderError::MalformedCompletionRecord { .. }),
                "{:?} gave {:?}",
                text,
                err
            );
        }
    }
}
