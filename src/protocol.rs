//! # Wire Protocol
//!
//! Two frame kinds share one WebSocket:
//!
//! - **Text**: JSON control frames from the client
//!   (`{"type":"control_message","message":"start_recording","parameter":"Take 1"}`)
//!   and JSON messages from the server, tagged by `message_type`.
//! - **Binary**: one audio chunk. An 8-byte header of two big-endian `u32`s
//!   (`recording_id`, `chunk_index`) followed by the raw payload.
//!
//! Parsing never panics; anything malformed becomes a `FrameError` that the
//! session logs and answers with an `error` message.

use crate::recording::model::{RecordingStatus, RecordingSummary};
use crate::transcription::worker::{ResultFile, TaskState};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Size of the binary chunk header.
pub const CHUNK_HEADER_LEN: usize = 8;

/// The only accepted value of a control frame's `type` field.
pub const CONTROL_FRAME_TYPE: &str = "control_message";

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("unsupported frame type: {0:?}")]
    UnsupportedType(String),

    #[error("unknown control message: {0:?}")]
    UnknownMessage(String),

    #[error("bad parameter for {message}: {reason}")]
    BadParameter { message: String, reason: String },

    #[error("binary frame of {0} bytes is shorter than the 8-byte header")]
    ShortChunk(usize),
}

impl FrameError {
    /// Stable code for the `error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::InvalidJson(_) => "invalid_json",
            FrameError::UnsupportedType(_) => "unsupported_type",
            FrameError::UnknownMessage(_) => "unknown_message",
            FrameError::BadParameter { .. } => "bad_parameter",
            FrameError::ShortChunk(_) => "short_chunk",
        }
    }
}

/// Raw control frame as it arrives.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    frame_type: Option<String>,
    message: Option<String>,
    #[serde(default)]
    parameter: Value,
}

/// A validated client→server control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    StartRecording { title: String },
    StopRecording { total_chunks: u32 },
    Initialize,
    StartTranscription {
        recording_id: u64,
        model: Option<String>,
        language: Option<String>,
    },
    CancelTranscription { task_id: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTranscriptionParams {
    recording_id: u64,
    model: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelTranscriptionParams {
    task_id: String,
}

impl ControlMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let frame: ControlFrame =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        match frame.frame_type.as_deref() {
            Some(CONTROL_FRAME_TYPE) => {}
            other => return Err(FrameError::UnsupportedType(other.unwrap_or_default().to_string())),
        }

        let message = frame.message.unwrap_or_default();
        let bad = |reason: String| FrameError::BadParameter {
            message: message.clone(),
            reason,
        };

        match message.as_str() {
            "start_recording" => {
                let title = match frame.parameter {
                    Value::String(title) => title,
                    Value::Null => String::new(),
                    other => return Err(bad(format!("expected title string, got {}", other))),
                };
                Ok(ControlMessage::StartRecording { title })
            }
            "stop_recording" => {
                let total_chunks = parse_chunk_total(&frame.parameter).map_err(bad)?;
                Ok(ControlMessage::StopRecording { total_chunks })
            }
            "initialize" => Ok(ControlMessage::Initialize),
            "start_transcription" => {
                let params: StartTranscriptionParams =
                    serde_json::from_value(frame.parameter).map_err(|e| bad(e.to_string()))?;
                Ok(ControlMessage::StartTranscription {
                    recording_id: params.recording_id,
                    model: params.model,
                    language: params.language,
                })
            }
            "cancel_transcription" => {
                let params: CancelTranscriptionParams =
                    serde_json::from_value(frame.parameter).map_err(|e| bad(e.to_string()))?;
                Ok(ControlMessage::CancelTranscription {
                    task_id: params.task_id,
                })
            }
            _ => Err(FrameError::UnknownMessage(message)),
        }
    }
}

/// Browsers often send the total as a string; accept both.
fn parse_chunk_total(value: &Value) -> Result<u32, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("chunk total out of range: {}", n)),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("chunk total {:?}: {}", s, e)),
        other => Err(format!("expected chunk total, got {}", other)),
    }
}

/// One binary audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFrame {
    pub recording_id: u32,
    pub chunk_index: u32,
    pub payload: Vec<u8>,
}

impl ChunkFrame {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < CHUNK_HEADER_LEN {
            return Err(FrameError::ShortChunk(bytes.len()));
        }
        Ok(Self {
            recording_id: BigEndian::read_u32(&bytes[0..4]),
            chunk_index: BigEndian::read_u32(&bytes[4..8]),
            payload: bytes[CHUNK_HEADER_LEN..].to_vec(),
        })
    }

    /// Client-side encoding, used by tests and tooling.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; CHUNK_HEADER_LEN + self.payload.len()];
        BigEndian::write_u32(&mut out[0..4], self.recording_id);
        BigEndian::write_u32(&mut out[4..8], self.chunk_index);
        out[CHUNK_HEADER_LEN..].copy_from_slice(&self.payload);
        out
    }
}

/// Server→client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    AckStartRecording { recording_id: u64 },

    #[serde(rename_all = "camelCase")]
    AckChunk { chunk_index: u64 },

    #[serde(rename_all = "camelCase")]
    RequestChunk { chunk_index: u64 },

    #[serde(rename_all = "camelCase")]
    RecordingComplete {
        recording_id: u64,
        completion_status: RecordingStatus,
        path: String,
        size: u64,
    },

    InitializationData { recordings: Vec<RecordingSummary> },

    #[serde(rename_all = "camelCase")]
    TranscriptionStarted {
        task_id: String,
        recording_id: u64,
        file_size: u64,
    },

    #[serde(rename_all = "camelCase")]
    TranscriptionCompleted {
        task_id: String,
        recording_id: u64,
        state: TaskState,
        results: Vec<ResultFile>,
    },

    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn recording_complete(summary: &RecordingSummary) -> Self {
        ServerMessage::RecordingComplete {
            recording_id: summary.recording_id,
            completion_status: summary.completion_status,
            path: summary.path.clone(),
            size: summary.size,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"message_type":"error","code":"internal","message":"{}"}}"#, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_recording() {
        let msg = ControlMessage::parse(
            r#"{"type":"control_message","message":"start_recording","parameter":"Take 1"}"#,
        )
        .unwrap();
        assert_eq!(msg, ControlMessage::StartRecording { title: "Take 1".into() });

        let untitled =
            ControlMessage::parse(r#"{"type":"control_message","message":"start_recording"}"#).unwrap();
        assert_eq!(untitled, ControlMessage::StartRecording { title: String::new() });
    }

    #[test]
    fn test_stop_recording_accepts_number_or_string() {
        for parameter in [json!(5), json!("5")] {
            let text = json!({"type": "control_message", "message": "stop_recording", "parameter": parameter});
            assert_eq!(
                ControlMessage::parse(&text.to_string()).unwrap(),
                ControlMessage::StopRecording { total_chunks: 5 }
            );
        }
        let negative = json!({"type": "control_message", "message": "stop_recording", "parameter": -1});
        assert!(matches!(
            ControlMessage::parse(&negative.to_string()),
            Err(FrameError::BadParameter { .. })
        ));
    }

    #[test]
    fn test_transcription_messages() {
        let start = json!({
            "type": "control_message",
            "message": "start_transcription",
            "parameter": {"recordingId": 3, "model": "small", "language": "fi"}
        });
        assert_eq!(
            ControlMessage::parse(&start.to_string()).unwrap(),
            ControlMessage::StartTranscription {
                recording_id: 3,
                model: Some("small".into()),
                language: Some("fi".into()),
            }
        );

        let cancel = json!({
            "type": "control_message",
            "message": "cancel_transcription",
            "parameter": {"taskId": "abc"}
        });
        assert_eq!(
            ControlMessage::parse(&cancel.to_string()).unwrap(),
            ControlMessage::CancelTranscription { task_id: "abc".into() }
        );
    }

    #[test]
    fn test_bad_frames() {
        assert_eq!(ControlMessage::parse("{not json").unwrap_err().code(), "invalid_json");
        assert_eq!(
            ControlMessage::parse(r#"{"type":"chat","message":"hi"}"#).unwrap_err(),
            FrameError::UnsupportedType("chat".into())
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"control_message","message":"dance"}"#).unwrap_err(),
            FrameError::UnknownMessage("dance".into())
        );
    }

    #[test]
    fn test_chunk_header_is_big_endian() {
        let frame = ChunkFrame::parse(&[0, 0, 0, 1, 0, 0, 1, 2, 0xAA, 0xBB]).unwrap();
        assert_eq!(frame.recording_id, 1);
        assert_eq!(frame.chunk_index, 258);
        assert_eq!(frame.payload, vec![0xAA, 0xBB]);
        assert_eq!(frame.encode(), vec![0, 0, 0, 1, 0, 0, 1, 2, 0xAA, 0xBB]);

        assert_eq!(ChunkFrame::parse(&[0; 7]), Err(FrameError::ShortChunk(7)));
        assert!(ChunkFrame::parse(&[0; 8]).unwrap().payload.is_empty());
    }

    #[test]
    fn test_server_message_shapes() {
        let ack = serde_json::to_value(ServerMessage::AckChunk { chunk_index: 4 }).unwrap();
        assert_eq!(ack, json!({"message_type": "ack_chunk", "chunkIndex": 4}));

        let complete = serde_json::to_value(ServerMessage::RecordingComplete {
            recording_id: 1,
            completion_status: RecordingStatus::Verified,
            path: "RECORDINGS/1_Take_1/Take_1.wav".into(),
            size: 10,
        })
        .unwrap();
        assert_eq!(complete["message_type"], "recording_complete");
        assert_eq!(complete["completionStatus"], "VERIFIED");
        assert_eq!(complete["recordingId"], 1);
    }
}
