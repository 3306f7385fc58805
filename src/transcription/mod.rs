//! # Transcription Module
//!
//! Hands finished recordings to an external speech-to-text worker and tells
//! clients when the results are ready. No transcription happens in-process.
//!
//! ## Key Components:
//! - **Worker contract** (`worker`): submit / poll / abort, plus the
//!   child-process implementation used in production
//! - **Task bridge** (`bridge`): task bookkeeping and the self-stopping
//!   completion monitor

pub mod bridge;
pub mod worker;

pub use bridge::{StartedTask, TranscriptionBridge};
pub use worker::{ProcessWorker, TaskState, TranscriptionWorker};
