//! # Recording Core
//!
//! Everything that turns a stream of numbered chunks into one audio file with
//! a known completeness status.
//!
//! ## Module Organization:
//! - **`model`**: `Recording`, `Chunk`, `RecordingStatus`
//! - **`naming`**: title → directory/file names
//! - **`store`**: flush-gap assembly of out-of-order chunks
//! - **`completion`**: the on-disk completion record
//! - **`registry`**: `RecordingManager`, lifecycle and startup recovery
//! - **`rename`**: moving artifacts when a title changes

pub mod completion;
pub mod model;
pub mod naming;
pub mod registry;
pub mod rename;
pub mod store;

pub use model::{Recording, RecordingStatus, RecordingSummary};
pub use registry::{FinalizeOutcome, RecordingManager};
pub use store::{AddChunkOutcome, ChunkStatus};
