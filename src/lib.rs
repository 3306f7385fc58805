//! # Dictaphone Server
//!
//! Receives audio recordings streamed as numbered chunks over a WebSocket,
//! reassembles them on disk in order, and verifies completeness when the
//! client stops. Finished recordings can be handed to an external
//! transcription worker.
//!
//! ## Application Architecture:
//! - **recording**: registry, ordered assembly, completion records, renames
//! - **session**: per-connection protocol state and the finalize job
//! - **protocol**: control messages and the binary chunk frame
//! - **websocket**: the actor that ties a connection to a session
//! - **transcription**: external worker contract and the completion monitor
//! - **bus**: broadcast groups for completion events
//! - **config / state / error / health / handlers**: the HTTP service around it

pub mod bus;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod protocol;
pub mod recording;
pub mod session;
pub mod state;
pub mod transcription;
pub mod websocket;
