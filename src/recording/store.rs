//! # Chunk Store
//!
//! Buffers out-of-order chunks of one recording and appends them to disk in
//! strict index order ("flush-gap" assembly).
//!
//! ## Assembly:
//! 1. Nothing written yet: if chunk 0 is here, it becomes the whole file
//!    (create/truncate); otherwise ask for chunk 0 and stop.
//! 2. While `flushed_index + 1` is buffered, append it and release its payload.
//! 3. If chunks beyond the gap are waiting, ask for `flushed_index + 1`.
//!
//! Only the lowest missing index is ever requested per attempt. Memory use is
//! bounded by the size of the gap, not by the recording length, and the file
//! is only ever appended to.
//!
//! This module does no locking; callers go through
//! [`RecordingManager`](crate::recording::registry::RecordingManager).

use crate::error::RecorderResult;
use crate::recording::model::{Chunk, Recording};
use std::fs::{File, OpenOptions};
use std::io::Write;
use tracing::debug;

/// What `add_chunk` did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Stored for the first time; the client should get an ack.
    Applied,
    /// Duplicate index, or the recording is no longer active. Nothing changed.
    AlreadyProcessed,
}

/// Result of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddChunkOutcome {
    pub status: ChunkStatus,
    /// Index the client should re-send, if assembly is blocked on a gap.
    pub request_chunk: Option<u64>,
}

impl AddChunkOutcome {
    fn already_processed() -> Self {
        Self {
            status: ChunkStatus::AlreadyProcessed,
            request_chunk: None,
        }
    }
}

/// Store a chunk and assemble as much of the file as possible.
///
/// Idempotent: a second delivery of the same index, or any delivery after the
/// recording left `ACTIVE`, is an `AlreadyProcessed` no-op. The exception is a
/// chunk whose append failed: it is still pending at the head of the file, so
/// a resend retries the append and is `Applied` once it lands.
pub fn add_chunk(
    recording: &mut Recording,
    index: u64,
    payload: Vec<u8>,
) -> RecorderResult<AddChunkOutcome> {
    if !recording.is_active() {
        return Ok(AddChunkOutcome::already_processed());
    }

    match recording.chunks.get(&index) {
        Some(chunk) if chunk.is_flushed() || index != next_flush_index(recording) => {
            return Ok(AddChunkOutcome::already_processed());
        }
        Some(_) => debug!(recording_id = recording.id, chunk_index = index, "Retrying failed append"),
        None => {
            recording.chunks.insert(index, Chunk::new(index, payload));
        }
    }

    let request_chunk = assemble(recording)?;

    Ok(AddChunkOutcome {
        status: ChunkStatus::Applied,
        request_chunk,
    })
}

/// Flush every contiguous chunk after `flushed_index`.
///
/// Returns the index to request from the client when assembly is blocked,
/// `None` when everything buffered has been written.
pub fn assemble(recording: &mut Recording) -> RecorderResult<Option<u64>> {
    let mut next = next_flush_index(recording);

    while let Some(chunk) = recording.chunks.get_mut(&next) {
        let Some(bytes) = chunk.release() else {
            // Already on disk; the flushed index is behind the map. Skip over it.
            recording.flushed_index = Some(next);
            next += 1;
            continue;
        };

        let write_result = if next == 0 {
            File::create(&recording.file_path).and_then(|mut f| f.write_all(&bytes))
        } else {
            OpenOptions::new()
                .append(true)
                .open(&recording.file_path)
                .and_then(|mut f| f.write_all(&bytes))
        };

        if let Err(err) = write_result {
            // Keep the payload so a later attempt can retry the same append.
            if let Some(chunk) = recording.chunks.get_mut(&next) {
                chunk.payload = crate::recording::model::ChunkPayload::Pending(bytes);
            }
            return Err(err.into());
        }

        debug!(recording_id = recording.id, chunk_index = next, "Chunk appended");
        recording.flushed_index = Some(next);
        next += 1;
    }

    let waiting_beyond_gap = recording
        .chunks
        .keys()
        .next_back()
        .is_some_and(|&last| last > next);

    if recording.flushed_index.is_none() || waiting_beyond_gap {
        Ok(Some(next))
    } else {
        Ok(None)
    }
}

/// The index the file is waiting for.
fn next_flush_index(recording: &Recording) -> u64 {
    recording.flushed_index.map_or(0, |flushed| flushed + 1)
}

/// The lowest indices in `0..expected` that have not been received, at most
/// `limit` of them.
///
/// Walks the gaps between received keys, so the cost follows the number of
/// chunks held and `limit`, never the size of `expected`.
pub fn missing_indices(recording: &Recording, expected: u64, limit: usize) -> Vec<u64> {
    let mut missing = Vec::new();
    let mut next = 0;
    let bounds = recording
        .chunks
        .range(..expected)
        .map(|(&index, _)| index)
        .chain(std::iter::once(expected));

    for bound in bounds {
        while next < bound {
            if missing.len() == limit {
                return missing;
            }
            missing.push(next);
            next += 1;
        }
        next = bound + 1;
    }
    missing
}

/// Whether the received chunks form an unbroken run starting at 0.
pub fn is_contiguous(recording: &Recording) -> bool {
    match recording.chunks.keys().next_back() {
        Some(&last) => last + 1 == recording.chunks.len() as u64,
        None => true,
    }
}
