//! # Broadcast Groups
//!
//! Named topics that sessions subscribe to and background jobs publish to.
//!
//! ```text
//!   finalize job ─┐                      ┌──► session A (connected)
//!                 ├──► GroupBus::publish ┼──► session B (reconnected)
//!   monitor job  ─┘      (topic)         └──► ... later subscribers
//! ```
//!
//! A job's outcome therefore does not depend on the connection that started
//! it still being open. Each topic is a `tokio::sync::broadcast` channel,
//! created lazily on first use and kept for the life of the process.

use crate::recording::model::RecordingSummary;
use crate::transcription::worker::{ResultFile, TaskState};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Topic every session joins on connect.
pub const RECORDING_EVENTS: &str = "recording_events";

/// Something every listening client should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    RecordingComplete(RecordingSummary),
    TranscriptionCompleted {
        task_id: String,
        recording_id: u64,
        state: TaskState,
        results: Vec<ResultFile>,
    },
}

pub struct GroupBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<GroupEvent>>>,
}

impl GroupBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<GroupEvent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<GroupEvent> {
        self.topics()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Join a topic. Only events published after this call are received.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<GroupEvent> {
        self.sender(topic).subscribe()
    }

    /// Publish to everyone currently subscribed. Returns how many received it.
    pub fn publish(&self, topic: &str, event: GroupEvent) -> usize {
        match self.sender(topic).send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(topic, "Broadcast with no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64) -> GroupEvent {
        GroupEvent::TranscriptionCompleted {
            task_id: format!("t{}", id),
            recording_id: id,
            state: TaskState::Success,
            results: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = GroupBus::new(8);
        let mut a = bus.subscribe(RECORDING_EVENTS);
        let mut b = bus.subscribe(RECORDING_EVENTS);

        assert_eq!(bus.publish(RECORDING_EVENTS, event(1)), 2);
        assert_eq!(a.recv().await.unwrap(), event(1));
        assert_eq!(b.recv().await.unwrap(), event(1));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = GroupBus::new(8);
        assert_eq!(bus.publish(RECORDING_EVENTS, event(1)), 0);

        // Late subscribers only see what comes after them.
        let mut late = bus.subscribe(RECORDING_EVENTS);
        bus.publish(RECORDING_EVENTS, event(2));
        assert_eq!(late.recv().await.unwrap(), event(2));
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = GroupBus::new(8);
        let _rx = bus.subscribe("a");
        assert_eq!(bus.subscriber_count("a"), 1);
        assert_eq!(bus.subscriber_count("b"), 0);
        assert_eq!(bus.publish("b", event(1)), 0);
    }
}
