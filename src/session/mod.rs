//! # Stream Session
//!
//! The per-connection protocol state machine, kept free of any transport so
//! it can be tested on its own. The WebSocket actor owns one `SessionState`
//! and asks it before acting on every frame.
//!
//! ```text
//!  Idle ──start_recording──► Recording ──stop_recording──► Finalizing
//!   ▲                            │                             │
//!   └────────── finalize finished ◄────────────────────────────┘
//!                                │
//!                       transport lost (Recording | Finalizing)
//!                                ▼
//!                   disconnect finalize, result to broadcast group
//! ```

pub mod finalize;

use thiserror::Error;

/// Where a connection is in the recording protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording { recording_id: u64 },
    Finalizing { recording_id: u64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    WrongState {
        action: &'static str,
        state: &'static str,
    },

    #[error("chunk for recording {got} but this session is bound to {bound:?}")]
    ForeignRecording { got: u64, bound: Option<u64> },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording { .. } => "recording",
            SessionState::Finalizing { .. } => "finalizing",
        }
    }

    /// The recording this connection is responsible for, if any.
    pub fn bound_recording(&self) -> Option<u64> {
        match *self {
            SessionState::Idle => None,
            SessionState::Recording { recording_id } | SessionState::Finalizing { recording_id } => {
                Some(recording_id)
            }
        }
    }

    fn wrong(&self, action: &'static str) -> SessionError {
        SessionError::WrongState {
            action,
            state: self.name(),
        }
    }

    /// Check that a new recording may be started.
    pub fn can_start(&self) -> Result<(), SessionError> {
        match self {
            SessionState::Idle => Ok(()),
            _ => Err(self.wrong("start a recording")),
        }
    }

    /// `Idle → Recording`.
    pub fn begin(&mut self, recording_id: u64) -> Result<(), SessionError> {
        self.can_start()?;
        *self = SessionState::Recording { recording_id };
        Ok(())
    }

    /// `Recording → Finalizing`, returning the recording to finalize.
    pub fn stop(&mut self) -> Result<u64, SessionError> {
        match *self {
            SessionState::Recording { recording_id } => {
                *self = SessionState::Finalizing { recording_id };
                Ok(recording_id)
            }
            _ => Err(self.wrong("stop recording")),
        }
    }

    /// `Finalizing → Idle` once the job for `recording_id` reported back.
    /// Reports for any other recording leave the state alone.
    pub fn finished(&mut self, recording_id: u64) -> bool {
        if *self == (SessionState::Finalizing { recording_id }) {
            *self = SessionState::Idle;
            true
        } else {
            false
        }
    }

    /// Binary frames are accepted while recording or finalizing, and only for
    /// the bound recording. Finalizing still needs them for resent chunks.
    pub fn check_chunk(&self, recording_id: u64) -> Result<(), SessionError> {
        match self.bound_recording() {
            Some(bound) if bound == recording_id => Ok(()),
            bound => Err(SessionError::ForeignRecording {
                got: recording_id,
                bound,
            }),
        }
    }

    /// Transport lost. Returns the recording that now needs a disconnect
    /// finalize and resets to `Idle`.
    pub fn disconnect(&mut self) -> Option<u64> {
        let pending = self.bound_recording();
        *self = SessionState::Idle;
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = SessionState::default();
        state.begin(1).unwrap();
        assert_eq!(state, SessionState::Recording { recording_id: 1 });
        assert!(state.check_chunk(1).is_ok());

        assert_eq!(state.stop().unwrap(), 1);
        assert!(state.check_chunk(1).is_ok(), "resends are accepted while finalizing");

        assert!(!state.finished(2));
        assert!(state.finished(1));
        assert_eq!(state, SessionState::Idle);
    }

    #[test]
    fn test_wrong_state_transitions() {
        let mut state = SessionState::Idle;
        assert!(state.stop().is_err());
        assert!(state.check_chunk(1).is_err());

        state.begin(1).unwrap();
        assert_eq!(
            state.begin(2),
            Err(SessionError::WrongState {
                action: "start a recording",
                state: "recording"
            })
        );
        assert_eq!(
            state.check_chunk(9),
            Err(SessionError::ForeignRecording { got: 9, bound: Some(1) })
        );

        state.stop().unwrap();
        assert!(state.stop().is_err());
        assert!(state.can_start().is_err());
    }

    #[test]
    fn test_disconnect_hands_back_pending_recording() {
        let mut idle = SessionState::Idle;
        assert_eq!(idle.disconnect(), None);

        let mut recording = SessionState::Recording { recording_id: 4 };
        assert_eq!(recording.disconnect(), Some(4));
        assert_eq!(recording, SessionState::Idle);

        let mut finalizing = SessionState::Finalizing { recording_id: 5 };
        assert_eq!(finalizing.disconnect(), Some(5));
    }
}
