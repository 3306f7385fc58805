//! # WebSocket Recording Handler
//!
//! One `RecordingWebSocket` actor per connection binds a [`SessionState`] to a
//! socket. Clients connect to `/ws/dictaphone/data/`.
//!
//! ## WebSocket Protocol:
//! 1. **Start**: text `start_recording(title)` → `ack_start_recording{recordingId}`
//! 2. **Stream**: binary frames (8-byte header + payload) → `ack_chunk` for new
//!    chunks, `request_chunk` when assembly is blocked on a gap
//! 3. **Stop**: text `stop_recording(totalChunks)` → background finalize →
//!    `recording_complete{recordingId, completionStatus, path, size}`
//! 4. **Replay**: text `initialize` → `initialization_data{recordings}`
//! 5. **Transcribe**: `start_transcription` / `cancel_transcription`;
//!    completions arrive as `transcription_completed` on every connection
//!
//! ## Disconnects:
//! If the socket goes away mid-recording the finalize job is replaced by a
//! disconnect finalize whose result goes to the broadcast group, so a client
//! that reconnects still learns how the recording ended.

use crate::bus::{GroupBus, GroupEvent, RECORDING_EVENTS};
use crate::config::RecordingConfig;
use crate::error::{AppError, RecorderError, RecorderResult};
use crate::protocol::{ChunkFrame, ControlMessage, ServerMessage};
use crate::recording::model::RecordingSummary;
use crate::recording::store::ChunkStatus;
use crate::session::finalize::{FinalizeHandle, FinalizeJob, FinalizeMode, FinalizeNotifier};
use crate::session::{SessionError, SessionState};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-connection actor.
pub struct RecordingWebSocket {
    /// Connection id, only used to correlate log lines
    connection_id: Uuid,
    state: SessionState,
    finalize: Option<FinalizeHandle>,
    app_state: AppState,
    config: RecordingConfig,
    last_heartbeat: Instant,
}

/// Message for sending a server message to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendMessage(ServerMessage);

/// The finalize job for this connection is over.
#[derive(Message)]
#[rtype(result = "()")]
struct FinalizeFinished {
    recording_id: u64,
    result: Result<RecordingSummary, String>,
}

/// Stable codes for core errors in `error` frames.
fn error_code(err: &RecorderError) -> &'static str {
    match err {
        RecorderError::UnknownRecording(_) => "unknown_recording",
        RecorderError::InvalidIndex(_) => "invalid_index",
        RecorderError::RecordingActive(_) => "recording_active",
        RecorderError::InvalidTitle(_) => "invalid_title",
        RecorderError::Transcription(_) => "transcription_error",
        RecorderError::DuplicateRecordingId(_)
        | RecorderError::RenameSourceMissing(_)
        | RecorderError::RenameDestinationExists(_)
        | RecorderError::MalformedCompletionRecord { .. }
        | RecorderError::Io(_) => "storage_error",
    }
}

/// Reports a requested finalize to the live connection, or to the group if
/// the connection is already gone.
struct SessionNotifier {
    addr: Addr<RecordingWebSocket>,
    app_state: AppState,
}

impl FinalizeNotifier for SessionNotifier {
    fn request_chunk(&self, recording_id: u64, chunk_index: u64) {
        // Resend requests to a dead connection are dropped, not retried.
        if self.addr.connected() {
            self.app_state.record_resend_request();
            self.addr.do_send(SendMessage(ServerMessage::RequestChunk { chunk_index }));
        } else {
            debug!(recording_id, chunk_index, "Dropping resend request for closed connection");
        }
    }

    fn finished(&self, recording_id: u64, result: RecorderResult<RecordingSummary>) {
        if let Ok(summary) = &result {
            self.app_state.record_finalize(summary.completion_status);
        }
        if self.addr.connected() {
            self.addr.do_send(FinalizeFinished {
                recording_id,
                result: result.map_err(|e| e.to_string()),
            });
        } else if let Ok(summary) = result {
            self.app_state
                .bus
                .publish(RECORDING_EVENTS, GroupEvent::RecordingComplete(summary));
        }
    }
}

/// Reports a disconnect finalize to the broadcast group only.
struct GroupNotifier {
    bus: Arc<GroupBus>,
    app_state: AppState,
}

impl FinalizeNotifier for GroupNotifier {
    fn request_chunk(&self, _recording_id: u64, _chunk_index: u64) {}

    fn finished(&self, recording_id: u64, result: RecorderResult<RecordingSummary>) {
        match result {
            Ok(summary) => {
                self.app_state.record_finalize(summary.completion_status);
                self.bus
                    .publish(RECORDING_EVENTS, GroupEvent::RecordingComplete(summary));
            }
            Err(e) => error!(recording_id, error = %e, "Disconnect finalize failed"),
        }
    }
}

impl RecordingWebSocket {
    pub fn new(app_state: AppState, config: RecordingConfig) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            state: SessionState::Idle,
            finalize: None,
            app_state,
            config,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: ServerMessage) {
        ctx.text(message.to_json());
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: String) {
        self.app_state.record_protocol_error();
        self.send(ctx, ServerMessage::error(code, message));
    }

    fn reject(&self, ctx: &mut ws::WebsocketContext<Self>, err: SessionError) {
        warn!(connection = %self.connection_id, error = %err, "Frame rejected");
        self.send_error(ctx, "wrong_state", err.to_string());
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(connection = %self.connection_id, error = %err, "Bad control frame");
                self.send_error(ctx, err.code(), err.to_string());
                return;
            }
        };
        debug!(connection = %self.connection_id, ?message, "Control message");

        match message {
            ControlMessage::StartRecording { title } => self.start_recording(&title, ctx),
            ControlMessage::StopRecording { total_chunks } => self.stop_recording(total_chunks, ctx),
            ControlMessage::Initialize => {
                let recordings = self.app_state.manager.list();
                self.send(ctx, ServerMessage::InitializationData { recordings });
            }
            ControlMessage::StartTranscription {
                recording_id,
                model,
                language,
            } => self.start_transcription(recording_id, model, language, ctx),
            ControlMessage::CancelTranscription { task_id } => {
                let bridge = self.app_state.bridge.clone();
                tokio::spawn(async move {
                    bridge.cancel(&task_id).await;
                });
            }
        }
    }

    fn start_recording(&mut self, title: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = self.state.can_start() {
            self.reject(ctx, err);
            return;
        }

        match self.app_state.manager.start(title) {
            Ok(recording_id) => {
                if let Err(err) = self.state.begin(recording_id) {
                    self.reject(ctx, err);
                    return;
                }
                info!(connection = %self.connection_id, recording_id, "Recording bound to connection");
                self.send(ctx, ServerMessage::AckStartRecording { recording_id });
            }
            Err(err) => {
                error!(connection = %self.connection_id, error = %err, "Could not start recording");
                self.send_error(ctx, error_code(&err), err.to_string());
            }
        }
    }

    fn stop_recording(&mut self, total_chunks: u32, ctx: &mut ws::WebsocketContext<Self>) {
        let recording_id = match self.state.stop() {
            Ok(id) => id,
            Err(err) => {
                self.reject(ctx, err);
                return;
            }
        };
        info!(connection = %self.connection_id, recording_id, total_chunks, "Stop requested, finalizing");

        let job = FinalizeJob {
            manager: self.app_state.manager.clone(),
            recording_id,
            mode: FinalizeMode::Requested { total_chunks },
            max_attempts: self.config.finalize_max_attempts,
            retry_interval: self.config.finalize_retry_interval(),
        };
        self.finalize = Some(job.spawn(SessionNotifier {
            addr: ctx.address(),
            app_state: self.app_state.clone(),
        }));
    }

    fn start_transcription(
        &self,
        recording_id: u64,
        model: Option<String>,
        language: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let bridge = self.app_state.bridge.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let reply = match bridge.start_transcription(recording_id, model, language).await {
                Ok(started) => ServerMessage::TranscriptionStarted {
                    task_id: started.task_id,
                    recording_id: started.recording_id,
                    file_size: started.file_size,
                },
                Err(err) => {
                    warn!(recording_id, error = %err, "Transcription not started");
                    ServerMessage::error(error_code(&err), err.to_string())
                }
            };
            addr.do_send(SendMessage(reply));
        });
    }

    fn handle_binary(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let frame = match ChunkFrame::parse(data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = %self.connection_id, error = %err, "Bad binary frame");
                self.send_error(ctx, err.code(), err.to_string());
                return;
            }
        };

        let recording_id = u64::from(frame.recording_id);
        if let Err(err) = self.state.check_chunk(recording_id) {
            self.reject(ctx, err);
            return;
        }

        let chunk_index = frame.chunk_index;
        match self
            .app_state
            .manager
            .add_chunk(recording_id, i64::from(chunk_index), frame.payload)
        {
            Ok(outcome) => {
                self.app_state.record_chunk(outcome.status);
                if outcome.status == ChunkStatus::Applied {
                    self.send(ctx, ServerMessage::AckChunk {
                        chunk_index: u64::from(chunk_index),
                    });
                }
                if let Some(missing) = outcome.request_chunk {
                    debug!(recording_id, chunk_index = missing, "Requesting resend");
                    self.app_state.record_resend_request();
                    self.send(ctx, ServerMessage::RequestChunk { chunk_index: missing });
                }
            }
            Err(err) => {
                error!(recording_id, chunk_index, error = %err, "Chunk rejected");
                self.send_error(ctx, error_code(&err), err.to_string());
            }
        }
    }
}

impl Actor for RecordingWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "WebSocket connection started");

        // Join the broadcast group for completions from any session.
        let events = self.app_state.bus.subscribe(RECORDING_EVENTS);
        ctx.add_stream(BroadcastStream::new(events));

        let timeout = self.config.client_timeout();
        ctx.run_interval(self.config.heartbeat_interval(), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(connection = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Called when the WebSocket connection stops, for whatever reason.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, state = self.state.name(), "WebSocket connection stopped");

        if let Some(handle) = self.finalize.take() {
            handle.abort();
        }

        if let Some(recording_id) = self.state.disconnect() {
            info!(recording_id, "Connection lost mid-recording, finalizing without chunk count");
            let job = FinalizeJob {
                manager: self.app_state.manager.clone(),
                recording_id,
                mode: FinalizeMode::Disconnected,
                max_attempts: 1,
                retry_interval: self.config.finalize_retry_interval(),
            };
            self.app_state.finalizers.spawn(
                job,
                GroupNotifier {
                    bus: self.app_state.bus.clone(),
                    app_state: self.app_state.clone(),
                },
            );
        }

        self.app_state.release_session();
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RecordingWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_binary(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.connection_id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Handle events published to the broadcast group.
impl StreamHandler<Result<GroupEvent, BroadcastStreamRecvError>> for RecordingWebSocket {
    fn handle(&mut self, event: Result<GroupEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match event {
            Ok(GroupEvent::RecordingComplete(summary)) => {
                self.send(ctx, ServerMessage::recording_complete(&summary));
            }
            Ok(GroupEvent::TranscriptionCompleted {
                task_id,
                recording_id,
                state,
                results,
            }) => {
                self.send(
                    ctx,
                    ServerMessage::TranscriptionCompleted {
                        task_id,
                        recording_id,
                        state,
                        results,
                    },
                );
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(connection = %self.connection_id, missed, "Connection fell behind the broadcast group");
            }
        }
    }

    /// The bus outlives every connection; ending this stream must not stop the actor.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(connection = %self.connection_id, "Broadcast subscription ended");
    }
}

impl Handler<SendMessage> for RecordingWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendMessage, ctx: &mut Self::Context) {
        self.send(ctx, msg.0);
    }
}

impl Handler<FinalizeFinished> for RecordingWebSocket {
    type Result = ();

    fn handle(&mut self, msg: FinalizeFinished, ctx: &mut Self::Context) {
        if self.state.finished(msg.recording_id) {
            self.finalize = None;
        }
        match msg.result {
            Ok(summary) => self.send(ctx, ServerMessage::recording_complete(&summary)),
            Err(message) => self.send_error(ctx, "finalize_failed", message),
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Reserves a session slot first; when all `max_concurrent_sessions` are in
/// use the upgrade is refused with 503.
pub async fn recording_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    if !app_state.try_acquire_session(config.performance.max_concurrent_sessions) {
        warn!(
            peer = ?req.connection_info().peer_addr(),
            limit = config.performance.max_concurrent_sessions,
            "Refusing WebSocket upgrade, session limit reached"
        );
        return Err(AppError::Unavailable("too many concurrent sessions".to_string()).into());
    }

    info!(peer = ?req.connection_info().peer_addr(), "New WebSocket connection");
    let websocket = RecordingWebSocket::new(app_state.get_ref().clone(), config.recording);

    let response = ws::start(websocket, &req, stream);
    if response.is_err() {
        app_state.release_session();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(error_code(&RecorderError::UnknownRecording(1)), "unknown_recording");
        assert_eq!(error_code(&RecorderError::InvalidIndex("-1".into())), "invalid_index");
        assert_eq!(
            error_code(&RecorderError::Io(std::io::Error::other("disk full"))),
            "storage_error"
        );
    }
}
