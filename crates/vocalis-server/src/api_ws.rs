//! WebSocket session protocol.
//!
//! One connection is one session: its own conversation, at most one turn in
//! flight, and a single outbound queue so frames leave in the order they
//! were produced.

use crate::session::SessionCommand;
use crate::speech::SpeechPipeline;
use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vocalis_llm::{Conversation, EngineEvent, TurnOutcome};
use vocalis_voice::SentenceSegmenter;

/// Outbound frames buffered per connection before producers wait.
const OUTBOUND_BUFFER: usize = 256;

/// Consecutive malformed frames tolerated before the connection is closed.
const MAX_MALFORMED_FRAMES: u32 = 8;

/// How long queued frames get to flush once the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Incoming WebSocket message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    Message { content: String },
    Ping,
    Reset,
}

/// Outgoing WebSocket message types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// First frame on every connection.
    Session { id: Uuid },
    Thinking,
    Token { content: String },
    ToolExecuting { tool: String },
    /// Base64 WAV for one sentence.
    Audio { content: String },
    AudioError { content: String },
    Done,
    Error { content: String },
    Pong,
    System { content: String },
}

/// Serializes a message into a text frame.
pub(crate) fn frame(message: &OutgoingMessage) -> Option<AxumMessage> {
    match serde_json::to_string(message) {
        Ok(json) => Some(AxumMessage::Text(json.into())),
        Err(e) => {
            tracing::error!("failed to serialize WebSocket message: {}", e);
            None
        }
    }
}

pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum Flow {
    Continue,
    Close(Option<CloseFrame>),
}

struct ActiveTurn {
    events: mpsc::Receiver<EngineEvent>,
    join: JoinHandle<(Conversation, TurnOutcome)>,
    cancel: CancellationToken,
    segmenter: SentenceSegmenter,
}

struct Session {
    id: Uuid,
    state: Arc<AppState>,
    out: mpsc::Sender<AxumMessage>,
    /// `None` while a turn holds the conversation.
    conversation: Option<Conversation>,
    turn: Option<ActiveTurn>,
    speech: Option<SpeechPipeline>,
    malformed: u32,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let (out, mut out_rx) = mpsc::channel::<AxumMessage>(OUTBOUND_BUFFER);
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, AxumMessage::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let (control_tx, mut control_rx) = mpsc::channel(4);
    state.sessions.register(id, control_tx).await;
    tracing::info!(session = %id, "websocket session opened");

    let settings = state.session.clone();
    let shutdown = state.shutdown.clone();
    let mut session = Session {
        id,
        conversation: Some(Conversation::new(
            settings.system_prompt.clone(),
            settings.max_history,
        )),
        state: state.clone(),
        out,
        turn: None,
        speech: None,
        malformed: 0,
    };
    session.send(OutgoingMessage::Session { id }).await;

    let period = settings.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut silent_ticks = 0u32;

    let close = loop {
        let flow = tokio::select! {
            frame = receiver.next() => {
                silent_ticks = 0;
                session.on_frame(frame).await
            }
            event = next_event(&mut session.turn) => session.on_event(event).await,
            Some(command) = control_rx.recv() => session.on_command(command).await,
            _ = keepalive.tick() => {
                silent_ticks += 1;
                if silent_ticks > settings.max_missed_keepalives {
                    tracing::info!(session = %id, missed = silent_ticks - 1, "keepalive lost");
                    Flow::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "keepalive timeout".into(),
                    }))
                } else {
                    session.send_raw(AxumMessage::Ping(Default::default())).await
                }
            }
            _ = shutdown.cancelled() => Flow::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "server shutting down".into(),
            })),
        };
        if let Flow::Close(frame) = flow {
            break frame;
        }
    };

    session.abandon_turn();
    state.sessions.remove(id).await;
    if let Some(frame) = close {
        let _ = session.out.send(AxumMessage::Close(Some(frame))).await;
    }
    drop(session);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    tracing::info!(session = %id, "websocket session closed");
}

async fn next_event(turn: &mut Option<ActiveTurn>) -> Option<EngineEvent> {
    match turn {
        Some(turn) => turn.events.recv().await,
        None => std::future::pending().await,
    }
}

impl Session {
    fn fresh_conversation(&self) -> Conversation {
        Conversation::new(
            self.state.session.system_prompt.clone(),
            self.state.session.max_history,
        )
    }

    /// A turn is running, or its audio has not been fully sent yet.
    fn is_busy(&self) -> bool {
        self.turn.is_some() || self.speech.as_ref().is_some_and(|s| !s.is_idle())
    }

    async fn send(&self, message: OutgoingMessage) -> Flow {
        match frame(&message) {
            Some(msg) => self.send_raw(msg).await,
            None => Flow::Continue,
        }
    }

    async fn send_raw(&self, msg: AxumMessage) -> Flow {
        if self.out.send(msg).await.is_err() {
            return Flow::Close(None);
        }
        Flow::Continue
    }

    async fn send_error(&self, content: impl Into<String>) -> Flow {
        self.send(OutgoingMessage::Error {
            content: content.into(),
        })
        .await
    }

    async fn on_frame(&mut self, frame: Option<Result<AxumMessage, axum::Error>>) -> Flow {
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::debug!(session = %self.id, error = %e, "websocket receive failed");
                return Flow::Close(None);
            }
            None => return Flow::Close(None),
        };

        match msg {
            AxumMessage::Text(text) => {
                if text.as_str().len() > self.state.session.max_message_bytes {
                    return self
                        .reject_frame(format!(
                            "Message exceeds maximum length of {} bytes",
                            self.state.session.max_message_bytes
                        ))
                        .await;
                }
                match serde_json::from_str::<IncomingMessage>(text.as_str()) {
                    Ok(incoming) => {
                        self.malformed = 0;
                        self.on_message(incoming).await
                    }
                    Err(e) => self.reject_frame(format!("Malformed message: {}", e)).await,
                }
            }
            AxumMessage::Binary(_) => {
                self.reject_frame("Binary frames are not supported".to_string())
                    .await
            }
            AxumMessage::Close(_) => Flow::Close(None),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => Flow::Continue,
        }
    }

    async fn reject_frame(&mut self, reason: String) -> Flow {
        self.malformed += 1;
        tracing::warn!(
            session = %self.id,
            consecutive = self.malformed,
            "rejected client frame: {}",
            reason
        );
        let flow = self.send_protocol_error(reason).await;
        if self.malformed >= MAX_MALFORMED_FRAMES {
            return Flow::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "too many malformed messages".into(),
            }));
        }
        flow
    }

    /// An `error` frame ends the turn on the client, so a running turn gets
    /// the complaint as a `system` notice instead.
    async fn send_protocol_error(&self, reason: String) -> Flow {
        if self.is_busy() {
            self.send(OutgoingMessage::System { content: reason }).await
        } else {
            self.send_error(reason).await
        }
    }

    async fn on_message(&mut self, incoming: IncomingMessage) -> Flow {
        match incoming {
            IncomingMessage::Ping => self.send(OutgoingMessage::Pong).await,
            IncomingMessage::Reset => {
                self.reset().await;
                self.send(OutgoingMessage::System {
                    content: "Conversation reset.".to_string(),
                })
                .await
            }
            IncomingMessage::Message { content } => self.start_turn(content).await,
        }
    }

    async fn start_turn(&mut self, content: String) -> Flow {
        if self.is_busy() {
            tracing::debug!(session = %self.id, "message while busy, ignoring");
            return self
                .send(OutgoingMessage::System {
                    content: "Still answering the previous message; please wait.".to_string(),
                })
                .await;
        }
        if !self.state.engine.accepts(&content) {
            tracing::debug!(session = %self.id, "message too short, ignoring");
            return Flow::Continue;
        }

        if let Flow::Close(frame) = self.send(OutgoingMessage::Thinking).await {
            return Flow::Close(frame);
        }

        let conversation = match self.conversation.take() {
            Some(conversation) => conversation,
            None => self.fresh_conversation(),
        };
        let cancel = CancellationToken::new();
        let handle = self
            .state
            .engine
            .spawn_turn(conversation, content, cancel.clone());
        self.turn = Some(ActiveTurn {
            events: handle.events,
            join: handle.join,
            cancel,
            segmenter: SentenceSegmenter::new(),
        });
        self.speech = Some(SpeechPipeline::start(
            self.state.synthesizer.clone(),
            self.state.voice.clone(),
            self.out.clone(),
        ));
        Flow::Continue
    }

    async fn on_event(&mut self, event: Option<EngineEvent>) -> Flow {
        let Some(event) = event else {
            // The turn task went away without a terminal event.
            tracing::error!(session = %self.id, "turn ended without completing");
            self.speech = None;
            self.finish_turn().await;
            return self.send_error("The turn ended unexpectedly.").await;
        };

        match event {
            EngineEvent::Token(token) => {
                let sentences = match self.turn.as_mut() {
                    Some(turn) => turn.segmenter.push(&token),
                    None => Vec::new(),
                };
                let flow = self.send(OutgoingMessage::Token { content: token }).await;
                if let Some(speech) = &self.speech {
                    for sentence in &sentences {
                        speech.speak(sentence);
                    }
                }
                flow
            }
            EngineEvent::ToolExecuting { tool } => {
                self.send(OutgoingMessage::ToolExecuting { tool }).await
            }
            EngineEvent::ToolFinished { tool, success } => {
                tracing::debug!(session = %self.id, tool = %tool, success, "tool finished");
                Flow::Continue
            }
            EngineEvent::Notice(content) => self.send(OutgoingMessage::System { content }).await,
            EngineEvent::Completed { .. } => {
                let rest = self.turn.as_mut().and_then(|t| t.segmenter.finish());
                let flow = match &self.speech {
                    Some(speech) => {
                        if let Some(rest) = rest {
                            speech.speak(&rest);
                        }
                        speech.finish();
                        Flow::Continue
                    }
                    None => self.send(OutgoingMessage::Done).await,
                };
                // The turn task returns right after its last event.
                self.finish_turn().await;
                flow
            }
            EngineEvent::Failed { kind, message } => {
                tracing::warn!(session = %self.id, kind, "turn failed: {}", message);
                self.speech = None;
                let flow = self.send_error(message).await;
                self.finish_turn().await;
                flow
            }
        }
    }

    /// Takes the conversation back from a turn whose event stream ended.
    async fn finish_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        self.conversation = Some(self.join_turn(turn.join).await);
    }

    async fn join_turn(&self, join: JoinHandle<(Conversation, TurnOutcome)>) -> Conversation {
        match join.await {
            Ok((conversation, outcome)) => {
                tracing::debug!(session = %self.id, ?outcome, "turn ended");
                conversation
            }
            Err(e) => {
                tracing::error!(session = %self.id, "turn task failed: {}", e);
                self.fresh_conversation()
            }
        }
    }

    /// Cancels the in-flight turn, waits for it to let go of the
    /// conversation, then clears the history.
    async fn reset(&mut self) {
        self.speech = None;
        if let Some(turn) = self.turn.take() {
            let ActiveTurn {
                events,
                join,
                cancel,
                ..
            } = turn;
            cancel.cancel();
            // A closed event channel stops a turn blocked on sending.
            drop(events);
            self.conversation = Some(self.join_turn(join).await);
        }
        match self.conversation.as_mut() {
            Some(conversation) => conversation.clear(),
            None => self.conversation = Some(self.fresh_conversation()),
        }
        tracing::info!(session = %self.id, "conversation reset");
    }

    async fn on_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Reset { ack } => {
                self.reset().await;
                let flow = self
                    .send(OutgoingMessage::System {
                        content: "Conversation reset.".to_string(),
                    })
                    .await;
                let _ = ack.send(());
                flow
            }
        }
    }

    /// Cancels the in-flight turn without waiting for it. A tool already
    /// running finishes on its own and its result is dropped.
    fn abandon_turn(&mut self) {
        self.speech = None;
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incoming_messages_parse_by_type_tag() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"message","content":"hola"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::Message { content } if content == "hola"));
        assert!(matches!(
            serde_json::from_str::<IncomingMessage>(r#"{"type":"ping"}"#).unwrap(),
            IncomingMessage::Ping
        ));
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"shout"}"#).is_err());
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"message"}"#).is_err());
    }

    #[test]
    fn outgoing_messages_use_snake_case_tags() {
        let cases = [
            (OutgoingMessage::Thinking, json!({"type": "thinking"})),
            (
                OutgoingMessage::ToolExecuting {
                    tool: "get_table_count".to_string(),
                },
                json!({"type": "tool_executing", "tool": "get_table_count"}),
            ),
            (
                OutgoingMessage::AudioError {
                    content: "x".to_string(),
                },
                json!({"type": "audio_error", "content": "x"}),
            ),
            (OutgoingMessage::Done, json!({"type": "done"})),
        ];
        for (message, expected) in cases {
            assert_eq!(serde_json::to_value(&message).unwrap(), expected);
        }
    }
}
