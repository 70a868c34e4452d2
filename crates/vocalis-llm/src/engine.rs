//! The completion engine: one turn of streaming generation with tool calls.
//!
//! ```text
//! Idle -> Streaming -> (ToolRequested -> ToolExecuting -> Streaming)* -> Finalizing -> Idle
//!            \______________________ Failed ______________________/
//! ```
//!
//! Cancellation is observed between chunks and between tool steps. A tool
//! already dispatched runs to completion and its result is discarded.

use crate::conversation::Conversation;
use crate::error::ModelError;
use crate::source::{ChatRequest, ChunkStream, CompletionSource};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vocalis_tools::ToolRegistry;
use vocalis_types::ToolInvocation;

/// Capacity of the per-turn event channel.
const EVENT_BUFFER: usize = 64;

/// Taxonomy tag carried by [`EngineEvent::Failed`].
pub const MODEL_SERVICE_ERROR: &str = "model_service_error";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub model: String,
    /// Tool-call/resume cycles allowed per turn.
    pub max_tool_depth: usize,
    /// Inputs shorter than this (in characters, after trimming) are ignored.
    pub min_input_chars: usize,
    pub temperature: Option<f32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            max_tool_depth: 5,
            min_input_chars: 2,
            temperature: None,
        }
    }
}

/// Events produced during one turn, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Token(String),
    ToolExecuting { tool: String },
    ToolFinished { tool: String, success: bool },
    Notice(String),
    Completed { text: String },
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
    /// The input was too short to start a turn.
    Ignored,
}

/// A turn running on its own task.
///
/// Events arrive on `events`; the task hands the conversation back when it
/// ends.
pub struct TurnHandle {
    pub events: mpsc::Receiver<EngineEvent>,
    pub join: JoinHandle<(Conversation, TurnOutcome)>,
}

pub struct CompletionEngine {
    source: Arc<dyn CompletionSource>,
    registry: Option<Arc<ToolRegistry>>,
    settings: EngineSettings,
}

impl std::fmt::Debug for CompletionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionEngine")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}

enum Step {
    Continue,
    Stop(TurnOutcome),
}

impl CompletionEngine {
    /// `registry` is `None` when tools are disabled.
    pub fn new(
        source: Arc<dyn CompletionSource>,
        registry: Option<Arc<ToolRegistry>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            source,
            registry,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> Option<&Arc<ToolRegistry>> {
        self.registry.as_ref()
    }

    pub fn tools_enabled(&self) -> bool {
        self.registry.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Whether `input` is long enough to start a turn.
    pub fn accepts(&self, input: &str) -> bool {
        input.trim().chars().count() >= self.settings.min_input_chars
    }

    /// Runs one turn on a background task.
    pub fn spawn_turn(
        self: &Arc<Self>,
        mut conversation: Conversation,
        input: String,
        cancel: CancellationToken,
    ) -> TurnHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let engine = Arc::clone(self);
        let join = tokio::spawn(async move {
            let outcome = engine
                .run_turn(&mut conversation, &input, &tx, &cancel)
                .await;
            (conversation, outcome)
        });
        TurnHandle { events: rx, join }
    }

    /// Runs one turn to completion, failure or cancellation.
    ///
    /// On success the exchange is committed to `conversation`. On failure or
    /// cancellation everything after the user's input is rolled back.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        input: &str,
        events: &mpsc::Sender<EngineEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        if !self.accepts(input) {
            tracing::debug!(chars = input.chars().count(), "input too short, ignoring");
            return TurnOutcome::Ignored;
        }

        conversation.push_user(input.trim());
        tracing::info!(history = conversation.len(), "turn started");

        let mut depth = 0usize;
        let mut streamed = String::new();

        loop {
            let offer_tools = self.tools_enabled() && depth < self.settings.max_tool_depth;
            let request = ChatRequest {
                model: self.settings.model.clone(),
                messages: conversation.messages(),
                tools: match (&self.registry, offer_tools) {
                    (Some(registry), true) => registry.schema_for_model(),
                    _ => Vec::new(),
                },
                temperature: self.settings.temperature,
            };

            let stream = tokio::select! {
                _ = cancel.cancelled() => return cancelled(conversation),
                started = self.source.stream_chat(request) => match started {
                    Ok(stream) => stream,
                    Err(e) => return fail(conversation, events, e).await,
                },
            };

            let (round_text, calls) = match read_round(stream, events, cancel).await {
                Ok(Some(round)) => round,
                Ok(None) => return cancelled(conversation),
                Err(e) => return fail(conversation, events, e).await,
            };
            streamed.push_str(&round_text);

            if calls.is_empty() || !offer_tools {
                if !calls.is_empty() {
                    tracing::warn!(
                        calls = calls.len(),
                        "model requested tools after the depth limit, ignoring"
                    );
                }
                conversation.commit(round_text);
                tracing::info!(depth, chars = streamed.len(), "turn completed");
                let _ = events
                    .send(EngineEvent::Completed {
                        text: streamed.clone(),
                    })
                    .await;
                return TurnOutcome::Completed(streamed);
            }

            match self
                .run_tools(conversation, round_text, calls, events, cancel)
                .await
            {
                Step::Continue => {}
                Step::Stop(outcome) => return outcome,
            }

            depth += 1;
            if depth >= self.settings.max_tool_depth {
                tracing::warn!(depth, "tool-call depth limit reached");
                let notice = format!(
                    "Tool-call limit of {} reached; answering with the information gathered so far.",
                    self.settings.max_tool_depth
                );
                if events.send(EngineEvent::Notice(notice)).await.is_err() {
                    return cancelled(conversation);
                }
            }
        }
    }

    async fn run_tools(
        &self,
        conversation: &mut Conversation,
        round_text: String,
        calls: Vec<ToolInvocation>,
        events: &mpsc::Sender<EngineEvent>,
        cancel: &CancellationToken,
    ) -> Step {
        let Some(registry) = &self.registry else {
            return Step::Continue;
        };
        conversation.push_tool_request(round_text, calls.clone());

        for call in calls {
            if cancel.is_cancelled() {
                return Step::Stop(cancelled(conversation));
            }
            let executing = EngineEvent::ToolExecuting {
                tool: call.name.clone(),
            };
            if events.send(executing).await.is_err() {
                return Step::Stop(cancelled(conversation));
            }

            let result = registry.dispatch(&call).await;

            if cancel.is_cancelled() {
                tracing::debug!(tool = %call.name, "discarding tool result of cancelled turn");
                return Step::Stop(cancelled(conversation));
            }
            conversation.push_tool_result(call.name.clone(), result.to_model_text());
            let finished = EngineEvent::ToolFinished {
                tool: call.name,
                success: result.is_success(),
            };
            if events.send(finished).await.is_err() {
                return Step::Stop(cancelled(conversation));
            }
        }
        Step::Continue
    }
}

/// Reads one model response. `Ok(None)` means the turn was cancelled.
async fn read_round(
    mut stream: ChunkStream,
    events: &mpsc::Sender<EngineEvent>,
    cancel: &CancellationToken,
) -> Result<Option<(String, Vec<ToolInvocation>)>, ModelError> {
    let mut text = String::new();
    let mut calls = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        if !chunk.content.is_empty() {
            text.push_str(&chunk.content);
            if events.send(EngineEvent::Token(chunk.content)).await.is_err() {
                return Ok(None);
            }
        }
        calls.extend(chunk.tool_calls);
        if chunk.done {
            break;
        }
    }
    Ok(Some((text, calls)))
}

fn cancelled(conversation: &mut Conversation) -> TurnOutcome {
    conversation.rollback();
    tracing::info!("turn cancelled");
    TurnOutcome::Cancelled
}

async fn fail(
    conversation: &mut Conversation,
    events: &mpsc::Sender<EngineEvent>,
    err: ModelError,
) -> TurnOutcome {
    conversation.rollback();
    let message = err.to_string();
    tracing::error!(error = %message, "turn failed");
    let _ = events
        .send(EngineEvent::Failed {
            kind: MODEL_SERVICE_ERROR,
            message: message.clone(),
        })
        .await;
    TurnOutcome::Failed(message)
}
