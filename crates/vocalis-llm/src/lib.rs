//! Streaming completion for the Vocalis assistant.
//!
//! A [`CompletionSource`] yields model output as a stream of chunks. The
//! [`CompletionEngine`] drives one turn against a source: it forwards
//! content as [`EngineEvent::Token`]s, runs requested tools through the
//! registry, feeds the results back and resumes generation until the model
//! answers in text or the tool-call depth is exhausted.
//!
//! Engine output is an ordered event channel, not callbacks, so the whole
//! state machine can be driven by a [`ScriptedSource`] in tests.

mod conversation;
mod engine;
mod error;
mod ollama;
pub mod scripted;
mod source;

pub use conversation::Conversation;
pub use engine::{
    CompletionEngine, EngineEvent, EngineSettings, TurnHandle, TurnOutcome, MODEL_SERVICE_ERROR,
};
pub use error::ModelError;
pub use ollama::OllamaClient;
pub use scripted::ScriptedSource;
pub use source::{
    ChatMessage, ChatRequest, ChunkStream, CompletionSource, ModelChunk, WireFunction,
    WireToolCall,
};
