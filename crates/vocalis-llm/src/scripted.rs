//! A completion source that replays canned responses.
//!
//! Each call to `stream_chat` consumes the next scripted round. Requests
//! are recorded so tests can assert on what the engine sent.

use crate::error::ModelError;
use crate::source::{ChatRequest, ChunkStream, CompletionSource, ModelChunk};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use vocalis_types::ToolInvocation;

#[derive(Debug, Clone)]
enum Step {
    Chunk(ModelChunk),
    Fail(String),
}

#[derive(Debug, Clone)]
enum Round {
    Stream(Vec<Step>),
    Reject(String),
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses before every chunk, so tests can act mid-stream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// A round that streams `tokens` as text and then completes.
    pub fn text<I, S>(self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<Step> = tokens
            .into_iter()
            .map(|t| Step::Chunk(ModelChunk::text(t)))
            .collect();
        steps.push(Step::Chunk(ModelChunk::done()));
        self.push(Round::Stream(steps))
    }

    /// A round that requests a single tool call.
    pub fn tool_call(self, name: &str, arguments: Value) -> Self {
        self.tool_calls(vec![ToolInvocation::new(name, arguments)])
    }

    /// A round that requests several tool calls in one message.
    pub fn tool_calls(self, calls: Vec<ToolInvocation>) -> Self {
        self.push(Round::Stream(vec![
            Step::Chunk(ModelChunk {
                tool_calls: calls,
                ..ModelChunk::default()
            }),
            Step::Chunk(ModelChunk::done()),
        ]))
    }

    /// A round that streams `tokens` and then fails mid-stream.
    pub fn fail_after<I, S>(self, tokens: I, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<Step> = tokens
            .into_iter()
            .map(|t| Step::Chunk(ModelChunk::text(t)))
            .collect();
        steps.push(Step::Fail(message.to_string()));
        self.push(Round::Stream(steps))
    }

    /// A round whose request is refused outright.
    pub fn reject(self, message: &str) -> Self {
        self.push(Round::Reject(message.to_string()))
    }

    fn push(self, round: Round) -> Self {
        if let Ok(mut rounds) = self.rounds.lock() {
            rounds.push_back(round);
        }
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining_rounds(&self) -> usize {
        self.rounds.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let round = self.rounds.lock().ok().and_then(|mut r| r.pop_front());
        let steps = match round {
            Some(Round::Stream(steps)) => steps,
            Some(Round::Reject(message)) => return Err(ModelError::Service(message)),
            None => return Err(ModelError::Service("script exhausted".to_string())),
        };

        let delay = self.delay;
        let stream = stream::iter(steps).then(move |step| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Chunk(chunk) => Ok(chunk),
                Step::Fail(message) => Err(ModelError::Service(message)),
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "scripted".to_string(),
            messages: vec![],
            tools: vec![],
            temperature: None,
        }
    }

    #[tokio::test]
    async fn rounds_are_consumed_in_order() {
        let source = ScriptedSource::new()
            .tool_call("get_table_count", json!({"table_name": "usuarios"}))
            .text(["Hay ", "10."]);

        let first: Vec<_> = source.stream_chat(request()).await.unwrap().collect().await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].as_ref().unwrap().tool_calls[0].name, "get_table_count");

        let second: Vec<_> = source.stream_chat(request()).await.unwrap().collect().await;
        assert_eq!(second.len(), 3);
        assert!(second[2].as_ref().unwrap().done);

        assert!(source.stream_chat(request()).await.is_err());
        assert_eq!(source.requests().len(), 3);
    }
}
