//! Ollama `/api/chat` client.
//!
//! The service streams newline-delimited JSON objects. Each object carries a
//! message fragment; the last one has `"done": true`.

use crate::error::ModelError;
use crate::source::{
    ChatMessage, ChatRequest, ChunkStream, CompletionSource, ModelChunk, WireToolCall,
};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use vocalis_types::ToolInvocation;

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Value],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

fn no_tools(tools: &&[Value]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

/// Streaming client for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
}

impl OllamaClient {
    /// `idle_timeout` bounds the wait for the first response and for every
    /// subsequent chunk, not the whole generation.
    pub fn new(base_url: impl Into<String>, idle_timeout: Duration) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            idle_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CompletionSource for OllamaClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, ModelError> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: true,
            options: request
                .temperature
                .map(|temperature| ChatOptions { temperature }),
        };

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "requesting chat completion"
        );

        let send = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| ModelError::Idle(self.idle_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(ndjson_chunks(bytes, self.idle_timeout))
    }
}

struct LineState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    idle: Duration,
    finished: bool,
}

fn ndjson_chunks(
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    idle: Duration,
) -> ChunkStream {
    let state = LineState {
        body,
        lines: LineBuffer::default(),
        idle,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            if let Some(line) = st.lines.next_line() {
                let item = parse_line(&line);
                if item.as_ref().map_or(true, |chunk| chunk.done) {
                    st.finished = true;
                }
                return Some((item, st));
            }

            match tokio::time::timeout(st.idle, st.body.next()).await {
                Ok(Some(Ok(bytes))) => st.lines.push(&bytes),
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(ModelError::Http(e)), st));
                }
                Ok(None) => {
                    st.finished = true;
                    let item = match st.lines.take_rest() {
                        Some(line) => parse_line(&line),
                        None => Err(ModelError::Truncated),
                    };
                    return Some((item, st));
                }
                Err(_) => {
                    st.finished = true;
                    return Some((Err(ModelError::Idle(st.idle)), st));
                }
            }
        }
    })
    .boxed()
}

/// Splits a byte stream into non-empty lines.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    fn take_rest(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf))
            .trim()
            .to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

fn parse_line(line: &str) -> Result<ModelChunk, ModelError> {
    let parsed: StreamLine = serde_json::from_str(line)
        .map_err(|e| ModelError::Decode(format!("{}: {}", e, line)))?;
    if let Some(error) = parsed.error {
        return Err(ModelError::Service(error));
    }
    let (content, tool_calls) = match parsed.message {
        Some(m) => (
            m.content,
            m.tool_calls.into_iter().map(ToolInvocation::from).collect(),
        ),
        None => (String::new(), Vec::new()),
    };
    Ok(ModelChunk {
        content,
        tool_calls,
        done: parsed.done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn byte_stream(parts: Vec<&'static str>) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec()))).boxed()
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"a\":");
        assert_eq!(lines.next_line(), None);
        lines.push(b"1}\n\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines.next_line().as_deref(), Some("{\"a\":1}"));
        assert_eq!(lines.next_line().as_deref(), Some("{\"b\":2}"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.take_rest().as_deref(), Some("{\"c\""));
    }

    #[test]
    fn parses_tool_calls() {
        let line = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "get_table_count", "arguments": {"table_name": "usuarios"}}}]
            },
            "done": false
        })
        .to_string();
        let chunk = parse_line(&line).unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].name, "get_table_count");
    }

    #[test]
    fn service_errors_surface() {
        let err = parse_line(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(matches!(err, ModelError::Service(m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn stream_yields_chunks_until_done() {
        let body = byte_stream(vec![
            "{\"message\":{\"content\":\"Hay \"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\"10 usuarios.\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ]);
        let chunks: Vec<_> = ndjson_chunks(body, Duration::from_secs(1)).collect().await;
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().content.clone())
            .collect();
        assert_eq!(texts, vec!["Hay ", "10 usuarios.", ""]);
        assert!(chunks.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn stream_without_done_is_truncated() {
        let body = byte_stream(vec!["{\"message\":{\"content\":\"Hola\"},\"done\":false}\n"]);
        let chunks: Vec<_> = ndjson_chunks(body, Duration::from_secs(1)).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], Err(ModelError::Truncated)));
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let messages = vec![ChatMessage::new(vocalis_types::Role::User, "hola")];
        let body = ChatBody {
            model: "llama3.1",
            messages: &messages,
            tools: &[],
            stream: true,
            options: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["stream"], json!(true));
    }
}
