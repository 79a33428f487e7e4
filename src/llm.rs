//! Generative language model client
//!
//! Talks to an Ollama server through its streaming chat endpoint.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::lines::LineBuffer;
use crate::memory::Message;
use crate::{Error, Result};

/// Incremental text fragments from the model
pub type TextStream = BoxStream<'static, Result<String>>;

/// A chat message as sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// A language model that streams its reply
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion for the given conversation
    ///
    /// Errors before the first fragment are returned directly; failures
    /// after that arrive as `Err` items in the stream.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Model identifier
    fn model_name(&self) -> &str;

    /// Probe the backing service
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Ollama chat client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client for `model` served at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, model: &str, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(model = %self.model, messages = messages.len(), "starting chat stream");

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, base_url = %self.base_url, "Ollama request failed");
                if e.is_connect() {
                    Error::Llm(format!("Ollama not reachable at {}", self.base_url))
                } else {
                    Error::Llm(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Ollama API error");
            return Err(Error::Llm(format!("Ollama error {status}: {body}")));
        }

        let mut body = Box::pin(response.bytes_stream());

        let fragments = stream! {
            let mut lines = LineBuffer::new();
            let mut done = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ollama stream interrupted");
                        yield Err(Error::Llm(format!("stream interrupted: {e}")));
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    match parse_chat_line(&line) {
                        Ok(parsed) => {
                            done |= parsed.done;
                            if let Some(content) = parsed.content {
                                yield Ok(content);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(line) = lines.finish() {
                match parse_chat_line(&line) {
                    Ok(parsed) => {
                        done |= parsed.done;
                        if let Some(content) = parsed.content {
                            yield Ok(content);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !done {
                tracing::warn!("Ollama stream closed without a done line");
                yield Err(Error::Llm("stream ended before done".to_string()));
            }
        };

        Ok(Box::pin(fragments))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Llm(format!("Ollama health {}", response.status())))
        }
    }
}

/// One decoded line of an Ollama chat stream
#[derive(Debug, Default, PartialEq, Eq)]
struct ChatLine {
    content: Option<String>,
    done: bool,
}

/// Decode one NDJSON line of an Ollama chat stream
///
/// Blank and malformed lines decode to an empty [`ChatLine`]; a
/// server-reported error ends the stream.
fn parse_chat_line(line: &[u8]) -> Result<ChatLine> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(ChatLine::default());
    }

    let chunk: ChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream line");
            return Ok(ChatLine::default());
        }
    };

    if let Some(error) = chunk.error {
        tracing::error!(error = %error, "Ollama reported stream error");
        return Err(Error::Llm(error));
    }

    if chunk.done {
        tracing::trace!("chat stream done");
    }

    Ok(ChatLine {
        content: chunk
            .message
            .map(|m| m.content)
            .filter(|content| !content.is_empty()),
        done: chunk.done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_line() {
        let line = br#"{"model":"m","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        let parsed = parse_chat_line(line).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("Hi"));
        assert!(!parsed.done);
    }

    #[test]
    fn test_parse_done_line_without_content() {
        let line = br#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#;
        let parsed = parse_chat_line(line).unwrap();
        assert!(parsed.content.is_none());
        assert!(parsed.done);
    }

    #[test]
    fn test_parse_skips_garbage() {
        assert_eq!(parse_chat_line(b"not json").unwrap(), ChatLine::default());
        assert_eq!(parse_chat_line(b"   ").unwrap(), ChatLine::default());
    }

    #[test]
    fn test_parse_error_line() {
        let line = br#"{"error":"model 'x' not found"}"#;
        assert!(matches!(parse_chat_line(line), Err(Error::Llm(_))));
    }

    #[test]
    fn test_chat_message_from_memory() {
        let msg = ChatMessage::from(&Message::assistant("hello"));
        assert_eq!(msg, ChatMessage::assistant("hello"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client =
            OllamaClient::new("http://localhost:11434/", "m", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model_name(), "m");
    }
}
