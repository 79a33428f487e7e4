//! Text-to-speech (TTS) processing

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::lines::LineBuffer;
use crate::{Error, Result};

/// Chunks of mono float32 PCM
pub type AudioStream = BoxStream<'static, Result<Vec<f32>>>;

/// Anything that can voice a piece of text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, streaming PCM chunks as they arrive
    async fn synthesize(&self, text: &str) -> Result<AudioStream>;

    /// Probe the backing service
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Synthesizes speech through the Kokoro-backed TTS service
#[derive(Debug, Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    base_url: String,
}

impl TextToSpeech {
    /// Create a new TTS client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            text: &'a str,
        }

        let text = text.trim();
        if text.is_empty() {
            return Ok(Box::pin(futures::stream::empty::<Result<Vec<f32>>>()));
        }

        tracing::debug!(chars = text.len(), "starting synthesis");

        let response = self
            .client
            .post(format!("{}/tts/stream", self.base_url))
            .json(&TtsRequest { text })
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS service error {status}: {body}")));
        }

        let mut body = Box::pin(response.bytes_stream());

        let chunks = stream! {
            let mut lines = LineBuffer::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Tts(format!("stream interrupted: {e}")));
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    if let Some(samples) = decode_line(&line) {
                        yield Ok(samples);
                    }
                }
            }

            if let Some(samples) = lines.finish().as_deref().and_then(decode_line) {
                yield Ok(samples);
            }
        };

        Ok(Box::pin(chunks))
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        // The service has no root route; any HTTP answer means it is up
        if response.status().is_server_error() {
            Err(Error::Tts(format!("TTS health {}", response.status())))
        } else {
            Ok(())
        }
    }
}

/// Decode one base64 line into PCM samples; undecodable lines are skipped
fn decode_line(line: &[u8]) -> Option<Vec<f32>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    match STANDARD.decode(trimmed) {
        Ok(bytes) => {
            let samples = decode_pcm_f32(&bytes);
            (!samples.is_empty()).then_some(samples)
        }
        Err(e) => {
            tracing::debug!(error = %e, "skipping undecodable audio line");
            None
        }
    }
}

/// Interpret little-endian bytes as float32 samples
///
/// A trailing partial sample is dropped.
#[must_use]
pub fn decode_pcm_f32(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 4 != 0 {
        tracing::warn!(bytes = bytes.len(), "audio chunk not a whole number of samples");
    }

    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
