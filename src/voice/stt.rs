//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Response from the STT service transcription endpoint
#[derive(serde::Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Anything that can turn captured speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    ///
    /// An empty transcript is reported as [`Error::NoTranscript`].
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;

    /// Probe the backing service
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Transcribes speech through the Whisper-backed STT service
#[derive(Debug, Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    base_url: String,
}

impl SpeechToText {
    /// Create a new STT client for the service at `base_url`
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
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::NoSpeech);
        }

        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(audio.to_vec())
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .map_err(|e| Error::Stt(e.to_string()))?,
        );

        let response = self
            .client
            .post(format!("{}/stt/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "STT request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "STT service error");
            return Err(Error::Stt(format!("STT service error {status}: {body}")));
        }

        let result: TranscribeResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Stt(format!("invalid STT response: {e}"))
        })?;

        let transcript = result.text.trim().to_string();
        if transcript.is_empty() {
            tracing::info!("transcription returned no text");
            return Err(Error::NoTranscript);
        }

        tracing::info!(
            transcript = %transcript,
            language = result.language.as_deref().unwrap_or("unknown"),
            duration = result.duration.unwrap_or_default(),
            "transcription complete"
        );
        Ok(transcript)
    }

    async fn health(&self) -> Result<()> {
        #[derive(serde::Deserialize)]
        struct Health {
            status: String,
            #[serde(default)]
            error: Option<String>,
        }

        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Stt(format!("STT health {}", response.status())));
        }

        let health: Health = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("invalid health response: {e}")))?;

        if health.status == "healthy" {
            Ok(())
        } else {
            Err(Error::Stt(
                health.error.unwrap_or_else(|| health.status.clone()),
            ))
        }
    }
}
