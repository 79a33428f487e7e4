//! Model controller
//!
//! Bundles the three external services behind their traits so the bot can
//! be driven by the real HTTP clients or by in-process stand-ins.

use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel, OllamaClient, TextStream};
use crate::voice::{AudioStream, SpeechToText, Synthesizer, TextToSpeech, Transcriber};
use crate::{Config, Result};

/// Reachability of one external service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Up,
    Down(String),
}

impl ServiceStatus {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Up,
            Err(e) => Self::Down(e.to_string()),
        }
    }

    #[must_use]
    pub const fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down(reason) => write!(f, "down ({reason})"),
        }
    }
}

/// Health of all three services
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub llm: ServiceStatus,
    pub stt: ServiceStatus,
    pub tts: ServiceStatus,
}

impl HealthReport {
    #[must_use]
    pub const fn all_up(&self) -> bool {
        self.llm.is_up() && self.stt.is_up() && self.tts.is_up()
    }
}

/// Pass-through to the STT, LLM and TTS services
#[derive(Clone)]
pub struct ModelController {
    llm: Arc<dyn ChatModel>,
    stt: Arc<dyn Transcriber>,
    tts: Arc<dyn Synthesizer>,
}

impl ModelController {
    /// Assemble a controller from explicit service implementations
    #[must_use]
    pub fn new(
        llm: Arc<dyn ChatModel>,
        stt: Arc<dyn Transcriber>,
        tts: Arc<dyn Synthesizer>,
    ) -> Self {
        Self { llm, stt, tts }
    }

    /// Build HTTP clients for the configured endpoints
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let services = &config.services;

        let llm = OllamaClient::new(
            &services.ollama_url,
            &config.llm.model,
            services.connect_timeout,
        )?;
        let stt = SpeechToText::new(&services.stt_url, services.connect_timeout)?;
        let tts = TextToSpeech::new(&services.tts_url, services.connect_timeout)?;

        tracing::debug!(
            ollama = %services.ollama_url,
            stt = %services.stt_url,
            tts = %services.tts_url,
            model = %config.llm.model,
            "model controller configured"
        );

        Ok(Self::new(Arc::new(llm), Arc::new(stt), Arc::new(tts)))
    }

    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if the STT service fails or hears nothing
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        self.stt.transcribe(audio).await
    }

    /// Stream a reply for the conversation
    ///
    /// # Errors
    ///
    /// Returns error if the model request cannot be started
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        self.llm.stream_chat(messages).await
    }

    /// Stream synthesized audio for `text`
    ///
    /// # Errors
    ///
    /// Returns error if the TTS request cannot be started
    pub async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        self.tts.synthesize(text).await
    }

    /// Model identifier used for chat
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Probe all three services concurrently
    pub async fn health(&self) -> HealthReport {
        let (llm, stt, tts) = tokio::join!(self.llm.health(), self.stt.health(), self.tts.health());

        HealthReport {
            llm: ServiceStatus::from_result(llm),
            stt: ServiceStatus::from_result(stt),
            tts: ServiceStatus::from_result(tts),
        }
    }
}

impl std::fmt::Debug for ModelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelController")
            .field("model", &self.llm.model_name())
            .finish_non_exhaustive()
    }
}
