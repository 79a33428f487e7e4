//! Error types for voicebot

use thiserror::Error;

/// Result type alias for voicebot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voicebot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice capture finished without any speech
    #[error("no speech detected")]
    NoSpeech,

    /// STT service answered but produced no text
    #[error("could not transcribe speech")]
    NoTranscript,

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model error (request or mid-stream failure)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the interactive loop should prompt again instead of exiting
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoSpeech
                | Self::NoTranscript
                | Self::Stt(_)
                | Self::Llm(_)
                | Self::Tts(_)
                | Self::Http(_)
        )
    }
}
