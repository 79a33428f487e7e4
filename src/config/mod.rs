//! Configuration management for voicebot

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

use file::VoicebotConfigFile;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default STT service endpoint
pub const DEFAULT_STT_URL: &str = "http://localhost:8002";

/// Default TTS service endpoint
pub const DEFAULT_TTS_URL: &str = "http://localhost:8001";

/// Default Ollama model tag
pub const DEFAULT_MODEL: &str = "mistral:7b-instruct";

/// Default per-context history bound
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// voicebot configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// External service endpoints
    pub services: ServicesConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// Conversation memory settings
    pub memory: MemoryConfig,

    /// Voice activity detection tuning
    pub vad: VadConfig,

    /// Audio output settings
    pub audio: AudioConfig,
}

/// External service endpoints
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    /// Ollama base URL
    pub ollama_url: String,

    /// STT service base URL
    pub stt_url: String,

    /// TTS service base URL
    pub tts_url: String,

    /// TCP connect timeout applied to every service
    pub connect_timeout: Duration,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            stt_url: DEFAULT_STT_URL.to_string(),
            tts_url: DEFAULT_TTS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama model tag
    pub model: String,

    /// Optional system prompt, sent first and never stored in memory
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
        }
    }
}

/// Conversation memory settings
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Most recent messages kept per context
    pub max_messages: usize,

    /// JSON file for persistence; in-memory only when unset
    pub path: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            path: None,
        }
    }
}

/// Voice activity detection tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,

    /// Consecutive silent frames after speech that end the utterance
    pub silence_frames: usize,

    /// Utterances with fewer speech frames are discarded as noise
    pub min_speech_frames: usize,

    /// Give up if no speech starts within this time
    pub max_wait: Duration,

    /// Hard cap on a single utterance
    pub max_utterance: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            silence_frames: 20,
            min_speech_frames: 3,
            max_wait: Duration::from_secs(15),
            max_utterance: Duration::from_secs(30),
        }
    }
}

/// Audio output settings
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// Sample rate of the float32 PCM the TTS service produces
    pub playback_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_sample_rate: 24000,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or a value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a merged value is invalid
    pub fn from_sources<F>(fc: VoicebotConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let services = ServicesConfig {
            ollama_url: env("VOICEBOT_OLLAMA_URL")
                .or(fc.services.ollama_url)
                .unwrap_or(defaults.services.ollama_url),
            stt_url: env("VOICEBOT_STT_URL")
                .or(fc.services.stt_url)
                .unwrap_or(defaults.services.stt_url),
            tts_url: env("VOICEBOT_TTS_URL")
                .or(fc.services.tts_url)
                .unwrap_or(defaults.services.tts_url),
            connect_timeout: fc
                .services
                .connect_timeout_secs
                .map_or(defaults.services.connect_timeout, Duration::from_secs),
        };

        let llm = LlmConfig {
            model: env("VOICEBOT_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.llm.model),
            system_prompt: env("VOICEBOT_SYSTEM_PROMPT")
                .or(fc.llm.system_prompt)
                .filter(|p| !p.trim().is_empty()),
        };

        let max_messages = match env("VOICEBOT_MAX_MESSAGES") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("VOICEBOT_MAX_MESSAGES is not a number: {raw}"))
            })?,
            None => fc
                .memory
                .max_messages
                .unwrap_or(defaults.memory.max_messages),
        };

        let memory = MemoryConfig {
            max_messages,
            path: env("VOICEBOT_MEMORY_PATH")
                .map(PathBuf::from)
                .or(fc.memory.path),
        };

        let vad = VadConfig {
            energy_threshold: fc
                .vad
                .energy_threshold
                .unwrap_or(defaults.vad.energy_threshold),
            silence_frames: fc.vad.silence_frames.unwrap_or(defaults.vad.silence_frames),
            min_speech_frames: fc
                .vad
                .min_speech_frames
                .unwrap_or(defaults.vad.min_speech_frames),
            max_wait: fc
                .vad
                .max_wait_secs
                .map_or(defaults.vad.max_wait, Duration::from_secs),
            max_utterance: fc
                .vad
                .max_utterance_secs
                .map_or(defaults.vad.max_utterance, Duration::from_secs),
        };

        let audio = AudioConfig {
            playback_sample_rate: fc
                .audio
                .playback_sample_rate
                .unwrap_or(defaults.audio.playback_sample_rate),
        };

        let config = Self {
            services,
            llm,
            memory,
            vad,
            audio,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the crate cannot work with
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_messages == 0 {
            return Err(Error::Config(
                "memory.max_messages must be at least 1".to_string(),
            ));
        }
        if self.vad.silence_frames == 0 {
            return Err(Error::Config(
                "vad.silence_frames must be at least 1".to_string(),
            ));
        }
        if !(self.vad.energy_threshold > 0.0 && self.vad.energy_threshold < 1.0) {
            return Err(Error::Config(format!(
                "vad.energy_threshold must be in (0, 1), got {}",
                self.vad.energy_threshold
            )));
        }
        if self.audio.playback_sample_rate == 0 {
            return Err(Error::Config(
                "audio.playback_sample_rate must be positive".to_string(),
            ));
        }
        for (name, url) in [
            ("ollama_url", &self.services.ollama_url),
            ("stt_url", &self.services.stt_url),
            ("tts_url", &self.services.tts_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "services.{name} must be an http(s) URL, got {url}"
                )));
            }
        }
        Ok(())
    }
}
