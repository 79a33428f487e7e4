//! TOML configuration file loading
//!
//! Supports `~/.config/voicebot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoicebotConfigFile {
    /// Service endpoints
    #[serde(default)]
    pub services: ServicesFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Conversation memory configuration
    #[serde(default)]
    pub memory: MemoryFileConfig,

    /// Voice activity detection tuning
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Audio output configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Service endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServicesFileConfig {
    /// Ollama base URL (e.g. "http://localhost:11434")
    pub ollama_url: Option<String>,

    /// STT service base URL
    pub stt_url: Option<String>,

    /// TTS service base URL
    pub tts_url: Option<String>,

    /// TCP connect timeout for all services
    pub connect_timeout_secs: Option<u64>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Ollama model tag (e.g. "mistral:7b-instruct")
    pub model: Option<String>,

    /// System prompt sent ahead of every conversation
    pub system_prompt: Option<String>,
}

/// Memory configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFileConfig {
    /// Most recent messages kept per context
    pub max_messages: Option<usize>,

    /// JSON file the history is persisted to
    pub path: Option<PathBuf>,
}

/// VAD configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub energy_threshold: Option<f32>,
    pub silence_frames: Option<usize>,
    pub min_speech_frames: Option<usize>,
    pub max_wait_secs: Option<u64>,
    pub max_utterance_secs: Option<u64>,
}

/// Audio output configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Sample rate of the PCM the TTS service produces
    pub playback_sample_rate: Option<u32>,
}

/// Load the TOML config file
///
/// With no explicit path the standard location is used, and a missing or
/// unparsable file falls back to `VoicebotConfigFile::default()`. An explicit
/// path must exist and parse.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<VoicebotConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(VoicebotConfigFile::default());
    };

    if !path.exists() {
        return Ok(VoicebotConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(VoicebotConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(VoicebotConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/voicebot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicebot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let fc: VoicebotConfigFile = toml::from_str(
            r#"
            [llm]
            model = "llama3"

            [memory]
            max_messages = 10
            "#,
        )
        .unwrap();

        assert_eq!(fc.llm.model.as_deref(), Some("llama3"));
        assert_eq!(fc.memory.max_messages, Some(10));
        assert!(fc.services.ollama_url.is_none());
        assert!(fc.vad.energy_threshold.is_none());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let parsed: std::result::Result<VoicebotConfigFile, _> =
            toml::from_str("[channels]\ndiscord = true\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config_file(Some(&missing)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_explicit_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[services]\nstt_url = \"http://stt:9000\"\n").unwrap();

        let fc = load_config_file(Some(&path)).unwrap();
        assert_eq!(fc.services.stt_url.as_deref(), Some("http://stt:9000"));
    }
}
