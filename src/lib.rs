//! voicebot - Conversational client for locally hosted speech and language models
//!
//! This library coordinates three external services behind one small API:
//! - Speech-to-text (Whisper service) fed by microphone voice activity detection
//! - A generative language model served by Ollama, streamed token by token
//! - Text-to-speech (Kokoro service) voicing the reply sentence by sentence
//!
//! Conversation history is kept per context id, bounded, and optionally
//! persisted to disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     VoiceBot                         │
//! │        ask  │  clear_memory  │  run_vad              │
//! └───────┬──────────────┬───────────────┬──────────────┘
//!         │              │               │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌──────▼──────────────┐
//! │ MemoryStore  │ │ Controller │ │ Capture + VAD       │
//! │ per context  │ │ LLM STT TTS│ │ cpal, 30 ms frames  │
//! └──────────────┘ └─────┬──────┘ └─────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────────────┐
//! │   Ollama /api/chat │ /stt/transcribe │ /tts/stream   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod bot;
pub mod config;
pub mod controller;
pub mod error;
pub mod lines;
pub mod llm;
pub mod memory;
pub mod sentence;
pub mod voice;

pub use bot::{Fragment, FragmentStream, VoiceBot};
pub use config::Config;
pub use controller::{HealthReport, ModelController, ServiceStatus};
pub use error::{Error, Result};
pub use llm::{ChatMessage, ChatModel, OllamaClient, TextStream};
pub use memory::{DEFAULT_CONTEXT, MemoryStore, Message, Role, resolve_context};
pub use sentence::SentenceBuffer;
