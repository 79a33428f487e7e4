//! Conversation orchestrator
//!
//! [`VoiceBot::ask`] records the user turn, streams the model reply as text
//! fragments, optionally voices it sentence by sentence, and records the
//! assistant turn once the reply is complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::VadConfig;
use crate::controller::ModelController;
use crate::llm::ChatMessage;
use crate::memory::{MemoryStore, Message, resolve_context};
use crate::sentence::SentenceBuffer;
use crate::voice::capture_utterance;
use crate::{Config, Error, Result};

/// One piece of a streamed reply
///
/// Either part may be empty: text arrives as the model produces it, audio
/// as the TTS service voices each finished sentence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub audio: Vec<f32>,
}

impl Fragment {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: Vec::new(),
        }
    }

    #[must_use]
    pub const fn audio(samples: Vec<f32>) -> Self {
        Self {
            text: String::new(),
            audio: samples,
        }
    }

    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    #[must_use]
    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }
}

/// Stream of reply fragments for one turn
pub type FragmentStream<'a> = BoxStream<'a, Result<Fragment>>;

type TurnLock = Arc<tokio::sync::Mutex<()>>;

/// Conversational front end over the model services
pub struct VoiceBot {
    controller: ModelController,
    memory: MemoryStore,
    system_prompt: Option<String>,
    vad: VadConfig,
    turns: Mutex<HashMap<String, TurnLock>>,
}

impl VoiceBot {
    /// Build a bot talking to the configured services
    ///
    /// # Errors
    ///
    /// Returns error if the service clients cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let controller = ModelController::from_config(config)?;
        let memory = MemoryStore::from_config(&config.memory);

        tracing::info!(
            model = controller.model_name(),
            max_messages = memory.max_messages(),
            persisted = config.memory.path.is_some(),
            "voice bot ready"
        );

        Ok(Self::with_parts(controller, memory)
            .with_system_prompt(config.llm.system_prompt.clone())
            .with_vad_config(config.vad))
    }

    /// Build a bot from an existing controller and memory store
    #[must_use]
    pub fn with_parts(controller: ModelController, memory: MemoryStore) -> Self {
        Self {
            controller,
            memory,
            system_prompt: None,
            vad: VadConfig::default(),
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Prefix every conversation with a system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Override voice capture tuning
    #[must_use]
    pub const fn with_vad_config(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    /// Ask the bot something and stream its reply
    ///
    /// Nothing happens until the stream is first polled. Turns on the same
    /// context run one at a time; other contexts are not blocked. On a model
    /// or TTS failure the error is yielded, the stream ends, and no assistant
    /// message is stored. Dropping the stream early has the same effect on
    /// memory and stops reading from the services.
    pub fn ask(
        &self,
        prompt: &str,
        with_tts: bool,
        context_id: Option<&str>,
    ) -> FragmentStream<'_> {
        let prompt = prompt.to_string();
        let context_id = resolve_context(context_id).to_string();

        Box::pin(stream! {
            let _turn = self.turn_lock(&context_id).lock_owned().await;

            tracing::info!(context_id = %context_id, with_tts, "user turn");
            self.memory.append(&context_id, Message::user(prompt));

            let messages = self.build_prompt(&context_id);
            let mut text = match self.controller.stream_chat(&messages).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        context_id = %context_id,
                        error = %e,
                        "generation failed to start"
                    );
                    yield Err(e);
                    return;
                }
            };

            let mut reply = String::new();
            let mut sentences = SentenceBuffer::new();

            while let Some(chunk) = text.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(
                            context_id = %context_id,
                            partial_len = reply.len(),
                            error = %e,
                            "generation failed mid-stream, reply discarded"
                        );
                        yield Err(e);
                        return;
                    }
                };

                if chunk.is_empty() {
                    continue;
                }

                reply.push_str(&chunk);
                let sentence = if with_tts { sentences.push(&chunk) } else { None };
                yield Ok(Fragment::text(chunk));

                if let Some(sentence) = sentence {
                    let mut audio = self.speak(sentence);
                    while let Some(item) = audio.next().await {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                }
            }

            if let Some(rest) = sentences.finish() {
                let mut audio = self.speak(rest);
                while let Some(item) = audio.next().await {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }

            if reply.is_empty() {
                tracing::warn!(context_id = %context_id, "model returned an empty reply");
            } else {
                tracing::debug!(
                    context_id = %context_id,
                    reply_len = reply.len(),
                    "assistant turn"
                );
                self.memory.append(&context_id, Message::assistant(reply));
            }
        })
    }

    /// Voice one sentence as a stream of audio fragments
    fn speak(&self, text: String) -> FragmentStream<'_> {
        Box::pin(stream! {
            tracing::debug!(text = %text, "speaking");
            let mut audio = match self.controller.synthesize(&text).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis failed");
                    yield Err(e);
                    return;
                }
            };

            while let Some(samples) = audio.next().await {
                yield samples.map(Fragment::audio);
            }
        })
    }

    /// System prompt followed by the context's history
    fn build_prompt(&self, context_id: &str) -> Vec<ChatMessage> {
        self.system_prompt
            .iter()
            .map(ChatMessage::system)
            .chain(self.memory.history(context_id).iter().map(ChatMessage::from))
            .collect()
    }

    fn turn_lock(&self, context_id: &str) -> TurnLock {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(turns.entry(context_id.to_string()).or_default())
    }

    /// Forget one context (`"general"` when none is given)
    pub fn clear_memory(&self, context_id: Option<&str>) {
        self.memory.clear(resolve_context(context_id));
    }

    /// Forget every context
    pub fn clear_all_memory(&self) {
        self.memory.clear_all();
    }

    /// History of one context (`"general"` when none is given)
    #[must_use]
    pub fn history(&self, context_id: Option<&str>) -> Vec<Message> {
        self.memory.history(resolve_context(context_id))
    }

    /// The bot's memory store
    #[must_use]
    pub const fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The bot's service controller
    #[must_use]
    pub const fn controller(&self) -> &ModelController {
        &self.controller
    }

    /// Capture one utterance from the microphone
    ///
    /// Runs on a blocking worker thread. Returns WAV bytes, or `None` if no
    /// speech was heard before the wait timed out. Dropping the future stops
    /// the capture and releases the microphone.
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be used
    pub async fn run_vad(&self) -> Result<Option<Vec<u8>>> {
        let config = self.vad;
        let cancel = CancelOnDrop::default();
        let flag = Arc::clone(&cancel.0);

        tokio::task::spawn_blocking(move || capture_utterance(&config, &flag))
            .await
            .map_err(|e| Error::Audio(format!("voice capture task failed: {e}")))?
    }

    /// Capture an utterance and transcribe it
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSpeech`] if nothing was heard, [`Error::NoTranscript`]
    /// if the STT service produced no text, or any capture/STT failure
    pub async fn listen(&self) -> Result<String> {
        let audio = self.run_vad().await?.ok_or(Error::NoSpeech)?;
        self.controller.transcribe(&audio).await
    }
}

/// Raises its flag when dropped
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for VoiceBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBot")
            .field("controller", &self.controller)
            .field("system_prompt", &self.system_prompt)
            .finish_non_exhaustive()
    }
}
