//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use voicebot::voice::{AudioStream, Synthesizer, Transcriber};
use voicebot::{
    ChatMessage, ChatModel, Error, MemoryStore, ModelController, Result, TextStream, VoiceBot,
};

/// Chat model that replays a fixed list of chunks and records every prompt
#[derive(Default)]
pub struct ScriptedModel {
    chunks: Vec<String>,
    fail_after: Option<usize>,
    healthy_calls: usize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Yield `n` chunks, then an error
    pub fn failing_after(chunks: &[&str], n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(chunks)
        }
    }

    /// Answer the first `healthy_calls` requests in full, then fail like [`Self::failing_after`]
    pub fn failing_after_calls(chunks: &[&str], n: usize, healthy_calls: usize) -> Self {
        Self {
            healthy_calls,
            ..Self::failing_after(chunks, n)
        }
    }

    /// Every message list the model has been asked to answer
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after.filter(|_| call >= self.healthy_calls) {
            items.truncate(n);
            items.push(Err(Error::Llm("connection reset".to_string())));
        }

        Ok(Box::pin(stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Chat model whose stream never ends
pub struct EndlessModel;

#[async_trait]
impl ChatModel for EndlessModel {
    async fn stream_chat(&self, _messages: &[ChatMessage]) -> Result<TextStream> {
        Ok(Box::pin(stream::repeat_with(|| Ok::<_, Error>("la ".to_string()))))
    }

    fn model_name(&self) -> &str {
        "endless"
    }
}

/// Transcriber that always hears the same thing
pub struct FixedTranscriber(pub String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::NoSpeech);
        }
        Ok(self.0.clone())
    }
}

/// Synthesizer that emits one sample per character and records its input
#[derive(Default)]
pub struct RecordingSynthesizer {
    fail: bool,
    spoken: Mutex<Vec<String>>,
}

impl RecordingSynthesizer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every text the synthesizer has been asked to voice
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        if self.fail {
            return Err(Error::Tts("service unavailable".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());

        let samples = vec![0.25_f32; text.chars().count()];
        Ok(Box::pin(stream::iter(vec![Ok::<_, Error>(samples)])))
    }
}

/// A bot wired to in-process services
pub fn test_bot(
    llm: Arc<dyn ChatModel>,
    tts: Arc<dyn Synthesizer>,
    max_messages: usize,
) -> VoiceBot {
    let stt = Arc::new(FixedTranscriber("hello".to_string()));
    let controller = ModelController::new(llm, stt, tts);
    VoiceBot::with_parts(controller, MemoryStore::new(max_messages))
}

/// A bot that answers with `chunks` and has no interesting TTS
pub fn scripted_bot(chunks: &[&str]) -> VoiceBot {
    test_bot(
        Arc::new(ScriptedModel::new(chunks)),
        Arc::new(RecordingSynthesizer::default()),
        50,
    )
}

/// Generate a sine wave at `frequency` Hz
#[allow(clippy::cast_precision_loss)]
pub fn sine(frequency: f32, amplitude: f32, samples: usize, sample_rate: u32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude
        })
        .collect()
}

/// Generate silence
pub fn silence(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}
