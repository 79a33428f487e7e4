//! Voice processing module
//!
//! Microphone capture with voice activity detection, clients for the STT and
//! TTS services, and speaker playback.

mod capture;
mod playback;
pub mod stt;
pub mod tts;
pub mod vad;

pub use capture::{AudioCapture, SAMPLE_RATE, capture_utterance, samples_to_wav};
pub use playback::AudioPlayback;
pub use stt::{SpeechToText, Transcriber};
pub use tts::{AudioStream, Synthesizer, TextToSpeech, decode_pcm_f32};
pub use vad::{FRAME_SAMPLES, VadState, VoiceActivityDetector, frame_energy};
