//! Voice activity detection
//!
//! Energy-based utterance segmentation over fixed 30 ms frames. Recording
//! starts on the first speech frame, keeps the trailing silence, and ends once
//! more than `silence_frames` consecutive quiet frames follow speech.

use crate::config::VadConfig;

use super::capture::SAMPLE_RATE;

/// Frame length in milliseconds
pub const FRAME_MS: u32 = 30;

/// Samples per frame at the capture rate
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// State of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech yet
    Waiting,
    /// Speech started, accumulating the utterance
    Recording,
    /// Enough trailing silence seen, utterance ready
    Complete,
}

/// Segments a single utterance out of a sample stream
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    pending: Vec<f32>,
    utterance: Vec<f32>,
    speech_frames: usize,
    silence_run: usize,
}

impl VoiceActivityDetector {
    #[must_use]
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Waiting,
            pending: Vec::new(),
            utterance: Vec::new(),
            speech_frames: 0,
            silence_run: 0,
        }
    }

    /// Feed captured samples; returns the state after all whole frames
    ///
    /// Partial frames are carried over to the next call. Once complete,
    /// further samples are ignored until [`reset`](Self::reset).
    pub fn process(&mut self, samples: &[f32]) -> VadState {
        if self.state == VadState::Complete {
            return self.state;
        }

        self.pending.extend_from_slice(samples);

        let whole = self.pending.len() / FRAME_SAMPLES * FRAME_SAMPLES;
        let frames: Vec<f32> = self.pending.drain(..whole).collect();

        for frame in frames.chunks_exact(FRAME_SAMPLES) {
            self.process_frame(frame);
            if self.state == VadState::Complete {
                self.pending.clear();
                break;
            }
        }

        self.state
    }

    fn process_frame(&mut self, frame: &[f32]) {
        let energy = frame_energy(frame);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            VadState::Waiting => {
                if is_speech {
                    tracing::debug!(energy, "speech detected, recording");
                    self.state = VadState::Recording;
                    self.utterance.extend_from_slice(frame);
                    self.speech_frames = 1;
                    self.silence_run = 0;
                }
            }
            VadState::Recording => {
                self.utterance.extend_from_slice(frame);

                if is_speech {
                    self.speech_frames += 1;
                    self.silence_run = 0;
                } else {
                    self.silence_run += 1;
                }

                if self.silence_run > self.config.silence_frames {
                    if self.speech_frames >= self.config.min_speech_frames {
                        tracing::debug!(
                            samples = self.utterance.len(),
                            speech_frames = self.speech_frames,
                            "speech ended"
                        );
                        self.state = VadState::Complete;
                    } else {
                        tracing::trace!(
                            speech_frames = self.speech_frames,
                            "too short, discarding as noise"
                        );
                        self.reset();
                    }
                }
            }
            VadState::Complete => {}
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Whether an utterance is ready
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == VadState::Complete
    }

    /// Samples recorded so far
    #[must_use]
    pub fn utterance(&self) -> &[f32] {
        &self.utterance
    }

    /// Hand out the utterance if it holds enough speech, then reset
    ///
    /// Also accepts an utterance still recording (capture cut short by a
    /// time cap).
    pub fn finish(&mut self) -> Option<Vec<f32>> {
        let usable = match self.state {
            VadState::Complete => true,
            VadState::Recording => self.speech_frames >= self.config.min_speech_frames,
            VadState::Waiting => false,
        };

        let utterance = std::mem::take(&mut self.utterance);
        self.reset();
        usable.then_some(utterance)
    }

    /// Return to waiting, dropping everything buffered
    pub fn reset(&mut self) {
        self.state = VadState::Waiting;
        self.utterance.clear();
        self.speech_frames = 0;
        self.silence_run = 0;
    }
}

/// RMS energy of a frame
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn frame_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
