//! Audio playback to speakers
//!
//! A single output stream stays open and pulls from a sample queue, so TTS
//! chunks can be enqueued while the reply is still streaming.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::{Error, Result};

/// Plays mono float32 PCM on the default output device
pub struct AudioPlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
    _stream: Stream,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let source = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = source.lock().ok();
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.as_mut().and_then(|q| q.pop_front()).unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            queue,
            sample_rate,
            _stream: stream,
        })
    }

    /// Queue samples behind whatever is already playing
    pub fn enqueue(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples.iter().copied());
        }
    }

    /// Samples still waiting to be played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().map_or(0, |q| q.len())
    }

    /// Wait until the queue has played out
    ///
    /// Gives up (and clears the queue) if playback takes much longer than the
    /// queued audio should.
    #[allow(clippy::future_not_send)]
    pub async fn drain(&self) {
        let pending = self.pending() as u64;
        let expected = Duration::from_millis(pending * 1000 / u64::from(self.sample_rate));
        let deadline = Instant::now() + expected + Duration::from_millis(500);

        while self.pending() > 0 {
            if Instant::now() > deadline {
                tracing::warn!(remaining = self.pending(), "playback drain timed out");
                self.stop();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tracing::debug!("playback complete");
    }

    /// Drop everything queued
    pub fn stop(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    /// Play samples and wait for them to finish
    #[allow(clippy::future_not_send)]
    pub async fn play(&self, samples: &[f32]) {
        self.enqueue(samples);
        self.drain().await;
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
