//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::config::VadConfig;
use crate::{Error, Result};

use super::vad::{FRAME_MS, VadState, VoiceActivityDetector};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Microphone input at [`SAMPLE_RATE`], folded down to mono
///
/// Samples accumulate in a shared buffer filled by the cpal callback until
/// [`take_samples`](Self::take_samples) drains them.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    samples: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// Prefers a mono configuration; stereo input is accepted and averaged.
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or it cannot run at 16 kHz
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let rate = SampleRate(SAMPLE_RATE);
        let supports = |channels: u16| -> Result<Option<StreamConfig>> {
            let found = device
                .supported_input_configs()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                });
            Ok(found.map(|c| c.with_sample_rate(rate).config()))
        };

        let config = match supports(1)? {
            Some(config) => config,
            None => supports(2)?.ok_or_else(|| {
                Error::Audio(format!("input device cannot record at {SAMPLE_RATE} Hz"))
            })?,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "microphone opened"
        );

        Ok(Self {
            device,
            config,
            samples: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Begin recording; a no-op while already recording
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let sink = Arc::clone(&self.samples);
        let channels = usize::from(self.config.channels);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(mut sink) = sink.lock() else {
                        return;
                    };
                    if channels == 1 {
                        sink.extend_from_slice(data);
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        sink.extend(
                            data.chunks_exact(channels)
                                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                        );
                    }
                },
                |err| {
                    tracing::error!(error = %err, "microphone stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("recording");
        Ok(())
    }

    /// Stop recording and close the input stream
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("recording stopped");
        }
    }

    /// Drain everything recorded since the last call
    #[must_use]
    pub fn take_samples(&self) -> Vec<f32> {
        self.samples
            .lock()
            .map(|mut samples| std::mem::take(&mut *samples))
            .unwrap_or_default()
    }

    /// Capture rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Block until one utterance is captured from the default microphone
///
/// Returns 16-bit mono WAV bytes, or `None` when no speech started within
/// `max_wait` or `cancel` was raised. Recording is cut at `max_utterance`.
///
/// # Errors
///
/// Returns error if the input device cannot be opened or the WAV cannot be encoded
pub fn capture_utterance(config: &VadConfig, cancel: &AtomicBool) -> Result<Option<Vec<u8>>> {
    let mut capture = AudioCapture::new()?;
    let mut detector = VoiceActivityDetector::new(*config);
    let poll = Duration::from_millis(u64::from(FRAME_MS));

    capture.start()?;
    tracing::info!("listening for speech");
    let started = Instant::now();

    loop {
        std::thread::sleep(poll);

        if cancel.load(Ordering::Relaxed) {
            capture.stop();
            tracing::debug!("voice capture cancelled");
            return Ok(None);
        }

        let state = detector.process(&capture.take_samples());
        let Some(end) = capture_end(state, detector.utterance().len(), started.elapsed(), config)
        else {
            continue;
        };

        match end {
            CaptureEnd::Complete => {}
            CaptureEnd::NoSpeech => {
                tracing::info!(waited = ?config.max_wait, "no speech before timeout");
            }
            CaptureEnd::LengthCap => tracing::debug!("utterance length cap reached"),
            CaptureEnd::Deadline => {
                tracing::warn!(
                    samples = detector.utterance().len(),
                    "capture deadline passed, input may have stalled"
                );
            }
        }
        break;
    }

    capture.stop();

    match detector.finish() {
        Some(samples) => {
            tracing::info!(samples = samples.len(), "utterance captured");
            samples_to_wav(&samples, SAMPLE_RATE).map(Some)
        }
        None => Ok(None),
    }
}

/// Why the capture loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureEnd {
    /// The detector heard the end of an utterance
    Complete,
    /// Nothing was said within `max_wait`
    NoSpeech,
    /// The utterance reached `max_utterance` worth of samples
    LengthCap,
    /// Wall-clock limit of `max_wait + max_utterance` passed
    Deadline,
}

/// Decide whether capture is over
///
/// The wall-clock deadline also covers an input stream that stops delivering
/// samples mid-utterance, which would otherwise never reach the length cap.
fn capture_end(
    state: VadState,
    recorded: usize,
    elapsed: Duration,
    config: &VadConfig,
) -> Option<CaptureEnd> {
    match state {
        VadState::Complete => Some(CaptureEnd::Complete),
        _ if elapsed > config.max_wait + config.max_utterance => Some(CaptureEnd::Deadline),
        VadState::Waiting if elapsed > config.max_wait => Some(CaptureEnd::NoSpeech),
        VadState::Recording if recorded >= duration_to_samples(config.max_utterance) => {
            Some(CaptureEnd::LengthCap)
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_to_samples(duration: Duration) -> usize {
    (duration.as_millis() * u128::from(SAMPLE_RATE) / 1000) as usize
}

/// Convert f32 samples to WAV bytes for the STT service
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
