//! Audible feedback on the kiosk speaker

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for synthesized tones
const TONE_SAMPLE_RATE: u32 = 24000;

/// Tone amplitude (30% volume)
const TONE_AMPLITUDE: f32 = 0.3;

/// Feedback pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Start accepted, tap your tag
    Prompt,
    /// Credential matched
    Authorized,
    /// Evidence uploaded, return complete
    Complete,
    /// Session abandoned by the watchdog
    Aborted,
}

impl Pattern {
    pub const ALL: [Self; 4] = [Self::Prompt, Self::Authorized, Self::Complete, Self::Aborted];

    /// Parse a pattern name from configuration
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "prompt" => Some(Self::Prompt),
            "authorized" => Some(Self::Authorized),
            "complete" => Some(Self::Complete),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Tone sequence as (frequency Hz, duration ms); zero frequency is a rest
    const fn tones(self) -> &'static [(f32, u64)] {
        match self {
            Self::Prompt => &[(880.0, 150)],
            Self::Authorized => &[(660.0, 100), (0.0, 40), (880.0, 100)],
            Self::Complete => &[(523.0, 120), (659.0, 120), (784.0, 200)],
            Self::Aborted => &[(440.0, 400), (0.0, 80), (330.0, 400)],
        }
    }
}

/// Plays feedback patterns
#[async_trait]
pub trait SoundPlayer: Send + Sync {
    /// Play `pattern` to completion
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn play(&self, pattern: Pattern) -> Result<()>;
}

/// Player for kiosks without a speaker
#[derive(Debug, Default)]
pub struct NoopSound;

#[async_trait]
impl SoundPlayer for NoopSound {
    async fn play(&self, pattern: Pattern) -> Result<()> {
        tracing::trace!(?pattern, "sound disabled");
        Ok(())
    }
}

/// Plays patterns on the default output device
#[derive(Debug, Clone, Default)]
pub struct CpalSound {
    /// WAV files overriding the synthesized tones
    files: HashMap<Pattern, PathBuf>,
}

impl CpalSound {
    /// Create a player, checking that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new(files: HashMap<Pattern, PathBuf>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Actuator("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            custom_patterns = files.len(),
            "sound output initialized"
        );

        Ok(Self { files })
    }

    fn samples_for(&self, pattern: Pattern) -> Result<(Vec<f32>, u32)> {
        if let Some(path) = self.files.get(&pattern) {
            return load_wav(path);
        }
        Ok((synthesize(pattern.tones(), TONE_SAMPLE_RATE), TONE_SAMPLE_RATE))
    }
}

#[async_trait]
impl SoundPlayer for CpalSound {
    async fn play(&self, pattern: Pattern) -> Result<()> {
        let (samples, sample_rate) = self.samples_for(pattern)?;

        // cpal streams are not Send; play on a blocking thread
        tokio::task::spawn_blocking(move || play_samples_blocking(samples, sample_rate))
            .await
            .map_err(|e| Error::Actuator(format!("playback task failed: {e}")))?
    }
}

/// Render a tone sequence to mono samples
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn synthesize(tones: &[(f32, u64)], sample_rate: u32) -> Vec<f32> {
    let mut samples = Vec::new();

    for &(frequency, millis) in tones {
        let count = (u64::from(sample_rate) * millis / 1000) as usize;
        samples.extend((0..count).map(|i| {
            if frequency <= 0.0 {
                return 0.0;
            }
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * TONE_AMPLITUDE
        }));
    }

    samples
}

/// Load a WAV file as mono f32 samples
fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Actuator(format!("failed to open {}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Actuator(format!("bad WAV data: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Actuator(format!("bad WAV data: {e}")))?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Find an output device and config supporting `sample_rate`
fn open_output(sample_rate: u32) -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Actuator("no output device".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Actuator(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Actuator("no suitable output config found".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    Ok((device, config))
}

/// Play samples, returning once they have been rendered
fn play_samples_blocking(samples: Vec<f32>, sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let (device, config) = open_output(sample_rate)?;
    let channels = usize::from(config.channels);
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));

    let samples_clone = Arc::clone(&samples);
    let position_clone = Arc::clone(&position);
    let finished_clone = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_clone.lock().unwrap_or_else(PoisonError::into_inner);

                for frame in data.chunks_mut(channels) {
                    let sample = if let Some(s) = samples_clone.get(*pos) {
                        *pos += 1;
                        *s
                    } else {
                        *finished_clone.lock().unwrap_or_else(PoisonError::into_inner) = true;
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "sound playback error");
            },
            None,
        )
        .map_err(|e| Error::Actuator(e.to_string()))?;

    stream.play().map_err(|e| Error::Actuator(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate.max(1));
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !*finished.lock().unwrap_or_else(PoisonError::into_inner) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::trace!(samples = sample_count, "pattern played");
    Ok(())
}

/// Play a pattern, logging instead of failing
pub async fn play_best_effort(player: &dyn SoundPlayer, pattern: Pattern) {
    if let Err(e) = player.play(pattern).await {
        tracing::warn!(?pattern, error = %e, "failed to play sound");
    }
}
