//! Generic `AudioSink` trait and the [`Tone`] waveform it plays.
//!
//! Unlike the other drivers, [`AudioSink`] takes `&self`: a tone may be
//! blocking inside [`AudioSink::play_tone`] on one thread while another
//! thread calls [`AudioSink::stop`] to cut it short.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use echonav_types::NavError;

/// A mono PCM waveform ready for playback.
///
/// Samples are shared, so cloning a tone does not copy the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tone {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Tone {
    /// Wrap existing samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Synthesise a sine wave of `frequency_hz` lasting `duration`.
    pub fn sine(frequency_hz: f32, duration: Duration, sample_rate: u32, amplitude: f32) -> Self {
        let count = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        let samples = (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (TAU * frequency_hz * t).sin()
            })
            .collect::<Vec<_>>();
        Self::new(samples, sample_rate)
    }

    /// PCM samples in `[-1.0, 1.0]`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Playback rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// An audio output that plays one [`Tone`] at a time.
pub trait AudioSink: Send + Sync {
    /// Play `tone`, returning once playback has finished or was stopped.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the output device rejects the
    /// buffer.
    fn play_tone(&self, tone: &Tone) -> Result<(), NavError>;

    /// Abort any tone currently playing.
    fn stop(&self);
}
