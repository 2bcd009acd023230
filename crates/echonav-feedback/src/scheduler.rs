//! Proximity beeps and the turn-arrow display.
//!
//! The [`FeedbackScheduler`] owns the two operator-facing outputs:
//!
//! - **Beep loop** – a background thread that reads the shared
//!   [`BeepState`], plays one cached tone and sleeps for the current
//!   interval.  With no interval it idles and polls again.  The state is
//!   only locked long enough to copy it, never across playback or sleep.
//! - **Arrow display** – driven synchronously through [`TurnSink`]: every
//!   turn edge from the angle estimator lights the matching pattern.
//!
//! The polling loop feeds the scheduler through
//! [`update_closest`](FeedbackScheduler::update_closest), which picks the
//! nearest obstacle and recomputes the cadence in a single critical section.

use std::sync::Arc;
use std::time::Duration;

use echonav_hal::{AudioSink, DisplayDriver, Pattern, Tone};
use echonav_kernel::{BackgroundTask, CancelToken};
use echonav_perception::TurnSink;
use echonav_types::{CarCorner, NavError, RangeReading, TurnState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cadence::{CadenceConfig, CadenceMapper};

// ────────────────────────────────────────────────────────────────────────────
// Configuration & state
// ────────────────────────────────────────────────────────────────────────────

/// Beep tone and loop pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeepConfig {
    pub tone_hz: f32,
    pub tone_ms: u64,
    pub sample_rate: u32,
    pub amplitude: f32,
    /// Poll period while no obstacle is in range (ms).
    pub idle_poll_ms: u64,
    /// Bounded join when stopping the loop (ms).
    pub join_timeout_ms: u64,
}

impl Default for BeepConfig {
    fn default() -> Self {
        Self {
            tone_hz: 1_250.0,
            tone_ms: 50,
            sample_rate: 44_100,
            amplitude: 0.5,
            idle_poll_ms: 100,
            join_timeout_ms: 1_000,
        }
    }
}

impl BeepConfig {
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] for a silent or clipping tone.
    pub fn validate(&self) -> Result<(), NavError> {
        if self.sample_rate == 0 {
            return Err(NavError::InvalidConfig("sample_rate must be positive".into()));
        }
        if !(self.tone_hz > 0.0 && self.tone_hz * 2.0 < self.sample_rate as f32) {
            return Err(NavError::InvalidConfig(format!(
                "tone_hz {} is outside (0, {})",
                self.tone_hz,
                self.sample_rate / 2
            )));
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(NavError::InvalidConfig(format!(
                "amplitude must lie in [0, 1], got {}",
                self.amplitude
            )));
        }
        Ok(())
    }

    pub fn tone(&self) -> Tone {
        Tone::sine(
            self.tone_hz,
            Duration::from_millis(self.tone_ms),
            self.sample_rate,
            self.amplitude,
        )
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Nearest obstacle and the cadence derived from it.  Always updated as a
/// pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeepState {
    pub closest_cm: Option<f64>,
    pub interval: Option<Duration>,
}

/// [`BeepState`] plus the flag that shuts out sweeps finishing after a
/// stop.  Both live under one lock.
#[derive(Debug, Default)]
struct BeepSlot {
    state: BeepState,
    sealed: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// FeedbackScheduler
// ────────────────────────────────────────────────────────────────────────────

pub struct FeedbackScheduler {
    mapper: CadenceMapper,
    config: BeepConfig,
    tone: Tone,
    audio: Arc<dyn AudioSink>,
    display: Mutex<Box<dyn DisplayDriver>>,
    beep: Arc<Mutex<BeepSlot>>,
    turn: Mutex<TurnState>,
    task: Mutex<Option<BackgroundTask>>,
}

impl FeedbackScheduler {
    /// Build the scheduler and synthesise its tone once.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] if either configuration is
    /// unusable.
    pub fn new(
        cadence: &CadenceConfig,
        config: &BeepConfig,
        audio: Arc<dyn AudioSink>,
        display: Box<dyn DisplayDriver>,
    ) -> Result<Self, NavError> {
        config.validate()?;
        let mapper = CadenceMapper::new(cadence.clone())?;
        Ok(Self {
            mapper,
            config: config.clone(),
            tone: config.tone(),
            audio,
            display: Mutex::new(display),
            beep: Arc::new(Mutex::new(BeepSlot::default())),
            turn: Mutex::new(TurnState::Idle),
            task: Mutex::new(None),
        })
    }

    /// Spawn the beep loop with a cleared [`BeepState`] and accept sweeps
    /// again.  No-op while the loop runs.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), NavError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(BackgroundTask::is_running) {
            debug!("beep loop already running");
            return Ok(());
        }
        *self.beep.lock() = BeepSlot::default();

        let audio = Arc::clone(&self.audio);
        let tone = self.tone.clone();
        let beep = Arc::clone(&self.beep);
        let idle = self.config.idle_poll();
        *task = Some(BackgroundTask::spawn("beep-loop", move |token| {
            beep_loop(audio, tone, beep, idle, token);
        })?);
        info!("beep loop started");
        Ok(())
    }

    /// Cancel the loop, cut any tone short and join.  [`BeepState`] is
    /// cleared even if the join times out, and stays clear: sweeps passed to
    /// [`update_closest`](Self::update_closest) are ignored until the next
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`NavError::ThreadJoinTimeout`] if the loop outlives the join
    /// timeout.
    pub fn stop(&self) -> Result<(), NavError> {
        self.seal();
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        task.cancel();
        self.audio.stop();
        let result = task.stop(self.config.join_timeout());
        self.seal();
        if result.is_ok() {
            info!("beep loop stopped");
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(BackgroundTask::is_running)
    }

    /// Fold one sweep of readings into the beep cadence.
    ///
    /// Absent readings are ignored.  When every reading is absent the
    /// previous state is kept.  After [`stop`](Self::stop) the sweep is
    /// dropped.
    pub fn update_closest(&self, readings: &[RangeReading]) {
        let nearest: Option<(CarCorner, f64)> = readings
            .iter()
            .filter_map(|r| r.distance_cm.filter(|d| !d.is_nan()).map(|d| (r.corner, d)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let Some((corner, closest_cm)) = nearest else {
            debug!("no valid readings this sweep; cadence unchanged");
            return;
        };

        let interval = self.mapper.distance_to_interval(Some(closest_cm));
        {
            let mut slot = self.beep.lock();
            if slot.sealed {
                debug!(corner = %corner, closest_cm, "scheduler stopped; sweep dropped");
                return;
            }
            slot.state = BeepState {
                closest_cm: Some(closest_cm),
                interval,
            };
        }
        debug!(
            corner = %corner,
            closest_cm,
            interval_ms = interval.map(|i| i.as_millis() as u64),
            "cadence updated"
        );
    }

    pub fn beep_state(&self) -> BeepState {
        self.beep.lock().state
    }

    pub fn turn_state(&self) -> TurnState {
        *self.turn.lock()
    }

    fn seal(&self) {
        *self.beep.lock() = BeepSlot {
            state: BeepState::default(),
            sealed: true,
        };
    }

    /// Blank the display and forget the last turn direction.
    pub fn reset_display(&self) {
        *self.turn.lock() = TurnState::Idle;
        if let Err(e) = self.display.lock().clear() {
            warn!(error = %e, "display clear failed");
        }
    }
}

impl TurnSink for FeedbackScheduler {
    fn turn_changed(&self, state: TurnState) {
        *self.turn.lock() = state;
        let pattern = Pattern::from(state);
        match self.display.lock().show_pattern(pattern) {
            Ok(()) => debug!(turn = %state, ?pattern, "arrow updated"),
            Err(e) => warn!(turn = %state, error = %e, "display update failed"),
        }
    }
}

fn beep_loop(
    audio: Arc<dyn AudioSink>,
    tone: Tone,
    beep: Arc<Mutex<BeepSlot>>,
    idle: Duration,
    token: CancelToken,
) {
    let mut failures = 0_u32;
    while !token.is_cancelled() {
        let interval = beep.lock().state.interval;
        let pause = match interval {
            Some(interval) => {
                match audio.play_tone(&tone) {
                    Ok(()) if failures > 0 => {
                        info!(failures, "audio playback recovered");
                        failures = 0;
                    }
                    Ok(()) => {}
                    Err(e) => {
                        failures += 1;
                        if failures == 1 {
                            warn!(error = %e, "beep playback failed");
                        }
                    }
                }
                interval
            }
            None => idle,
        };
        if token.sleep(pause) {
            break;
        }
    }
    debug!("beep loop exited");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
