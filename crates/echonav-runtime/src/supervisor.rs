//! [`Supervisor`] – start/stop orchestration of the sensing and feedback
//! loops.
//!
//! Three background loops run while the supervisor is active:
//!
//! ```text
//! angle-estimator ──(turn edges)──────────────► arrow display
//! range-poller ─► RangeAggregator::read_all ─► FeedbackScheduler::update_closest
//! beep-loop ◄──────────(BeepState)─────────────┘
//! ```
//!
//! `start` brings them up in dependency order (angle estimator first, since
//! its calibration is the step most likely to fail), `stop` tears them down
//! and blanks the display.  Both are idempotent and callable from any
//! thread.  `shutdown` additionally releases the hardware for good.

use std::sync::Arc;
use std::time::{Duration, Instant};

use echonav_feedback::{BeepConfig, BeepState, CadenceConfig, FeedbackScheduler};
use echonav_hal::{AudioSink, DisplayDriver, HardwareContext};
use echonav_kernel::{BackgroundTask, CancelToken};
use echonav_perception::{AngleConfig, AngleEstimator, RangeAggregator, RangeConfig, TurnSink};
use echonav_types::{NavError, RangeReading, TurnState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Everything the supervisor needs, one section per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Range polling period (ms).
    pub poll_ms: u64,
    /// Bounded join for the polling thread (ms).
    pub join_timeout_ms: u64,
    pub range: RangeConfig,
    pub angle: AngleConfig,
    pub cadence: CadenceConfig,
    pub beep: BeepConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_ms: 50,
            join_timeout_ms: 1_000,
            range: RangeConfig::default(),
            angle: AngleConfig::default(),
            cadence: CadenceConfig::default(),
            beep: BeepConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`NavError::InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), NavError> {
        if self.poll_ms == 0 {
            return Err(NavError::InvalidConfig("poll_ms must be positive".into()));
        }
        self.range.validate()?;
        self.angle.validate()?;
        self.cadence.validate()?;
        self.beep.validate()
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status
// ────────────────────────────────────────────────────────────────────────────

/// Point-in-time view for operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorStatus {
    pub running: bool,
    pub released: bool,
    pub yaw_deg: f64,
    pub turn: TurnState,
    pub beep: BeepState,
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

pub struct Supervisor {
    ctx: HardwareContext,
    config: SupervisorConfig,
    rangers: Arc<RangeAggregator>,
    angle: AngleEstimator,
    feedback: Arc<FeedbackScheduler>,
    poller: Mutex<Option<BackgroundTask>>,
}

impl Supervisor {
    /// Build every component on top of `ctx`.
    ///
    /// Ranger pins are claimed and probed here, so construction blocks for
    /// the ranger warm-up.
    ///
    /// # Errors
    ///
    /// - [`NavError::InvalidConfig`] for an unusable configuration.
    /// - [`NavError::HardwareFault`] if a ranger cannot be set up.
    pub fn new(
        ctx: &HardwareContext,
        config: SupervisorConfig,
        audio: Arc<dyn AudioSink>,
        display: Box<dyn DisplayDriver>,
    ) -> Result<Self, NavError> {
        config.validate()?;
        let rangers = Arc::new(RangeAggregator::new(ctx, &config.range)?);
        let angle = AngleEstimator::new(ctx, &config.angle)?;
        let feedback = Arc::new(FeedbackScheduler::new(
            &config.cadence,
            &config.beep,
            audio,
            display,
        )?);
        info!(
            rangers = config.range.corners.len(),
            poll_ms = config.poll_ms,
            "supervisor ready"
        );
        Ok(Self {
            ctx: ctx.clone(),
            config,
            rangers,
            angle,
            feedback,
            poller: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Bring up the angle estimator, the beep loop and the range poller.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] when calibration fails or the
    /// hardware has been released.  Nothing is left running on error.
    pub fn start(&self) -> Result<(), NavError> {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(BackgroundTask::is_running) {
            debug!("supervisor already running");
            return Ok(());
        }
        if self.ctx.is_released() {
            return Err(NavError::hardware("supervisor", "hardware context already released"));
        }

        let sink: Arc<dyn TurnSink> = self.feedback.clone();
        if let Err(e) = self.angle.start(sink) {
            error!(error = %e, "angle estimator failed to start");
            return Err(e);
        }
        if let Err(e) = self.feedback.start() {
            error!(error = %e, "beep loop failed to start");
            self.stop_angle_quietly();
            return Err(e);
        }

        let rangers = Arc::clone(&self.rangers);
        let feedback = Arc::clone(&self.feedback);
        let period = self.config.poll_period();
        let task = BackgroundTask::spawn("range-poller", move |token| {
            poll_loop(&rangers, &feedback, period, &token);
        });
        match task {
            Ok(task) => *poller = Some(task),
            Err(e) => {
                error!(error = %e, "range poller failed to start");
                if let Err(stop_err) = self.feedback.stop() {
                    warn!(error = %stop_err, "beep loop did not stop cleanly");
                }
                self.stop_angle_quietly();
                return Err(e);
            }
        }
        info!("EchoNav started");
        Ok(())
    }

    /// One synchronous polling cycle: sweep the rangers and update the beep
    /// cadence.  Returns the sweep.
    ///
    /// Between [`stop`](Self::stop) and the next [`start`](Self::start) the
    /// cadence is left untouched.
    pub fn poll_once(&self) -> Vec<RangeReading> {
        poll_cycle(&self.rangers, &self.feedback)
    }

    /// Stop every loop and blank the display.  No-op when not running.
    ///
    /// # Errors
    ///
    /// Returns the first [`NavError::ThreadJoinTimeout`]; teardown continues
    /// past it so every component is asked to stop.
    pub fn stop(&self) -> Result<(), NavError> {
        let mut poller = self.poller.lock();
        let Some(task) = poller.take() else {
            debug!("supervisor not running");
            return Ok(());
        };
        task.cancel();

        let results = [
            ("beep-loop", self.feedback.stop()),
            ("angle-estimator", self.angle.stop()),
            ("range-poller", task.stop(self.config.join_timeout())),
        ];
        let mut first_error = None;
        for (name, result) in results {
            if let Err(e) = result {
                warn!(task = name, error = %e, "component did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }

        self.feedback.reset_display();
        info!("EchoNav stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// [`stop`](Self::stop), then release the hardware.  Later calls only
    /// re-run the (idempotent) stop.
    ///
    /// # Errors
    ///
    /// Propagates the error from [`stop`](Self::stop); the hardware is
    /// released regardless.
    pub fn shutdown(&self) -> Result<(), NavError> {
        let result = self.stop();
        if self.ctx.release() {
            info!("hardware released");
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(BackgroundTask::is_running)
    }

    pub fn status(&self) -> SupervisorStatus {
        let angle = self.angle.snapshot();
        SupervisorStatus {
            running: self.is_running(),
            released: self.ctx.is_released(),
            yaw_deg: angle.yaw_deg,
            turn: self.feedback.turn_state(),
            beep: self.feedback.beep_state(),
        }
    }

    fn stop_angle_quietly(&self) {
        if let Err(e) = self.angle.stop() {
            warn!(error = %e, "angle estimator did not stop cleanly");
        }
    }
}

fn poll_cycle(rangers: &RangeAggregator, feedback: &FeedbackScheduler) -> Vec<RangeReading> {
    let readings = rangers.read_all();
    feedback.update_closest(&readings);
    readings
}

fn poll_loop(
    rangers: &RangeAggregator,
    feedback: &FeedbackScheduler,
    period: Duration,
    token: &CancelToken,
) {
    debug!(period_ms = period.as_millis() as u64, "range poller running");
    while !token.is_cancelled() {
        let tick = Instant::now();
        let Some(readings) = rangers.read_all_until(token) else {
            break;
        };
        feedback.update_closest(&readings);
        let elapsed = tick.elapsed();
        if elapsed > period {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "polling tick overran");
        }
        if token.sleep(period.saturating_sub(elapsed)) {
            break;
        }
    }
    debug!("range poller exited");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
