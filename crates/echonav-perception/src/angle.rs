//! Gyroscope yaw estimation.
//!
//! The [`AngleEstimator`] turns the z-axis rate of a [`Gyroscope`] into a
//! bounded yaw angle and feeds the [`TurnClassifier`]:
//!
//! ```text
//! raw rate ─► − bias ─► low-pass ─► ∫ dt ─► leak ─► clamp ─► yaw ─► classifier ─► TurnSink
//! ```
//!
//! 1. The bias is averaged over a burst of samples at [`start`] while the
//!    vehicle is assumed to be still.
//! 2. The rate is smoothed with a running first-order low-pass filter
//!    (`filtered = α·filtered + (1 − α)·rate`).
//! 3. While the smoothed rate is below the noise floor the yaw leaks back
//!    toward zero, so slow drift does not accumulate into a phantom turn.
//! 4. The yaw is clamped to `±max_yaw_deg`.
//!
//! The estimator is relative only: it knows how far the wheels have turned
//! since [`start`], not where the vehicle points.
//!
//! [`Gyroscope`]: echonav_hal::Gyroscope
//! [`start`]: AngleEstimator::start

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use echonav_hal::HardwareContext;
use echonav_kernel::{BackgroundTask, CancelToken};
use echonav_types::{NavError, TurnState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::turn::{TurnClassifier, TurnSink};

/// Slowest loop rate a configuration may ask for (Hz).
const MIN_SAMPLE_HZ: f64 = 0.1;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning for the yaw pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleConfig {
    /// Loop and calibration rate (Hz).
    pub sample_hz: f64,
    /// Samples averaged into the bias at start.
    pub bias_samples: usize,
    /// Low-pass coefficient; higher is smoother.
    pub lpf_alpha: f64,
    /// Below this filtered rate (°/s) the yaw leaks toward zero.
    pub noise_floor_dps: f64,
    /// Fraction of the yaw removed per second while leaking.
    pub leak_per_sec: f64,
    /// Yaw clamp (°).
    pub max_yaw_deg: f64,
    /// Dead zone of the turn classifier (°).
    pub center_tol_deg: f64,
    /// Bounded join when stopping the loop (ms).
    pub join_timeout_ms: u64,
}

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            sample_hz: 100.0,
            bias_samples: 200,
            lpf_alpha: 0.85,
            noise_floor_dps: 1.5,
            leak_per_sec: 0.02,
            max_yaw_deg: 30.0,
            center_tol_deg: 5.0,
            join_timeout_ms: 1_000,
        }
    }
}

impl AngleConfig {
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), NavError> {
        if !self.sample_hz.is_finite() || self.sample_hz < MIN_SAMPLE_HZ {
            return Err(NavError::InvalidConfig(format!(
                "sample_hz must be at least {MIN_SAMPLE_HZ}, got {}",
                self.sample_hz
            )));
        }
        if self.bias_samples == 0 {
            return Err(NavError::InvalidConfig("bias_samples must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.lpf_alpha) {
            return Err(NavError::InvalidConfig(format!(
                "lpf_alpha must lie in [0, 1), got {}",
                self.lpf_alpha
            )));
        }
        if self.max_yaw_deg.is_nan() || self.max_yaw_deg <= 0.0 {
            return Err(NavError::InvalidConfig(format!(
                "max_yaw_deg must be positive, got {}",
                self.max_yaw_deg
            )));
        }
        for (name, value) in [
            ("noise_floor_dps", self.noise_floor_dps),
            ("leak_per_sec", self.leak_per_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(NavError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.center_tol_deg.is_nan() || self.center_tol_deg < 0.0 {
            return Err(NavError::InvalidConfig(format!(
                "center_tol_deg must be non-negative, got {}",
                self.center_tol_deg
            )));
        }
        Ok(())
    }

    /// Loop period derived from [`sample_hz`](Self::sample_hz).
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_hz)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Calibration
// ────────────────────────────────────────────────────────────────────────────

/// Average `samples` gyroscope readings taken `interval` apart.
///
/// Blocks for roughly `samples × interval`.  The vehicle must be still.
///
/// # Errors
///
/// Any failed read aborts calibration with [`NavError::HardwareFault`].
pub fn calibrate(
    ctx: &HardwareContext,
    samples: usize,
    interval: Duration,
) -> Result<f64, NavError> {
    if samples == 0 {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for i in 0..samples {
        let rate = ctx.gyro()?.read_rate_z().map_err(|e| {
            NavError::hardware("gyroscope", format!("calibration read {i}/{samples} failed: {e}"))
        })?;
        sum += rate;
        thread::sleep(interval);
    }
    Ok(sum / samples as f64)
}

// ────────────────────────────────────────────────────────────────────────────
// YawFilter
// ────────────────────────────────────────────────────────────────────────────

/// Bias-corrected, smoothed, leaky and clamped rate integrator.
#[derive(Debug, Clone)]
pub struct YawFilter {
    bias: f64,
    alpha: f64,
    noise_floor: f64,
    leak_per_sec: f64,
    max_yaw: f64,
    filtered: f64,
    yaw: f64,
}

impl YawFilter {
    pub fn new(config: &AngleConfig, bias_dps: f64) -> Self {
        Self {
            bias: bias_dps,
            alpha: config.lpf_alpha,
            noise_floor: config.noise_floor_dps,
            leak_per_sec: config.leak_per_sec,
            max_yaw: config.max_yaw_deg.abs(),
            filtered: 0.0,
            yaw: 0.0,
        }
    }

    /// Fold one raw rate sample (°/s) taken `dt_s` seconds after the
    /// previous one into the estimate and return the new yaw (°).
    pub fn update(&mut self, raw_rate_dps: f64, dt_s: f64) -> f64 {
        let rate = raw_rate_dps - self.bias;
        self.filtered = self.alpha * self.filtered + (1.0 - self.alpha) * rate;
        self.yaw += self.filtered * dt_s;
        if self.filtered.abs() < self.noise_floor {
            self.yaw -= self.yaw * self.leak_per_sec * dt_s;
        }
        self.yaw = self.yaw.clamp(-self.max_yaw, self.max_yaw);
        self.yaw
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn filtered_rate(&self) -> f64 {
        self.filtered
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop state
// ────────────────────────────────────────────────────────────────────────────

/// Latest values published by the estimator loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AngleSnapshot {
    pub bias_dps: f64,
    pub rate_dps: f64,
    pub yaw_deg: f64,
    pub turn: TurnState,
}

/// Per-tick bookkeeping of the loop, separate from the thread so the timing
/// rules can be exercised directly.
struct AngleTracker {
    filter: YawFilter,
    classifier: TurnClassifier,
    last: Instant,
    failures: u32,
}

impl AngleTracker {
    fn new(config: &AngleConfig, bias: f64, now: Instant) -> Self {
        Self {
            filter: YawFilter::new(config, bias),
            classifier: TurnClassifier::new(config.center_tol_deg),
            last: now,
            failures: 0,
        }
    }

    /// Apply one gyroscope read taken at `now`.  A failed read or a
    /// non-advancing clock leaves the timestamp baseline untouched.
    fn step(&mut self, reading: Result<f64, NavError>, now: Instant) -> Option<TurnState> {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        if dt <= 0.0 {
            return None;
        }
        let raw = match reading {
            Ok(raw) => raw,
            Err(e) => {
                self.failures += 1;
                if self.failures == 1 {
                    warn!(error = %e, "gyroscope read failed; skipping tick");
                } else {
                    debug!(error = %e, failures = self.failures, "gyroscope still failing");
                }
                return None;
            }
        };
        if self.failures > 0 {
            info!(failures = self.failures, "gyroscope reads recovered");
            self.failures = 0;
        }
        self.last = now;
        let yaw = self.filter.update(raw, dt);
        self.classifier.update(yaw)
    }

    fn snapshot(&self) -> AngleSnapshot {
        AngleSnapshot {
            bias_dps: self.filter.bias(),
            rate_dps: self.filter.filtered_rate(),
            yaw_deg: self.filter.yaw(),
            turn: self.classifier.state(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AngleEstimator
// ────────────────────────────────────────────────────────────────────────────

/// Background yaw estimator.  `start`/`stop` may be called from any thread
/// and are idempotent.
pub struct AngleEstimator {
    ctx: HardwareContext,
    config: AngleConfig,
    published: Arc<Mutex<AngleSnapshot>>,
    task: Mutex<Option<BackgroundTask>>,
}

impl AngleEstimator {
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] for an unusable configuration.
    pub fn new(ctx: &HardwareContext, config: &AngleConfig) -> Result<Self, NavError> {
        config.validate()?;
        Ok(Self {
            ctx: ctx.clone(),
            config: config.clone(),
            published: Arc::new(Mutex::new(AngleSnapshot::default())),
            task: Mutex::new(None),
        })
    }

    /// Calibrate the bias and spawn the estimation loop.
    ///
    /// `sink` hears `Idle` immediately and then every turn edge.  Calling
    /// `start` while the loop runs does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if calibration fails; no thread
    /// is started in that case.
    pub fn start(&self, sink: Arc<dyn TurnSink>) -> Result<(), NavError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(BackgroundTask::is_running) {
            debug!("angle estimator already running");
            return Ok(());
        }

        let bias = calibrate(&self.ctx, self.config.bias_samples, self.config.period())?;
        info!(bias_dps = bias, samples = self.config.bias_samples, "gyroscope calibrated");

        let tracker = AngleTracker::new(&self.config, bias, Instant::now());
        *self.published.lock() = tracker.snapshot();
        sink.turn_changed(TurnState::Idle);

        let ctx = self.ctx.clone();
        let period = self.config.period();
        let published = Arc::clone(&self.published);
        *task = Some(BackgroundTask::spawn("angle-estimator", move |token| {
            run_loop(ctx, tracker, period, sink, published, token);
        })?);
        info!(hz = self.config.sample_hz, "angle estimator started");
        Ok(())
    }

    /// Stop the loop and reset the published values.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::ThreadJoinTimeout`] if the loop outlives the
    /// join timeout; the published values are reset regardless.
    pub fn stop(&self) -> Result<(), NavError> {
        let task = self.task.lock().take();
        let result = match task {
            Some(task) => task.stop(self.config.join_timeout()),
            None => Ok(()),
        };
        *self.published.lock() = AngleSnapshot::default();
        if result.is_ok() {
            info!("angle estimator stopped");
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(BackgroundTask::is_running)
    }

    pub fn snapshot(&self) -> AngleSnapshot {
        *self.published.lock()
    }

    pub fn yaw_deg(&self) -> f64 {
        self.published.lock().yaw_deg
    }

    pub fn turn_state(&self) -> TurnState {
        self.published.lock().turn
    }
}

fn run_loop(
    ctx: HardwareContext,
    mut tracker: AngleTracker,
    period: Duration,
    sink: Arc<dyn TurnSink>,
    published: Arc<Mutex<AngleSnapshot>>,
    token: CancelToken,
) {
    while !token.is_cancelled() {
        let tick = Instant::now();
        let reading = ctx.gyro().and_then(|mut gyro| gyro.read_rate_z());
        if let Some(state) = tracker.step(reading, tick) {
            debug!(turn = %state, yaw_deg = tracker.filter.yaw(), "turn edge");
            sink.turn_changed(state);
        }
        *published.lock() = tracker.snapshot();
        if token.sleep(period.saturating_sub(tick.elapsed())) {
            break;
        }
    }
    debug!("angle estimator loop exited");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use echonav_hal::sim::SimRig;

    #[derive(Default)]
    struct RecordingSink {
        edges: Mutex<Vec<TurnState>>,
    }

    impl RecordingSink {
        fn edges(&self) -> Vec<TurnState> {
            self.edges.lock().clone()
        }
    }

    impl TurnSink for RecordingSink {
        fn turn_changed(&self, state: TurnState) {
            self.edges.lock().push(state);
        }
    }

    fn fast_config() -> AngleConfig {
        AngleConfig {
            sample_hz: 500.0,
            bias_samples: 5,
            ..AngleConfig::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn low_pass_is_a_running_filter() {
        let mut filter = YawFilter::new(&AngleConfig::default(), 0.0);
        filter.update(10.0, 0.01);
        assert!((filter.filtered_rate() - 1.5).abs() < 1e-9);
        filter.update(10.0, 0.01);
        // 0.85 * 1.5 + 0.15 * 10
        assert!((filter.filtered_rate() - 2.775).abs() < 1e-9);
    }

    #[test]
    fn bias_is_subtracted_before_filtering() {
        let mut filter = YawFilter::new(&AngleConfig::default(), 2.0);
        for _ in 0..100 {
            filter.update(2.0, 0.01);
        }
        assert_eq!(filter.filtered_rate(), 0.0);
        assert_eq!(filter.yaw(), 0.0);
    }

    #[test]
    fn leak_decays_yaw_when_still() {
        let mut filter = YawFilter::new(&AngleConfig::default(), 0.0);
        filter.yaw = 10.0;
        filter.update(0.0, 1.0);
        assert!((filter.yaw() - 9.8).abs() < 1e-9);
        for _ in 0..100 {
            filter.update(0.0, 1.0);
        }
        assert!(filter.yaw() < 9.8 * 0.2);
        assert!(filter.yaw() > 0.0);
    }

    #[test]
    fn no_leak_while_turning() {
        let mut filter = YawFilter::new(&AngleConfig::default(), 0.0);
        filter.filtered = 20.0;
        filter.yaw = 10.0;
        // filtered stays at 20, well above the noise floor
        let yaw = filter.update(20.0, 0.1);
        assert!((yaw - 12.0).abs() < 1e-9);
    }

    #[test]
    fn yaw_is_clamped() {
        let mut filter = YawFilter::new(&AngleConfig::default(), 0.0);
        for _ in 0..1_000 {
            filter.update(90.0, 0.01);
        }
        assert_eq!(filter.yaw(), 30.0);
        for _ in 0..2_000 {
            filter.update(-90.0, 0.01);
        }
        assert_eq!(filter.yaw(), -30.0);
    }

    #[test]
    fn failed_tick_keeps_timestamp_baseline() {
        let t0 = Instant::now();
        let mut tracker = AngleTracker::new(&AngleConfig::default(), 0.0, t0);

        let failed = Err(NavError::hardware("gyroscope", "nack"));
        assert_eq!(tracker.step(failed, t0 + Duration::from_millis(10)), None);
        assert_eq!(tracker.last, t0);

        tracker.step(Ok(100.0), t0 + Duration::from_millis(20));
        // filtered = 15 °/s integrated over the full 20 ms
        assert!((tracker.filter.yaw() - 0.3).abs() < 1e-9);
        assert_eq!(tracker.failures, 0);
    }

    #[test]
    fn non_advancing_clock_skips_tick() {
        let t0 = Instant::now();
        let mut tracker = AngleTracker::new(&AngleConfig::default(), 0.0, t0);
        assert_eq!(tracker.step(Ok(100.0), t0), None);
        assert_eq!(tracker.filter.filtered_rate(), 0.0);
    }

    #[test]
    fn calibrate_averages_samples() {
        let rig = SimRig::new();
        rig.gyro().script([Some(1.0), Some(2.0), Some(3.0)]);
        let bias = calibrate(&rig.context(), 3, Duration::ZERO).unwrap();
        assert!((bias - 2.0).abs() < 1e-9);
    }

    #[test]
    fn calibrate_fails_on_read_error() {
        let rig = SimRig::new();
        rig.gyro().script([Some(1.0), None]);
        let err = calibrate(&rig.context(), 5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, NavError::HardwareFault { .. }));
    }

    #[test]
    fn start_fails_without_spawning_when_calibration_fails() {
        let rig = SimRig::new();
        rig.gyro().set_failing(true);
        let estimator = AngleEstimator::new(&rig.context(), &fast_config()).unwrap();
        let sink = Arc::new(RecordingSink::default());

        assert!(estimator.start(sink.clone()).is_err());
        assert!(!estimator.is_running());
        assert!(sink.edges().is_empty());
    }

    #[test]
    fn left_turn_reaches_the_sink() {
        let rig = SimRig::new().with_gyro_bias(0.4);
        let estimator = AngleEstimator::new(&rig.context(), &fast_config()).unwrap();
        let sink = Arc::new(RecordingSink::default());

        estimator.start(sink.clone()).unwrap();
        assert_eq!(sink.edges(), vec![TurnState::Idle]);
        assert!((estimator.snapshot().bias_dps - 0.4).abs() < 1e-9);

        rig.gyro().set_rate(-60.0);
        assert!(wait_for(|| estimator.turn_state() == TurnState::Left));
        assert!(estimator.yaw_deg() < -5.0);
        assert_eq!(sink.edges(), vec![TurnState::Idle, TurnState::Left]);

        estimator.stop().unwrap();
        assert!(!estimator.is_running());
        assert_eq!(estimator.turn_state(), TurnState::Idle);
        assert_eq!(estimator.yaw_deg(), 0.0);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let rig = SimRig::new();
        let estimator = AngleEstimator::new(&rig.context(), &fast_config()).unwrap();
        let sink = Arc::new(RecordingSink::default());

        estimator.stop().unwrap();
        estimator.start(sink.clone()).unwrap();
        rig.gyro().set_bias(0.5);
        estimator.start(sink.clone()).unwrap();
        // second start neither recalibrates nor re-announces Idle
        assert_eq!(sink.edges(), vec![TurnState::Idle]);
        assert_eq!(estimator.snapshot().bias_dps, 0.0);
        assert!(estimator.is_running());

        estimator.stop().unwrap();
        estimator.stop().unwrap();
        assert!(!estimator.is_running());
    }

    #[test]
    fn restart_recalibrates() {
        let rig = SimRig::new();
        let estimator = AngleEstimator::new(&rig.context(), &fast_config()).unwrap();
        let sink = Arc::new(RecordingSink::default());

        estimator.start(sink.clone()).unwrap();
        estimator.stop().unwrap();
        rig.gyro().set_bias(1.0);
        estimator.start(sink.clone()).unwrap();
        assert!((estimator.snapshot().bias_dps - 1.0).abs() < 1e-9);
        estimator.stop().unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let rig = SimRig::new();
        let config = AngleConfig { sample_hz: 0.0, ..AngleConfig::default() };
        assert!(AngleEstimator::new(&rig.context(), &config).is_err());
        let config = AngleConfig { lpf_alpha: 1.0, ..AngleConfig::default() };
        assert!(config.validate().is_err());
        let config = AngleConfig { sample_hz: 1e-300, ..AngleConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn leak_and_noise_floor_must_be_finite_and_non_negative() {
        for config in [
            AngleConfig { leak_per_sec: -0.5, ..AngleConfig::default() },
            AngleConfig { leak_per_sec: f64::NAN, ..AngleConfig::default() },
            AngleConfig { noise_floor_dps: -1.0, ..AngleConfig::default() },
            AngleConfig { noise_floor_dps: f64::INFINITY, ..AngleConfig::default() },
        ] {
            assert!(
                matches!(config.validate(), Err(NavError::InvalidConfig(_))),
                "{config:?}"
            );
        }
        let no_leak = AngleConfig {
            leak_per_sec: 0.0,
            noise_floor_dps: 0.0,
            ..AngleConfig::default()
        };
        assert!(no_leak.validate().is_ok());
    }
}
