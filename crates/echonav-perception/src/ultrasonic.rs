//! Ultrasonic range sampling.
//!
//! A [`RangeSampler`] drives one trigger/echo pair on the [`GpioBus`]:
//!
//! ```text
//! settle ─► trigger ▔▔▁ ─► wait echo ▁▁▔ ─► wait echo ▔▔▁
//!                          (rising, bounded)  (falling, bounded)
//! distance_cm = pulse_width_s * speed_of_sound / 2
//! ```
//!
//! Each phase is bounded by an absolute deadline on the bus clock, so a
//! missing echo costs one sample instead of wedging the polling loop.
//! [`RangeSampler::read_distance`] fires a short burst of samples and only
//! reports a distance when the burst agrees with itself (see
//! [`stable_mean`]).  [`RangeSampler::read_distance_until`] does the same but
//! gives up between samples once a [`CancelToken`] fires.
//!
//! [`GpioBus`]: echonav_hal::GpioBus

use std::time::Duration;

use echonav_hal::{HardwareContext, Level};
use echonav_kernel::CancelToken;
use echonav_types::{CarCorner, EchoPhase, NavError, RangeReading};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning for every ranger on the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Mounted rangers, in polling order.
    pub corners: Vec<CarCorner>,
    /// Samples fired per reading.
    pub trials: usize,
    /// Largest allowed deviation from the batch mean (cm).
    pub tolerance_cm: f64,
    /// Speed of sound (cm/s); the echo covers the distance twice.
    pub speed_of_sound_cm_s: f64,
    /// Quiet time before each trigger pulse (ms).
    pub settle_ms: u64,
    /// Width of the trigger pulse (µs).
    pub trigger_pulse_us: u64,
    /// Deadline for each echo edge (ms).
    pub echo_timeout_ms: u64,
    /// Warm-up wait before the dry-run sample (ms).
    pub warmup_ms: u64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            corners: CarCorner::ALL.to_vec(),
            trials: 3,
            tolerance_cm: 3.0,
            speed_of_sound_cm_s: 34_300.0,
            settle_ms: 50,
            trigger_pulse_us: 10,
            echo_timeout_ms: 100,
            warmup_ms: 2_000,
        }
    }
}

impl RangeConfig {
    /// Reject configurations that can never yield a stable reading.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), NavError> {
        if self.corners.is_empty() {
            return Err(NavError::InvalidConfig("no rangers configured".into()));
        }
        for (i, corner) in self.corners.iter().enumerate() {
            if self.corners[..i].contains(corner) {
                return Err(NavError::InvalidConfig(format!(
                    "ranger '{corner}' listed twice"
                )));
            }
        }
        if self.trials < 2 {
            return Err(NavError::InvalidConfig(format!(
                "trials must be at least 2, got {}",
                self.trials
            )));
        }
        if self.tolerance_cm.is_nan() || self.tolerance_cm < 0.0 {
            return Err(NavError::InvalidConfig(format!(
                "tolerance_cm must be non-negative, got {}",
                self.tolerance_cm
            )));
        }
        if self.speed_of_sound_cm_s.is_nan() || self.speed_of_sound_cm_s <= 0.0 {
            return Err(NavError::InvalidConfig(format!(
                "speed_of_sound_cm_s must be positive, got {}",
                self.speed_of_sound_cm_s
            )));
        }
        if self.echo_timeout_ms == 0 {
            return Err(NavError::InvalidConfig("echo_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stability filter
// ────────────────────────────────────────────────────────────────────────────

/// Mean of the valid samples in a burst, if the burst is stable.
///
/// Negative and non-finite samples are ignored.  The burst is stable when
/// at least two samples remain and none of them sits further than
/// `tolerance_cm` from their mean.
///
/// # Errors
///
/// Returns [`NavError::Unstable`] carrying the number of valid samples and
/// their largest deviation from the mean.
///
/// # Example
///
/// ```rust
/// use echonav_perception::ultrasonic::stable_mean;
/// use echonav_types::CarCorner;
///
/// let mean = stable_mean(CarCorner::BackLeft, &[20.0, 20.5, 21.0], 3.0).unwrap();
/// assert!((mean - 20.5).abs() < 1e-9);
/// assert!(stable_mean(CarCorner::BackLeft, &[20.0, 50.0, 21.0], 3.0).is_err());
/// ```
pub fn stable_mean(
    corner: CarCorner,
    samples: &[f64],
    tolerance_cm: f64,
) -> Result<f64, NavError> {
    let valid: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .collect();

    let unstable = |spread_cm: f64| NavError::Unstable {
        sensor: corner.label().to_string(),
        valid: valid.len(),
        spread_cm,
    };

    if valid.len() < 2 {
        return Err(unstable(0.0));
    }

    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let spread = valid
        .iter()
        .map(|s| (s - mean).abs())
        .fold(0.0_f64, f64::max);

    if spread <= tolerance_cm {
        Ok(mean)
    } else {
        Err(unstable(spread))
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ────────────────────────────────────────────────────────────────────────────
// RangeSampler
// ────────────────────────────────────────────────────────────────────────────

/// One ultrasonic ranger bound to a [`CarCorner`].
#[derive(Clone)]
pub struct RangeSampler {
    ctx: HardwareContext,
    corner: CarCorner,
    config: RangeConfig,
}

impl RangeSampler {
    /// Claim the ranger's pins: trigger as output (driven low), echo as
    /// input.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if either pin cannot be set up.
    pub fn new(
        ctx: &HardwareContext,
        corner: CarCorner,
        config: &RangeConfig,
    ) -> Result<Self, NavError> {
        {
            let mut bus = ctx.gpio()?;
            bus.setup_output(corner.trigger_pin())?;
            bus.set_output(corner.trigger_pin(), Level::Low)?;
            bus.setup_input(corner.echo_pin())?;
        }
        debug!(
            corner = %corner,
            trigger_pin = corner.trigger_pin(),
            echo_pin = corner.echo_pin(),
            "ranger pins configured"
        );
        Ok(Self {
            ctx: ctx.clone(),
            corner,
            config: config.clone(),
        })
    }

    pub fn corner(&self) -> CarCorner {
        self.corner
    }

    /// Let the transducer warm up and fire one dry-run sample.
    ///
    /// A missing echo only earns a warning; the obstacle may simply be out
    /// of range.
    ///
    /// # Errors
    ///
    /// Propagates [`NavError::HardwareFault`] from the bus.
    pub fn probe(&self) -> Result<(), NavError> {
        self.ctx.gpio()?.delay(self.config.warmup());
        match self.sample_once() {
            Ok(distance_cm) => {
                info!(corner = %self.corner, distance_cm, "ranger ready");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(corner = %self.corner, error = %e, "ranger dry run got no echo");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fire one trigger pulse and time the echo.
    ///
    /// Returns the distance in centimetres, rounded to two decimals.
    ///
    /// # Errors
    ///
    /// - [`NavError::Timeout`] when either echo edge misses its deadline.
    /// - [`NavError::HardwareFault`] when the bus rejects a pin operation.
    pub fn sample_once(&self) -> Result<f64, NavError> {
        let trigger = self.corner.trigger_pin();
        let echo = self.corner.echo_pin();
        let timeout_us = self.config.echo_timeout().as_micros() as u64;

        let mut bus = self.ctx.gpio()?;
        bus.delay(self.config.settle());
        bus.set_output(trigger, Level::High)?;
        bus.delay(self.config.trigger_pulse());
        bus.set_output(trigger, Level::Low)?;

        let deadline = bus.now_micros() + timeout_us;
        let pulse_start = loop {
            let level = bus.read_input(echo)?;
            let now = bus.now_micros();
            if level == Level::High {
                break now;
            }
            if now >= deadline {
                return Err(self.timeout(EchoPhase::Rising));
            }
        };

        let deadline = pulse_start + timeout_us;
        let pulse_end = loop {
            let level = bus.read_input(echo)?;
            let now = bus.now_micros();
            if level == Level::Low {
                break now;
            }
            if now >= deadline {
                return Err(self.timeout(EchoPhase::Falling));
            }
        };
        drop(bus);

        let width_s = (pulse_end - pulse_start) as f64 / 1e6;
        Ok(round_to_hundredths(width_s * self.config.speed_of_sound_cm_s / 2.0))
    }

    /// Fire `trials` samples and reduce them to one reading.
    ///
    /// Timeouts and unstable bursts produce a reading with no distance.
    ///
    /// # Errors
    ///
    /// Only [`NavError::HardwareFault`] escapes.
    pub fn read_distance(&self) -> Result<RangeReading, NavError> {
        let samples = self.burst(None)?.unwrap_or_default();
        Ok(self.reduce(&samples))
    }

    /// [`read_distance`](Self::read_distance), abandoned between samples
    /// once `token` is cancelled.
    ///
    /// Returns `Ok(None)` for an abandoned burst.
    ///
    /// # Errors
    ///
    /// Only [`NavError::HardwareFault`] escapes.
    pub fn read_distance_until(
        &self,
        token: &CancelToken,
    ) -> Result<Option<RangeReading>, NavError> {
        Ok(self.burst(Some(token))?.map(|samples| self.reduce(&samples)))
    }

    fn burst(&self, token: Option<&CancelToken>) -> Result<Option<Vec<f64>>, NavError> {
        let mut samples = Vec::with_capacity(self.config.trials);
        for _ in 0..self.config.trials {
            if token.is_some_and(CancelToken::is_cancelled) {
                debug!(corner = %self.corner, "burst abandoned");
                return Ok(None);
            }
            match self.sample_once() {
                Ok(cm) => samples.push(cm),
                Err(e) if e.is_recoverable() => {
                    debug!(corner = %self.corner, error = %e, "sample discarded");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(samples))
    }

    fn reduce(&self, samples: &[f64]) -> RangeReading {
        let distance_cm = match stable_mean(self.corner, samples, self.config.tolerance_cm) {
            Ok(mean) => Some(mean),
            Err(e) => {
                debug!(corner = %self.corner, error = %e, ?samples, "burst rejected");
                None
            }
        };
        debug!(corner = %self.corner, ?distance_cm, "range reading");
        RangeReading::now(self.corner, distance_cm)
    }

    fn timeout(&self, phase: EchoPhase) -> NavError {
        NavError::Timeout {
            sensor: self.corner.label().to_string(),
            phase,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use echonav_hal::sim::SimRig;

    const CORNER: CarCorner = CarCorner::BackLeft;

    fn sampler(rig: &SimRig) -> RangeSampler {
        RangeSampler::new(&rig.context(), CORNER, &RangeConfig::default()).unwrap()
    }

    #[test]
    fn stable_burst_returns_mean() {
        let mean = stable_mean(CORNER, &[20.0, 20.5, 21.0], 3.0).unwrap();
        assert!((mean - 20.5).abs() < 1e-9);
    }

    #[test]
    fn outlier_makes_burst_unstable() {
        let err = stable_mean(CORNER, &[20.0, 50.0, 21.0], 3.0).unwrap_err();
        match err {
            NavError::Unstable { valid, spread_cm, .. } => {
                assert_eq!(valid, 3);
                assert!(spread_cm > 3.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fewer_than_two_valid_samples_is_unstable() {
        assert!(stable_mean(CORNER, &[], 3.0).is_err());
        assert!(stable_mean(CORNER, &[20.0], 3.0).is_err());
        assert!(stable_mean(CORNER, &[-1.0, 20.0, f64::NAN], 3.0).is_err());
    }

    #[test]
    fn negative_samples_are_ignored() {
        let mean = stable_mean(CORNER, &[-4.0, 30.0, 31.0], 3.0).unwrap();
        assert!((mean - 30.5).abs() < 1e-9);
    }

    #[test]
    fn deviation_equal_to_tolerance_is_stable() {
        // mean 20, both samples exactly 3 cm away
        assert!(stable_mean(CORNER, &[17.0, 23.0], 3.0).is_ok());
    }

    #[test]
    fn simulated_echo_measures_distance() {
        let rig = SimRig::new().with_obstacle(CORNER, 25.0);
        let distance = sampler(&rig).sample_once().unwrap();
        assert!((distance - 25.0).abs() < 0.05, "measured {distance}");
        assert_eq!(rig.gpio().triggers(CORNER), 1);
    }

    #[test]
    fn missing_obstacle_times_out_on_rising_edge() {
        let rig = SimRig::new();
        let err = sampler(&rig).sample_once().unwrap_err();
        assert_eq!(
            err,
            NavError::Timeout {
                sensor: "Back Left".into(),
                phase: EchoPhase::Rising,
            }
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn overlong_echo_times_out_on_falling_edge() {
        // 100 ms of echo covers ~1715 cm.
        let rig = SimRig::new().with_obstacle(CORNER, 5_000.0);
        let err = sampler(&rig).sample_once().unwrap_err();
        assert!(matches!(
            err,
            NavError::Timeout { phase: EchoPhase::Falling, .. }
        ));
    }

    #[test]
    fn read_distance_averages_a_steady_burst() {
        let rig = SimRig::new().with_obstacle(CORNER, 25.0);
        let reading = sampler(&rig).read_distance().unwrap();
        assert_eq!(reading.corner, CORNER);
        let d = reading.distance_cm.expect("stable reading");
        assert!((d - 25.0).abs() < 0.05);
        assert_eq!(rig.gpio().triggers(CORNER), 3);
    }

    #[test]
    fn read_distance_rejects_an_outlier_burst() {
        let rig = SimRig::new();
        rig.gpio().script(CORNER, [Some(20.0), Some(50.0), Some(21.0)]);
        let reading = sampler(&rig).read_distance().unwrap();
        assert!(reading.distance_cm.is_none());
    }

    #[test]
    fn read_distance_tolerates_one_timeout() {
        let rig = SimRig::new();
        rig.gpio().script(CORNER, [None, Some(30.0), Some(30.0)]);
        let d = sampler(&rig).read_distance().unwrap().distance_cm.unwrap();
        assert!((d - 30.0).abs() < 0.05);
    }

    #[test]
    fn read_distance_needs_two_echoes() {
        let rig = SimRig::new();
        rig.gpio().script(CORNER, [None, None, Some(30.0)]);
        let reading = sampler(&rig).read_distance().unwrap();
        assert!(reading.distance_cm.is_none());
    }

    #[test]
    fn gpio_fault_propagates() {
        let rig = SimRig::new().with_obstacle(CORNER, 25.0);
        let ranger = sampler(&rig);
        rig.gpio().fail_pin(CORNER.echo_pin());
        assert!(matches!(
            ranger.read_distance(),
            Err(NavError::HardwareFault { .. })
        ));
    }

    #[test]
    fn cancelled_burst_fires_no_further_pulses() {
        let rig = SimRig::new().with_obstacle(CORNER, 25.0);
        let ranger = sampler(&rig);
        let token = CancelToken::new();

        let reading = ranger.read_distance_until(&token).unwrap().expect("full burst");
        assert!((reading.distance_cm.unwrap() - 25.0).abs() < 0.05);
        assert_eq!(rig.gpio().triggers(CORNER), 3);

        token.cancel();
        assert_eq!(ranger.read_distance_until(&token).unwrap(), None);
        assert_eq!(rig.gpio().triggers(CORNER), 3);
    }

    #[test]
    fn construction_fails_on_faulty_trigger_pin() {
        let rig = SimRig::new();
        rig.gpio().fail_pin(CORNER.trigger_pin());
        let result = RangeSampler::new(&rig.context(), CORNER, &RangeConfig::default());
        assert!(matches!(result, Err(NavError::HardwareFault { .. })));
    }

    #[test]
    fn probe_tolerates_silence_but_not_faults() {
        let rig = SimRig::new();
        let ranger = sampler(&rig);
        assert!(ranger.probe().is_ok());

        rig.gpio().fail_pin(CORNER.echo_pin());
        assert!(ranger.probe().is_err());
    }

    #[test]
    fn default_config_is_valid_and_bad_ones_are_not() {
        assert!(RangeConfig::default().validate().is_ok());

        let single_trial = RangeConfig { trials: 1, ..RangeConfig::default() };
        assert!(matches!(single_trial.validate(), Err(NavError::InvalidConfig(_))));

        let duplicate = RangeConfig {
            corners: vec![CarCorner::BackLeft, CarCorner::BackLeft],
            ..RangeConfig::default()
        };
        assert!(duplicate.validate().is_err());

        let empty = RangeConfig { corners: vec![], ..RangeConfig::default() };
        assert!(empty.validate().is_err());
    }
}
