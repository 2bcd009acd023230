//! Distance → beep interval mapping.
//!
//! ```text
//! norm     = clamp((d − min_dist) / (max_dist − min_dist), 0, 1)
//! interval = min_interval + (max_interval − min_interval) · norm^exponent
//! ```
//!
//! An exponent below one makes the cadence change fastest close to the
//! obstacle.  At or beyond `max_dist` there is no beep at all.

use std::time::Duration;

use echonav_types::NavError;
use serde::{Deserialize, Serialize};

/// Longest beep interval a configuration may ask for (s).
pub const MAX_INTERVAL_S: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Distances at or below this beep at `min_interval_s` (cm).
    pub min_dist_cm: f64,
    /// Distances at or beyond this are silent (cm).
    pub max_dist_cm: f64,
    pub min_interval_s: f64,
    pub max_interval_s: f64,
    /// Shape of the curve; `1.0` is linear.
    pub exponent: f64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            min_dist_cm: 2.0,
            max_dist_cm: 50.0,
            min_interval_s: 0.05,
            max_interval_s: 0.5,
            exponent: 0.5,
        }
    }
}

impl CadenceConfig {
    /// # Errors
    ///
    /// Returns [`NavError::InvalidConfig`] when a value is not finite, the
    /// distance range is empty, the interval range is inverted, negative or
    /// longer than [`MAX_INTERVAL_S`], or the exponent is not positive.
    pub fn validate(&self) -> Result<(), NavError> {
        let finite = [
            self.min_dist_cm,
            self.max_dist_cm,
            self.min_interval_s,
            self.max_interval_s,
            self.exponent,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(NavError::InvalidConfig("cadence values must be finite".into()));
        }
        if self.min_dist_cm >= self.max_dist_cm {
            return Err(NavError::InvalidConfig(format!(
                "min_dist_cm ({}) must be below max_dist_cm ({})",
                self.min_dist_cm, self.max_dist_cm
            )));
        }
        if self.min_interval_s < 0.0
            || self.min_interval_s > self.max_interval_s
            || self.max_interval_s > MAX_INTERVAL_S
        {
            return Err(NavError::InvalidConfig(format!(
                "interval range [{}, {}] is invalid",
                self.min_interval_s, self.max_interval_s
            )));
        }
        if self.exponent <= 0.0 {
            return Err(NavError::InvalidConfig(format!(
                "exponent must be positive, got {}",
                self.exponent
            )));
        }
        Ok(())
    }
}

/// Validated, pure distance-to-interval mapping.
#[derive(Debug, Clone)]
pub struct CadenceMapper {
    config: CadenceConfig,
}

impl CadenceMapper {
    /// # Errors
    ///
    /// See [`CadenceConfig::validate`].
    pub fn new(config: CadenceConfig) -> Result<Self, NavError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// Beep interval for the nearest obstacle, or `None` for silence.
    ///
    /// Absent, NaN and negative distances are silent, as is anything at or
    /// beyond `max_dist_cm`.
    ///
    /// ```rust
    /// use echonav_feedback::cadence::{CadenceConfig, CadenceMapper};
    ///
    /// let mapper = CadenceMapper::new(CadenceConfig::default()).unwrap();
    /// let interval = mapper.distance_to_interval(Some(25.0)).unwrap();
    /// assert!((interval.as_secs_f64() - 0.3615).abs() < 1e-3);
    /// assert_eq!(mapper.distance_to_interval(Some(50.0)), None);
    /// ```
    pub fn distance_to_interval(&self, distance_cm: Option<f64>) -> Option<Duration> {
        let d = distance_cm?;
        let c = &self.config;
        if d.is_nan() || d < 0.0 || d >= c.max_dist_cm {
            return None;
        }
        let norm = ((d - c.min_dist_cm) / (c.max_dist_cm - c.min_dist_cm)).clamp(0.0, 1.0);
        let interval =
            c.min_interval_s + (c.max_interval_s - c.min_interval_s) * norm.powf(c.exponent);
        Some(Duration::from_secs_f64(
            interval.clamp(c.min_interval_s, c.max_interval_s),
        ))
    }
}
