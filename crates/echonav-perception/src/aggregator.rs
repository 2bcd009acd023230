//! Sweep every mounted ranger once per polling tick.

use echonav_hal::HardwareContext;
use echonav_kernel::CancelToken;
use echonav_types::{CarCorner, NavError, RangeReading};
use tracing::{info, warn};

use crate::ultrasonic::{RangeConfig, RangeSampler};

/// One [`RangeSampler`] per configured corner, polled in configuration
/// order.
pub struct RangeAggregator {
    samplers: Vec<RangeSampler>,
}

impl RangeAggregator {
    /// Validate `config`, claim every ranger's pins and probe each one.
    ///
    /// # Errors
    ///
    /// - [`NavError::InvalidConfig`] for an unusable configuration.
    /// - [`NavError::HardwareFault`] when any ranger cannot be set up.
    pub fn new(ctx: &HardwareContext, config: &RangeConfig) -> Result<Self, NavError> {
        config.validate()?;
        let mut samplers = Vec::with_capacity(config.corners.len());
        for &corner in &config.corners {
            let sampler = RangeSampler::new(ctx, corner, config)?;
            sampler.probe()?;
            samplers.push(sampler);
        }
        info!(rangers = samplers.len(), "range aggregator ready");
        Ok(Self { samplers })
    }

    /// Corners in polling order.
    pub fn corners(&self) -> Vec<CarCorner> {
        self.samplers.iter().map(RangeSampler::corner).collect()
    }

    /// One reading per configured corner.
    ///
    /// A ranger whose bus faults is reported as absent for this sweep; the
    /// remaining rangers are still read.
    pub fn read_all(&self) -> Vec<RangeReading> {
        self.samplers
            .iter()
            .filter_map(|sampler| absent_on_fault(sampler, sampler.read_distance().map(Some)))
            .collect()
    }

    /// [`read_all`](Self::read_all), abandoned as soon as `token` is
    /// cancelled.  Checked before every ranger and between the samples of a
    /// burst, so a stop never waits for a whole sweep.
    ///
    /// Returns `None` for an abandoned sweep.
    pub fn read_all_until(&self, token: &CancelToken) -> Option<Vec<RangeReading>> {
        let mut readings = Vec::with_capacity(self.samplers.len());
        for sampler in &self.samplers {
            if token.is_cancelled() {
                return None;
            }
            readings.push(absent_on_fault(sampler, sampler.read_distance_until(token))?);
        }
        Some(readings)
    }
}

/// Turn a ranger fault into an absent reading; `Ok(None)` passes through.
fn absent_on_fault(
    sampler: &RangeSampler,
    result: Result<Option<RangeReading>, NavError>,
) -> Option<RangeReading> {
    match result {
        Ok(reading) => reading,
        Err(e) => {
            warn!(
                corner = %sampler.corner(),
                error = %e,
                "ranger fault; reading treated as absent"
            );
            Some(RangeReading::absent(sampler.corner()))
        }
    }
}
