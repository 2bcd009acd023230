//! `echonav-perception` – sensing layer.
//!
//! Turns raw ultrasonic echoes and gyroscope rates into the two signals the
//! feedback layer acts on: the nearest obstacle distance and the current
//! turn direction.
//!
//! # Modules
//!
//! - [`ultrasonic`] – [`RangeSampler`][ultrasonic::RangeSampler]: one
//!   trigger/echo ranger with bounded echo timing and burst stability
//!   filtering.
//! - [`aggregator`] – [`RangeAggregator`][aggregator::RangeAggregator]:
//!   sweeps every mounted ranger once per polling tick.
//! - [`angle`] – [`AngleEstimator`][angle::AngleEstimator]: bias
//!   calibration, low-pass filtering, drift leak and yaw clamping on a
//!   background loop.
//! - [`turn`] – [`TurnClassifier`][turn::TurnClassifier] and the
//!   [`TurnSink`][turn::TurnSink] that receives its edges.

pub mod aggregator;
pub mod angle;
pub mod turn;
pub mod ultrasonic;

pub use aggregator::RangeAggregator;
pub use angle::{AngleConfig, AngleEstimator, AngleSnapshot, YawFilter};
pub use turn::{TurnClassifier, TurnSink};
pub use ultrasonic::{RangeConfig, RangeSampler};
