//! `echonav-feedback` – operator feedback layer.
//!
//! # Modules
//!
//! - [`cadence`] – [`CadenceMapper`][cadence::CadenceMapper]: pure,
//!   nonlinear mapping from obstacle distance to beep interval.
//! - [`scheduler`] – [`FeedbackScheduler`][scheduler::FeedbackScheduler]:
//!   the restartable beep loop plus the turn-arrow display.

pub mod cadence;
pub mod scheduler;

pub use cadence::{CadenceConfig, CadenceMapper};
pub use scheduler::{BeepConfig, BeepState, FeedbackScheduler};
