//! `echonav-runtime` – supervision and process plumbing.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: owns the
//!   range aggregator, angle estimator and feedback scheduler and drives
//!   their background loops through an idempotent `start`/`stop`/`shutdown`
//!   lifecycle.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod supervisor;
pub mod telemetry;

pub use supervisor::{Supervisor, SupervisorConfig, SupervisorStatus};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
