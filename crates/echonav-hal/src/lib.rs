//! `echonav-hal` – Hardware Abstraction Layer
//!
//! Every piece of hardware EchoNav touches is reached through a trait in
//! this crate, so the sensing and feedback logic never depends on a
//! particular board or driver library.
//!
//! # Modules
//!
//! - [`gpio`] – [`GpioBus`][gpio::GpioBus]: trigger/echo lines plus the
//!   microsecond time base used for echo timing.
//! - [`gyro`] – [`Gyroscope`][gyro::Gyroscope]: single-axis yaw-rate sensor.
//! - [`display`] – [`DisplayDriver`][display::DisplayDriver] and the fixed
//!   arrow [`Pattern`][display::Pattern]s.
//! - [`audio`] – [`AudioSink`][audio::AudioSink] and the [`Tone`][audio::Tone]
//!   waveform it plays.
//! - [`context`] – [`HardwareContext`][context::HardwareContext]: explicitly
//!   owned sensor buses with an `init`/`release` lifecycle.
//! - [`sim`] – simulated drivers for headless tests and the demo CLI.

pub mod audio;
pub mod context;
pub mod display;
pub mod gpio;
pub mod gyro;
pub mod sim;

pub use audio::{AudioSink, Tone};
pub use context::HardwareContext;
pub use display::{DisplayDriver, Pattern};
pub use gpio::{GpioBus, Level};
pub use gyro::Gyroscope;
