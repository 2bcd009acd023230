//! `echonav-kernel` – Lifecycle primitives
//!
//! The pieces every EchoNav background loop is built from.  Nothing here
//! knows about sensors; it only starts, paces, and stops threads.
//!
//! # Modules
//!
//! - [`task`] – [`BackgroundTask`][task::BackgroundTask] and
//!   [`CancelToken`][task::CancelToken]: named threads with cooperative
//!   cancellation, interruptible sleeps, and bounded-timeout joins.

pub mod task;

pub use task::{BackgroundTask, CancelToken, join_with_timeout};
