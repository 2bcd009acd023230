//! Background task handles with cooperative cancellation.
//!
//! Every EchoNav loop (angle estimation, beep playback, range polling) runs on
//! its own OS thread.  A loop receives a [`CancelToken`] and is expected to
//! check it once per iteration and to pace itself with
//! [`CancelToken::sleep`], which returns early as soon as the token is
//! cancelled.  The owner keeps a [`BackgroundTask`] and stops it with a
//! bounded join so a wedged hardware call can never hang shutdown.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use echonav_kernel::task::BackgroundTask;
//!
//! let task = BackgroundTask::spawn("ticker", |token| {
//!     while !token.is_cancelled() {
//!         token.sleep(Duration::from_millis(10));
//!     }
//! })
//! .expect("spawn");
//!
//! task.stop(Duration::from_secs(1)).expect("ticker exits promptly");
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use echonav_types::NavError;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// Granularity of the bounded-join poll.
const JOIN_POLL: Duration = Duration::from_millis(1);

// ─────────────────────────────────────────────────────────────────────────────
// CancelToken
// ─────────────────────────────────────────────────────────────────────────────

/// Shared run-flag that can interrupt a sleeping loop.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Create a token in the "running" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every thread blocked in [`sleep`](Self::sleep).
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    /// Return `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration`, returning early if the token is cancelled.
    ///
    /// Returns `true` when the token is cancelled (either before or during
    /// the sleep), `false` when the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock();
        match Instant::now().checked_add(duration) {
            Some(deadline) => {
                while !*cancelled {
                    if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*cancelled {
                    cvar.wait(&mut cancelled);
                }
            }
        }
        *cancelled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BackgroundTask
// ─────────────────────────────────────────────────────────────────────────────

/// Owned handle to a named background thread.
///
/// Dropping the handle cancels the task without waiting for it.
pub struct BackgroundTask {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `body` on a new named thread, handing it a fresh [`CancelToken`].
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] when the OS refuses to create the
    /// thread.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, NavError>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let token = CancelToken::new();
        let loop_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(loop_token))
            .map_err(|e| NavError::hardware(name, format!("failed to spawn thread: {e}")))?;
        debug!(task = name, "background task spawned");
        Ok(Self {
            name: name.to_string(),
            token,
            handle: Some(handle),
        })
    }

    /// Thread name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while the thread body has not returned.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal cancellation without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the task and wait at most `timeout` for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::ThreadJoinTimeout`] if the thread is still running
    /// when the deadline passes.  The thread is detached in that case.
    pub fn stop(mut self, timeout: Duration) -> Result<(), NavError> {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, &self.name, timeout),
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Join `handle`, giving up after `timeout`.
///
/// A panicked thread is logged and counts as exited.
///
/// # Errors
///
/// Returns [`NavError::ThreadJoinTimeout`] when the thread outlives the
/// deadline.
pub fn join_with_timeout(
    handle: JoinHandle<()>,
    name: &str,
    timeout: Duration,
) -> Result<(), NavError> {
    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() >= timeout {
            warn!(
                task = name,
                timeout_ms = timeout.as_millis() as u64,
                "task did not exit in time; detaching"
            );
            return Err(NavError::ThreadJoinTimeout {
                task: name.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!(task = name, "background task panicked");
    }
    debug!(task = name, "background task joined");
    Ok(())
}
