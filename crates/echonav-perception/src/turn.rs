//! Yaw → [`TurnState`] classification with a symmetric dead zone.
//!
//! ```text
//!   Left         │  Idle  │        Right
//! ───────────────┼────────┼───────────────── yaw (°)
//!              -tol   0  +tol
//! ```
//!
//! [`TurnClassifier`] remembers the last state so consumers only hear about
//! edges, never about a state that merely repeats.

use echonav_types::TurnState;

/// Stateless classification of one yaw sample.
///
/// A yaw sitting exactly on `±tolerance_deg` is still `Idle`.
pub fn classify(yaw_deg: f64, tolerance_deg: f64) -> TurnState {
    if yaw_deg + tolerance_deg < 0.0 {
        TurnState::Left
    } else if yaw_deg - tolerance_deg > 0.0 {
        TurnState::Right
    } else {
        TurnState::Idle
    }
}

/// Receiver of turn-state edges, e.g. the arrow display.
pub trait TurnSink: Send + Sync {
    fn turn_changed(&self, state: TurnState);
}

/// Edge-triggered turn classifier.
#[derive(Debug, Clone)]
pub struct TurnClassifier {
    tolerance_deg: f64,
    state: TurnState,
}

impl TurnClassifier {
    /// Start in [`TurnState::Idle`].
    pub fn new(tolerance_deg: f64) -> Self {
        Self {
            tolerance_deg: tolerance_deg.abs(),
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Classify `yaw_deg`; returns the new state only when it differs from
    /// the previous one.
    pub fn update(&mut self, yaw_deg: f64) -> Option<TurnState> {
        let next = classify(yaw_deg, self.tolerance_deg);
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }

    pub fn reset(&mut self) {
        self.state = TurnState::Idle;
    }
}
