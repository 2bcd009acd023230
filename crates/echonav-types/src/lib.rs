use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical mounting position of an ultrasonic transducer on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarCorner {
    BackLeft,
    BackRight,
    FrontRight,
    FrontLeft,
}

/// Wiring table, BCM numbering: `(corner, trigger_pin, echo_pin, label)`.
const CORNER_TABLE: [(CarCorner, u8, u8, &str); 4] = [
    (CarCorner::BackLeft, 16, 26, "Back Left"),
    (CarCorner::BackRight, 17, 27, "Back Right"),
    (CarCorner::FrontRight, 5, 6, "Front Right"),
    (CarCorner::FrontLeft, 20, 21, "Front Left"),
];

impl CarCorner {
    /// Every corner, in wiring-table order.
    pub const ALL: [CarCorner; 4] = [
        CarCorner::BackLeft,
        CarCorner::BackRight,
        CarCorner::FrontRight,
        CarCorner::FrontLeft,
    ];

    fn entry(self) -> &'static (CarCorner, u8, u8, &'static str) {
        // The table is indexed by declaration order.
        &CORNER_TABLE[self as usize]
    }

    /// GPIO pin that emits the trigger pulse.
    pub fn trigger_pin(self) -> u8 {
        self.entry().1
    }

    /// GPIO pin that carries the echo pulse.
    pub fn echo_pin(self) -> u8 {
        self.entry().2
    }

    /// Human-readable name, e.g. `"Back Left"`.
    pub fn label(self) -> &'static str {
        self.entry().3
    }

    /// Parse a snake_case or label form (`"back_left"`, `"Back Left"`).
    pub fn parse(s: &str) -> Option<CarCorner> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        CarCorner::ALL
            .into_iter()
            .find(|c| c.label().to_ascii_lowercase().replace(' ', "_") == wanted)
    }
}

impl fmt::Display for CarCorner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One filtered distance measurement from one sensor.
///
/// `distance_cm == None` means the sensor produced no reliable reading this
/// cycle (timeout, unstable batch, or hardware fault).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeReading {
    pub corner: CarCorner,
    pub distance_cm: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl RangeReading {
    /// Build a reading stamped with the current wall-clock time.
    pub fn now(corner: CarCorner, distance_cm: Option<f64>) -> Self {
        Self {
            corner,
            distance_cm,
            captured_at: Utc::now(),
        }
    }

    /// Shorthand for a reading with no usable distance.
    pub fn absent(corner: CarCorner) -> Self {
        Self::now(corner, None)
    }
}

/// Discrete steering direction derived from the yaw estimate.
///
/// Ordered by signed code so `Left < Idle < Right`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(i8)]
pub enum TurnState {
    Left = -1,
    #[default]
    Idle = 0,
    Right = 1,
}

impl TurnState {
    /// Signed code: `-1`, `0` or `1`.
    pub fn code(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Left => "Left Turn",
            TurnState::Idle => "Idle",
            TurnState::Right => "Right Turn",
        };
        f.write_str(name)
    }
}

/// Which half of an echo measurement ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoPhase {
    /// Waiting for the echo line to go high.
    Rising,
    /// Waiting for the echo line to fall back low.
    Falling,
}

impl fmt::Display for EchoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoPhase::Rising => f.write_str("rising edge"),
            EchoPhase::Falling => f.write_str("falling edge"),
        }
    }
}

/// Error type shared by every EchoNav crate.
///
/// `Timeout` and `Unstable` are routine per-tick outcomes and are turned into
/// absent readings close to where they occur. `HardwareFault` aborts setup.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("Echo timeout on {sensor} while waiting for {phase}")]
    Timeout { sensor: String, phase: EchoPhase },

    #[error("Unstable readings on {sensor}: {valid} valid, spread {spread_cm:.2} cm")]
    Unstable {
        sensor: String,
        valid: usize,
        spread_cm: f64,
    },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Background task '{task}' did not exit within {waited_ms} ms")]
    ThreadJoinTimeout { task: String, waited_ms: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NavError {
    /// Convenience constructor for [`NavError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        NavError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }

    /// `true` for errors that only cost one reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NavError::Timeout { .. } | NavError::Unstable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_pin_table() {
        assert_eq!(CarCorner::BackLeft.trigger_pin(), 16);
        assert_eq!(CarCorner::BackLeft.echo_pin(), 26);
        assert_eq!(CarCorner::BackRight.trigger_pin(), 17);
        assert_eq!(CarCorner::BackRight.echo_pin(), 27);
        assert_eq!(CarCorner::FrontRight.trigger_pin(), 5);
        assert_eq!(CarCorner::FrontRight.echo_pin(), 6);
        assert_eq!(CarCorner::FrontLeft.trigger_pin(), 20);
        assert_eq!(CarCorner::FrontLeft.echo_pin(), 21);
    }

    #[test]
    fn corner_labels_and_parse() {
        assert_eq!(CarCorner::FrontLeft.to_string(), "Front Left");
        assert_eq!(CarCorner::parse("back_right"), Some(CarCorner::BackRight));
        assert_eq!(CarCorner::parse("Front Right"), Some(CarCorner::FrontRight));
        assert_eq!(CarCorner::parse("front-left"), Some(CarCorner::FrontLeft));
        assert_eq!(CarCorner::parse("roof"), None);
    }

    #[test]
    fn turn_state_ordering_follows_code() {
        assert!(TurnState::Left < TurnState::Idle);
        assert!(TurnState::Idle < TurnState::Right);
        assert_eq!(TurnState::Left.code(), -1);
        assert_eq!(TurnState::Right.code(), 1);
        assert_eq!(TurnState::default(), TurnState::Idle);
    }

    #[test]
    fn range_reading_roundtrip() {
        let reading = RangeReading::now(CarCorner::BackLeft, Some(12.5));
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("back_left"));
        let back: RangeReading = serde_json::from_str(&json).unwrap();
        assert_eq!(reading, back);
    }

    #[test]
    fn absent_reading_has_no_distance() {
        let reading = RangeReading::absent(CarCorner::FrontRight);
        assert!(reading.distance_cm.is_none());
    }

    #[test]
    fn nav_error_display_and_recoverability() {
        let err = NavError::Timeout {
            sensor: "Back Left".to_string(),
            phase: EchoPhase::Rising,
        };
        assert!(err.to_string().contains("rising edge"));
        assert!(err.is_recoverable());

        let err2 = NavError::hardware("gyroscope", "i2c nack");
        assert!(err2.to_string().contains("gyroscope"));
        assert!(!err2.is_recoverable());
    }
}
