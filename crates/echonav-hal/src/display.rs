//! Generic `DisplayDriver` trait for the direction-arrow LED matrix.
//!
//! The pixel content of each arrow belongs to the driver; the rest of the
//! system only picks which [`Pattern`] to show.

use echonav_types::{NavError, TurnState};

/// The fixed set of images the display can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Arrow pointing up and to the left.
    ArrowLeft,
    /// Straight arrow shown while driving without a turn.
    ArrowNeutral,
    /// Arrow pointing up and to the right.
    ArrowRight,
}

impl From<TurnState> for Pattern {
    fn from(state: TurnState) -> Self {
        match state {
            TurnState::Left => Pattern::ArrowLeft,
            TurnState::Idle => Pattern::ArrowNeutral,
            TurnState::Right => Pattern::ArrowRight,
        }
    }
}

/// A pixel display that can show one of the fixed [`Pattern`]s.
pub trait DisplayDriver: Send {
    /// Replace the current image with `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the display cannot be written.
    fn show_pattern(&mut self, pattern: Pattern) -> Result<(), NavError>;

    /// Turn every pixel off.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::HardwareFault`] if the display cannot be written.
    fn clear(&mut self) -> Result<(), NavError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_state_maps_to_pattern() {
        assert_eq!(Pattern::from(TurnState::Left), Pattern::ArrowLeft);
        assert_eq!(Pattern::from(TurnState::Idle), Pattern::ArrowNeutral);
        assert_eq!(Pattern::from(TurnState::Right), Pattern::ArrowRight);
    }
}
