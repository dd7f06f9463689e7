//! Status LEDs, one per electrode.

use embedded_hal::digital::OutputPin;

use crate::TouchMask;

/// Output state for a touch mask.
///
/// Channel `i` is asserted exactly when electrode `i` is *not* touched, so
/// at rest every LED is lit and touching an electrode turns its LED off.
pub fn map<const N: usize>(mask: TouchMask) -> [bool; N] {
    core::array::from_fn(|channel| !mask.is_touched(channel))
}

/// Bank of `N` LED outputs, asserted = driven high.
pub struct LedBank<P, const N: usize> {
    pins: [P; N],
}

impl<P: OutputPin, const N: usize> LedBank<P, N> {
    pub fn new(pins: [P; N]) -> Self {
        Self { pins }
    }

    /// Drive every channel to the given state, stopping at the first pin
    /// that fails.
    pub fn apply(&mut self, states: &[bool; N]) -> Result<(), P::Error> {
        for (pin, &on) in self.pins.iter_mut().zip(states) {
            pin.set_state(on.into())?;
        }
        Ok(())
    }

    pub fn set_all(&mut self, on: bool) -> Result<(), P::Error> {
        self.apply(&[on; N])
    }
}
