//! Upload cadence: slider position 0..=20 maps to (5 + 5p) / 100 Hz.
//!
//! Single writer (user input), many readers (the upload timer). The value is
//! stored as `f64` bits in an atomic; readers pick it up on their next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;

pub const MIN_CADENCE_POSITION: u32 = 0;
pub const MAX_CADENCE_POSITION: u32 = 20;
/// 0.5 Hz.
pub const DEFAULT_CADENCE_POSITION: u32 = 9;

/// Frequency in Hz for a slider position.
pub fn position_to_hz(position: u32) -> Result<f64, PipelineError> {
    if position > MAX_CADENCE_POSITION {
        return Err(PipelineError::InvalidCadence(format!(
            "position {} outside {}..={}",
            position, MIN_CADENCE_POSITION, MAX_CADENCE_POSITION
        )));
    }
    Ok((5.0 + 5.0 * position as f64) / 100.0)
}

/// Shortest timer period; frequencies above 2 kHz would otherwise round to zero.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Timer period for a frequency: `round(1000 / hz)` milliseconds, at least `MIN_PERIOD`.
pub fn period_for(hz: f64) -> Duration {
    Duration::from_millis((1000.0 / hz).round() as u64).max(MIN_PERIOD)
}

fn check_frequency(hz: f64) -> Result<f64, PipelineError> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(PipelineError::InvalidCadence(format!(
            "frequency must be a positive number of Hz, got {}",
            hz
        )));
    }
    Ok(hz)
}

#[derive(Clone, Debug)]
pub struct UploadCadence {
    hz_bits: Arc<AtomicU64>,
}

impl UploadCadence {
    pub fn new(hz: f64) -> Result<Self, PipelineError> {
        let hz = check_frequency(hz)?;
        Ok(Self {
            hz_bits: Arc::new(AtomicU64::new(hz.to_bits())),
        })
    }

    pub fn from_position(position: u32) -> Result<Self, PipelineError> {
        Self::new(position_to_hz(position)?)
    }

    /// Move the slider. Returns the new frequency.
    pub fn set_position(&self, position: u32) -> Result<f64, PipelineError> {
        let hz = position_to_hz(position)?;
        self.store(hz);
        Ok(hz)
    }

    pub fn set_frequency(&self, hz: f64) -> Result<(), PipelineError> {
        let hz = check_frequency(hz)?;
        self.store(hz);
        Ok(())
    }

    fn store(&self, hz: f64) {
        self.hz_bits.store(hz.to_bits(), Ordering::SeqCst);
        log::info!("upload cadence set to {:.2} Hz ({} ms)", hz, period_for(hz).as_millis());
    }

    pub fn frequency(&self) -> f64 {
        f64::from_bits(self.hz_bits.load(Ordering::SeqCst))
    }

    pub fn period(&self) -> Duration {
        period_for(self.frequency())
    }

    /// Slider position of the current frequency, if it sits on a step.
    pub fn position(&self) -> Option<u32> {
        let hz = self.frequency();
        let candidate = ((hz * 100.0 - 5.0) / 5.0).round();
        if !(0.0..=MAX_CADENCE_POSITION as f64).contains(&candidate) {
            return None;
        }
        let position = candidate as u32;
        let step = position_to_hz(position).ok()?;
        ((step - hz).abs() < 1e-9).then_some(position)
    }
}

impl Default for UploadCadence {
    fn default() -> Self {
        Self {
            hz_bits: Arc::new(AtomicU64::new(0.5_f64.to_bits())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slider_maps_to_documented_frequencies() {
        assert!((position_to_hz(0).unwrap() - 0.05).abs() < 1e-12);
        assert!((position_to_hz(9).unwrap() - 0.5).abs() < 1e-12);
        assert!((position_to_hz(20).unwrap() - 1.0).abs() < 1e-12);
        assert!(matches!(
            position_to_hz(21),
            Err(PipelineError::InvalidCadence(_))
        ));
    }

    #[test]
    fn period_is_rounded_milliseconds() {
        assert_eq!(period_for(0.05), Duration::from_millis(20_000));
        assert_eq!(period_for(0.5), Duration::from_millis(2_000));
        assert_eq!(period_for(1.0), Duration::from_millis(1_000));
        // 1000 / 0.15 = 6666.67
        assert_eq!(period_for(position_to_hz(2).unwrap()), Duration::from_millis(6_667));
    }

    #[test]
    fn very_high_frequencies_keep_a_nonzero_period() {
        assert_eq!(period_for(2_500.0), MIN_PERIOD);
        assert_eq!(period_for(1e12), MIN_PERIOD);
        let cadence = UploadCadence::default();
        cadence.set_frequency(10_000.0).unwrap();
        assert_eq!(cadence.period(), Duration::from_millis(1));
    }

    #[test]
    fn default_is_half_hertz_at_position_nine() {
        let cadence = UploadCadence::default();
        assert_eq!(cadence.period(), Duration::from_millis(2_000));
        assert_eq!(cadence.position(), Some(DEFAULT_CADENCE_POSITION));
    }

    #[test]
    fn changes_are_visible_to_clones() {
        let cadence = UploadCadence::from_position(0).unwrap();
        let reader = cadence.clone();
        assert_eq!(cadence.set_position(20).unwrap(), 1.0);
        assert_eq!(reader.period(), Duration::from_millis(1_000));
        assert_eq!(reader.position(), Some(20));
    }

    #[test]
    fn invalid_frequencies_are_rejected_and_keep_previous_value() {
        let cadence = UploadCadence::default();
        assert!(cadence.set_frequency(0.0).is_err());
        assert!(cadence.set_frequency(-1.0).is_err());
        assert!(cadence.set_frequency(f64::NAN).is_err());
        assert!(cadence.set_position(42).is_err());
        assert_eq!(cadence.frequency(), 0.5);

        cadence.set_frequency(0.3333).unwrap();
        assert_eq!(cadence.position(), None);
    }
}
