//! Conversion progress
//!
//! Progress is the fraction of expected output samples produced so far.  The
//! estimate comes from the container duration and may be missing or wrong, so
//! the fraction is clamped and never moves backwards.

/// Callback receiving progress fractions in `[0, 1]`.
///
/// Invoked synchronously on the converting thread; it must not block.
pub type ProgressCallback = Box<dyn FnMut(f64) + Send>;

/// Progress state for one conversion
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    expected_samples: Option<u64>,
    produced_samples: u64,
    last_reported: f64,
}

impl ProgressTracker {
    /// `duration_secs` is the container duration, `sample_rate` the output
    /// rate.  Unknown or non-positive durations disable intermediate
    /// progress.
    pub fn new(duration_secs: Option<f64>, sample_rate: u32) -> Self {
        let expected_samples = duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * sample_rate as f64).round() as u64)
            .filter(|n| *n > 0);
        Self {
            expected_samples,
            produced_samples: 0,
            last_reported: 0.0,
        }
    }

    /// Record `samples` more output samples.
    ///
    /// Returns the new fraction, or `None` when there is no estimate to
    /// compare against.
    pub fn advance(&mut self, samples: usize) -> Option<f64> {
        self.produced_samples += samples as u64;
        let expected = self.expected_samples?;
        let fraction = (self.produced_samples as f64 / expected as f64).clamp(0.0, 1.0);
        if fraction > self.last_reported {
            self.last_reported = fraction;
        }
        Some(self.last_reported)
    }

    /// Completion: always 1.0.
    pub fn finish(&mut self) -> f64 {
        self.last_reported = 1.0;
        1.0
    }

    pub fn expected_samples(&self) -> Option<u64> {
        self.expected_samples
    }

    pub fn produced_samples(&self) -> u64 {
        self.produced_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let mut p = ProgressTracker::new(Some(1.0), 48_000);
        assert_eq!(p.expected_samples(), Some(48_000));
        assert_eq!(p.advance(12_000), Some(0.25));
        assert_eq!(p.advance(12_000), Some(0.5));
    }

    #[test]
    fn test_progress_clamped_when_estimate_too_low() {
        let mut p = ProgressTracker::new(Some(0.5), 48_000);
        assert_eq!(p.advance(48_000), Some(1.0));
        assert_eq!(p.advance(960), Some(1.0));
    }

    #[test]
    fn test_progress_without_duration() {
        let mut p = ProgressTracker::new(None, 48_000);
        assert_eq!(p.advance(960), None);
        assert_eq!(p.finish(), 1.0);

        let mut p = ProgressTracker::new(Some(0.0), 48_000);
        assert_eq!(p.expected_samples(), None);
        assert_eq!(p.advance(960), None);

        let p = ProgressTracker::new(Some(f64::NAN), 48_000);
        assert_eq!(p.expected_samples(), None);
    }

    #[test]
    fn test_progress_monotonic() {
        let mut p = ProgressTracker::new(Some(2.0), 1_000);
        let mut last = 0.0;
        for _ in 0..10 {
            let f = p.advance(250).unwrap();
            assert!(f >= last);
            assert!((0.0..=1.0).contains(&f));
            last = f;
        }
        assert_eq!(p.produced_samples(), 2_500);
        assert_eq!(p.finish(), 1.0);
    }
}
