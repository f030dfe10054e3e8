//! Position tracking for stepper axes.
//!
//! The MCU owns the step counter; the host keeps the last reported value and
//! the counter value at the homed origin.

use crate::config::units::Steps;

/// Stepper position tracker.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    /// Last position reported by the MCU
    raw: Steps,
    /// Number of reports received, never reset
    reports: u64,
    /// Raw position at the origin
    origin: Steps,
    /// Origin was found by homing
    homed: bool,
    /// Steps per distance unit for conversions
    steps_per_distance: f64,
}

impl Position {
    /// Create a new position tracker.
    #[inline]
    pub fn new(steps_per_distance: f64) -> Self {
        Self {
            raw: Steps::default(),
            reports: 0,
            origin: Steps::default(),
            homed: false,
            steps_per_distance,
        }
    }

    /// Record a position report from the MCU.
    #[inline]
    pub fn record(&mut self, raw: Steps) {
        self.raw = raw;
        self.reports += 1;
    }

    /// Get the last reported MCU step counter.
    #[inline]
    pub fn raw(&self) -> Steps {
        self.raw
    }

    /// Get the number of reports received so far.
    #[inline]
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Get the step counter value at the origin.
    #[inline]
    pub fn origin(&self) -> Steps {
        self.origin
    }

    /// Check whether the origin came from a successful homing.
    #[inline]
    pub fn is_homed(&self) -> bool {
        self.homed
    }

    /// Get current position in steps relative to the origin.
    #[inline]
    pub fn steps(&self) -> Steps {
        self.raw - self.origin
    }

    /// Get current position in distance units relative to the origin.
    #[inline]
    pub fn distance(&self) -> f64 {
        self.steps().to_distance(self.steps_per_distance)
    }

    /// Set the last reported position as the new origin.
    #[inline]
    pub fn set_origin(&mut self) {
        self.origin = self.raw;
        self.homed = true;
    }

    /// Forget positions after the MCU was (re)configured.
    ///
    /// The report counter keeps counting so pending waiters still see new reports.
    #[inline]
    pub fn reset(&mut self) {
        self.raw = Steps::default();
        self.origin = Steps::default();
        self.homed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_tracking() {
        let mut pos = Position::new(400.0);
        assert_eq!(pos.distance(), 0.0);
        assert!(!pos.is_homed());

        pos.record(Steps(-5000));
        pos.set_origin();
        assert!(pos.is_homed());
        assert_eq!(pos.distance(), 0.0);

        pos.record(Steps(-1000));
        assert_eq!(pos.steps(), Steps(4000));
        assert!((pos.distance() - 10.0).abs() < 1e-12);
        assert_eq!(pos.reports(), 2);
    }

    #[test]
    fn test_reset_keeps_report_count() {
        let mut pos = Position::new(400.0);
        pos.record(Steps(800));
        pos.set_origin();
        pos.reset();

        assert_eq!(pos.raw(), Steps(0));
        assert_eq!(pos.origin(), Steps(0));
        assert!(!pos.is_homed());
        assert_eq!(pos.reports(), 1);
    }
}
