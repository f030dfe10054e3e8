//! Motion profile calculation.
//!
//! Provides the three-phase trapezoidal profile used for every focuser move:
//! accelerate, cruise at constant speed, then decelerate. Each phase is a
//! single MCU `queue_step` segment whose step interval changes linearly by a
//! fixed `add` per step.

use libm::{floor, sqrt};

use crate::error::MotionError;

/// Direction of motor motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Toward increasing positions (`dir=1`).
    Positive,
    /// Toward decreasing positions (`dir=0`).
    Negative,
}

impl Direction {
    /// Direction of a signed move.
    #[inline]
    pub fn of(distance: f64, speed: f64) -> Self {
        if distance * speed > 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// Value of the `dir` argument of `set_next_step_dir`.
    #[inline]
    pub fn bit(self) -> u8 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => 0,
        }
    }

    /// Get the sign multiplier.
    #[inline]
    pub fn sign(self) -> i64 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }
}

/// Phase of a trapezoidal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionPhase {
    /// Accelerating from rest toward cruise speed.
    Accelerating,
    /// Moving at constant cruise speed.
    Cruising,
    /// Decelerating from cruise speed to rest.
    Decelerating,
}

impl MotionPhase {
    /// Phases in execution order.
    pub const ALL: [MotionPhase; 3] = [
        MotionPhase::Accelerating,
        MotionPhase::Cruising,
        MotionPhase::Decelerating,
    ];
}

/// One constant-add run of steps.
///
/// Step `i` (0-based) of the segment is scheduled `interval + i * add`
/// clock ticks after the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// Number of steps.
    pub steps: u32,
    /// Interval before the first step, in MCU ticks.
    pub interval: u32,
    /// Change in interval per step, in MCU ticks.
    pub add: i32,
    /// Sum of every step interval in the segment.
    pub ticks: u64,
}

impl Segment {
    fn new(steps: u32, interval: u32, add: i32) -> Result<Self, MotionError> {
        let n = steps as i128;
        let ticks = n * interval as i128 + add as i128 * (n * (n - 1) / 2);
        let ticks = u64::try_from(ticks).map_err(|_| MotionError::Overflow)?;
        Ok(Self {
            steps,
            interval,
            add,
            ticks,
        })
    }

    /// Check whether the segment issues no steps.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }
}

/// Computed three-segment motion profile.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionProfile {
    /// Total steps to move (absolute value).
    pub total_steps: u32,

    /// Speed held during the cruise phase, in distance units per second.
    pub cruise_speed: f64,

    /// Accelerate, cruise and decelerate segments, in that order.
    pub segments: [Segment; 3],
}

impl MotionProfile {
    /// Create a zero-length profile (no motion).
    pub fn zero() -> Self {
        Self {
            total_steps: 0,
            cruise_speed: 0.0,
            segments: [Segment::default(); 3],
        }
    }

    /// Check if this is a zero-length profile.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.total_steps == 0
    }

    /// Segment for one phase.
    #[inline]
    pub fn segment(&self, phase: MotionPhase) -> &Segment {
        match phase {
            MotionPhase::Accelerating => &self.segments[0],
            MotionPhase::Cruising => &self.segments[1],
            MotionPhase::Decelerating => &self.segments[2],
        }
    }

    /// Segments labelled with their phase.
    pub fn phases(&self) -> impl Iterator<Item = (MotionPhase, &Segment)> {
        MotionPhase::ALL.into_iter().zip(self.segments.iter())
    }

    /// Duration of the whole move in MCU ticks.
    pub fn total_ticks(&self) -> u64 {
        self.segments.iter().map(|s| s.ticks).sum()
    }

    /// Duration of the whole move in seconds.
    pub fn duration_secs(&self, clock_freq: f64) -> f64 {
        self.total_ticks() as f64 / clock_freq
    }
}

/// Converts distances into step timing for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionPlanner {
    /// MCU steps per distance unit.
    pub steps_per_distance: f64,
    /// MCU clock frequency in Hz.
    pub clock_freq: f64,
}

impl MotionPlanner {
    /// Create a planner for an axis.
    pub const fn new(steps_per_distance: f64, clock_freq: f64) -> Self {
        Self {
            steps_per_distance,
            clock_freq,
        }
    }

    /// Round a distance to whole steps, halves away from zero.
    #[inline]
    pub fn distance_to_steps(&self, distance: f64) -> f64 {
        floor(distance * self.steps_per_distance + 0.5)
    }

    /// Plan a move of `distance` (unsigned) at up to `max_speed`.
    ///
    /// Cruise speed is capped so that acceleration and deceleration together
    /// cover at most half of the move.
    ///
    /// # Errors
    ///
    /// Returns `MotionError` if the inputs are not positive and finite, or if
    /// the resulting step timing does not fit the MCU's command fields.
    pub fn plan(
        &self,
        distance: f64,
        max_speed: f64,
        acceleration: f64,
    ) -> Result<MotionProfile, MotionError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(MotionError::InvalidDistance(distance));
        }
        if !max_speed.is_finite() || max_speed <= 0.0 {
            return Err(MotionError::InvalidSpeed(max_speed));
        }
        if !acceleration.is_finite() || acceleration <= 0.0 {
            return Err(MotionError::InvalidAcceleration(acceleration));
        }

        let spd = self.steps_per_distance;
        let total_steps = to_u32(self.distance_to_steps(distance))?;
        if total_steps == 0 {
            return Ok(MotionProfile::zero());
        }

        let cruise_speed = max_speed.min(sqrt(0.5 * distance * acceleration));
        let cruise_interval = to_u32(self.clock_freq / (cruise_speed * spd))?;

        let accel_time = cruise_speed / acceleration;
        let accel_distance = 0.5 * acceleration * (accel_time * accel_time);
        let accel_steps = to_u32(floor(accel_distance * spd + 0.5))?.min(total_steps / 2);
        let cruise_steps = total_steps - 2 * accel_steps;

        let add = if accel_steps == 0 {
            0
        } else {
            let magnitude = 2 * cruise_interval as u64 / accel_steps as u64;
            -i32::try_from(magnitude).map_err(|_| MotionError::Overflow)?
        };
        let accel_interval = cruise_interval as i64 - accel_steps as i64 * add as i64;
        let accel_interval = u32::try_from(accel_interval).map_err(|_| MotionError::Overflow)?;

        Ok(MotionProfile {
            total_steps,
            cruise_speed,
            segments: [
                Segment::new(accel_steps, accel_interval, add)?,
                Segment::new(cruise_steps, cruise_interval, 0)?,
                Segment::new(accel_steps, cruise_interval, -add)?,
            ],
        })
    }
}

fn to_u32(value: f64) -> Result<u32, MotionError> {
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(MotionError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: f64 = 16_000_000.0;

    fn seg(steps: u32, interval: u32, add: i32, ticks: u64) -> Segment {
        Segment {
            steps,
            interval,
            add,
            ticks,
        }
    }

    #[test]
    fn test_speed_limited_profile() {
        let profile = MotionPlanner::new(400.0, FREQ).plan(50.0, 10.0, 100.0).unwrap();

        assert_eq!(profile.total_steps, 20000);
        assert_eq!(profile.cruise_speed, 10.0);
        assert_eq!(profile.segments[0], seg(200, 12000, -40, 1_604_000));
        assert_eq!(profile.segments[1], seg(19600, 4000, 0, 78_400_000));
        assert_eq!(profile.segments[2], seg(200, 4000, 40, 1_596_000));
    }

    #[test]
    fn test_distance_limited_profile() {
        let profile = MotionPlanner::new(400.0, FREQ).plan(10.0, 1000.0, 100.0).unwrap();

        assert_eq!(profile.total_steps, 4000);
        assert!((profile.cruise_speed - 22.360679774997898).abs() < 1e-12);
        assert_eq!(profile.segments[0], seg(1000, 4788, -3, 3_289_500));
        assert_eq!(profile.segments[1], seg(2000, 1788, 0, 3_576_000));
        assert_eq!(profile.segments[2], seg(1000, 1788, 3, 3_286_500));
    }

    #[test]
    fn test_slow_profile() {
        let profile = MotionPlanner::new(400.0, FREQ).plan(4.0, 1.0, 100.0).unwrap();

        assert_eq!(profile.segments[0], seg(2, 120000, -40000, 200_000));
        assert_eq!(profile.segments[1], seg(1596, 40000, 0, 63_840_000));
        assert_eq!(profile.segments[2], seg(2, 40000, 40000, 120_000));
    }

    #[test]
    fn test_step_counts_sum_to_total() {
        let profile = MotionPlanner::new(400.0, FREQ).plan(2.0, 5.0, 100.0).unwrap();

        let steps: u32 = profile.segments.iter().map(|s| s.steps).sum();
        assert_eq!(steps, profile.total_steps);
        assert_eq!(profile.segment(MotionPhase::Cruising).steps, 700);
        assert_eq!(profile.total_ticks(), 808_000 + 5_600_000 + 792_000);
    }

    #[test]
    fn test_zero_distance() {
        let profile = MotionPlanner::new(400.0, FREQ).plan(0.0, 10.0, 100.0).unwrap();
        assert!(profile.is_zero());
        assert_eq!(profile.total_ticks(), 0);
    }

    #[test]
    fn test_invalid_inputs() {
        let planner = MotionPlanner::new(400.0, FREQ);
        assert!(matches!(
            planner.plan(-1.0, 10.0, 100.0),
            Err(MotionError::InvalidDistance(_))
        ));
        assert!(matches!(
            planner.plan(f64::NAN, 10.0, 100.0),
            Err(MotionError::InvalidDistance(_))
        ));
        assert!(matches!(
            planner.plan(1.0, 0.0, 100.0),
            Err(MotionError::InvalidSpeed(_))
        ));
        assert!(matches!(
            planner.plan(1.0, 10.0, -5.0),
            Err(MotionError::InvalidAcceleration(_))
        ));
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::of(-48.0, 10.0).bit(), 0);
        assert_eq!(Direction::of(2.0, 5.0).bit(), 1);
        assert_eq!(Direction::of(-4.0, 1.0).sign(), -1);
    }
}
