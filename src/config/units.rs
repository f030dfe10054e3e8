//! Unit types for step positions and driver microstepping.

use core::ops::Sub;

use serde::Deserialize;

use crate::error::ConfigError;

/// Signed MCU step counter value, as reported by `stepper_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Steps(pub i64);

impl Steps {
    /// Wrap a counter value.
    #[inline]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Counter value.
    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Distance covered by this many steps.
    #[inline]
    pub fn to_distance(self, steps_per_distance: f64) -> f64 {
        self.0 as f64 / steps_per_distance
    }
}

impl Sub for Steps {
    type Output = Self;

    fn sub(self, origin: Self) -> Self::Output {
        Self(self.0 - origin.0)
    }
}

/// TMC microstep resolution, a power of two from 1 (full step) to 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Microsteps(u16);

impl Microsteps {
    /// Full stepping.
    pub const FULL: Self = Self(1);
    /// Power-on resolution of the drivers.
    pub const SIXTEENTH: Self = Self(16);
    /// Finest resolution.
    pub const TWO_FIFTY_SIXTH: Self = Self(256);

    /// Check a microstep divisor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMicrosteps` unless `value` is a power of
    /// two no larger than 256.
    pub fn new(value: u16) -> Result<Self, ConfigError> {
        match value {
            1..=256 if value.is_power_of_two() => Ok(Self(value)),
            _ => Err(ConfigError::InvalidMicrosteps(value)),
        }
    }

    /// Divisor.
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// CHOPCONF `mres` field: `8 - log2(divisor)`.
    #[inline]
    pub const fn mres(self) -> u32 {
        8 - self.0.trailing_zeros()
    }
}

impl Default for Microsteps {
    fn default() -> Self {
        Self::SIXTEENTH
    }
}

impl<'de> Deserialize<'de> for Microsteps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let divisor = u16::deserialize(deserializer)?;
        Microsteps::new(divisor).map_err(|_| {
            serde::de::Error::invalid_value(
                serde::de::Unexpected::Unsigned(divisor.into()),
                &"a power of two from 1 to 256",
            )
        })
    }
}
