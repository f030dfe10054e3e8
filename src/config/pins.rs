//! MCU pin specifications.
//!
//! Pins are written as the MCU pin name with optional prefixes: `^` enables the
//! pull-up, `~` the pull-down, and `!` inverts the logic level. A pull modifier,
//! when present, comes before the inversion flag (`^!PA1`).

use core::fmt;
use core::str::FromStr;

use heapless::String;
use serde::Deserialize;

use crate::error::{short, ConfigError};

/// Internal resistor requested for an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// Floating input.
    #[default]
    None,
    /// Pull-up (`^`).
    Up,
    /// Pull-down (`~`).
    Down,
}

impl Pull {
    /// Value of the `pull_up` argument of MCU configuration commands.
    pub const fn command_value(self) -> i8 {
        match self {
            Pull::None => 0,
            Pull::Up => 1,
            Pull::Down => -1,
        }
    }
}

/// A parsed pin reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSpec {
    /// MCU pin name, without modifiers.
    pub pin: String<16>,
    /// Requested pull resistor.
    pub pull: Pull,
    /// Logic is active-low.
    pub invert: bool,
}

impl PinSpec {
    /// Parse a pin specification such as `^!PB3`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPin` if the pin name is empty or too long.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPin(short(value));

        let mut rest = value.trim();
        let pull = match rest.chars().next() {
            Some('^') => Pull::Up,
            Some('~') => Pull::Down,
            _ => Pull::None,
        };
        if pull != Pull::None {
            rest = &rest[1..];
        }

        let invert = rest.starts_with('!');
        if invert {
            rest = &rest[1..];
        }

        if rest.is_empty() || rest.contains(|c: char| c.is_whitespace() || "^~!".contains(c)) {
            return Err(invalid());
        }
        let pin = String::try_from(rest).map_err(|_| invalid())?;

        Ok(Self { pin, pull, invert })
    }

    /// Pin name as sent to the MCU.
    #[inline]
    pub fn name(&self) -> &str {
        self.pin.as_str()
    }
}

impl FromStr for PinSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pull {
            Pull::Up => f.write_str("^")?,
            Pull::Down => f.write_str("~")?,
            Pull::None => {}
        }
        if self.invert {
            f.write_str("!")?;
        }
        f.write_str(&self.pin)
    }
}

impl<'de> Deserialize<'de> for PinSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use core::fmt::Write;
        let value = String::<32>::deserialize(deserializer)?;
        PinSpec::parse(&value).map_err(|e| {
            let mut buf = String::<128>::new();
            let _ = write!(buf, "{}", e);
            serde::de::Error::custom(buf.as_str())
        })
    }
}
