//! Error types for focuser-mcu.
//!
//! Provides unified error handling across configuration, the TMC codec,
//! register access, motion planning and the MCU supervisor.

use core::fmt;

use crate::tmc::Register;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all focuser-mcu operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
    /// UART-over-GPIO framing error
    Codec(CodecError),
    /// Driver register access error
    Register(RegisterError),
    /// Motion planning or sequencing error
    Motion(MotionError),
    /// MCU link, negotiation or blocking-call error
    Mcu(McuError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// Invalid microstep value (must be power of 2: 1, 2, 4, 8, 16, 32, 64, 128, 256)
    InvalidMicrosteps(u16),
    /// Pin specification could not be parsed
    InvalidPin(heapless::String<32>),
    /// Stepper references a TMC UART bus that is not configured
    UnknownTmcUart {
        /// Stepper name
        stepper: heapless::String<32>,
        /// Referenced bus name
        uart: heapless::String<32>,
    },
    /// Driver slave address outside 0-3
    InvalidDriverAddress(u8),
    /// Negative run current
    InvalidRunCurrent(f64),
    /// Rotation distance or microsteps per rotation not positive
    InvalidRotation {
        /// Microsteps per rotation
        microsteps: u32,
        /// Distance per rotation
        distance: f64,
    },
    /// Travel range invalid (min must be < max)
    InvalidTravel {
        /// Minimum position
        min: f64,
        /// Maximum position
        max: f64,
    },
    /// Speed must be > 0
    InvalidSpeed(f64),
    /// Acceleration must be > 0
    InvalidAcceleration(f64),
    /// Homing backoff must be >= 0
    InvalidHomingBackoff(f64),
    /// A timing parameter (baud, poll interval, timeout) must be > 0
    InvalidTiming(&'static str),
    /// File I/O error (std only)
    #[cfg(feature = "std")]
    IoError(heapless::String<128>),
}

/// UART-over-GPIO framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Message longer than a single frame can carry
    MessageTooLong(usize),
    /// Frame length does not match the expected message length
    FrameLength {
        /// Frame length in bytes
        actual: usize,
        /// Expected frame length in bytes
        expected: usize,
    },
    /// Start or stop bit missing at the given byte index
    Framing(usize),
}

/// Driver register access errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterError {
    /// Register is not part of the driver's register map
    Unsupported(Register),
    /// Reply frame failed the CRC or framing check
    DecodeFailed(Register),
    /// Interface counter did not advance after every write attempt
    WriteFailed {
        /// Register being written
        register: Register,
        /// Attempts made
        attempts: u8,
    },
    /// No reply from the bus within the serial timeout
    Timeout(Register),
}

/// Motion planning and sequencing errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionError {
    /// Distance is negative or not finite
    InvalidDistance(f64),
    /// Speed is not positive
    InvalidSpeed(f64),
    /// Acceleration is not positive
    InvalidAcceleration(f64),
    /// Step interval does not fit the MCU's 32-bit interval field
    Overflow,
    /// Homing requested on a stepper without an endstop
    NoEndstop(heapless::String<32>),
}

/// MCU link and supervisor errors.
#[derive(Debug, Clone, PartialEq)]
pub enum McuError {
    /// Transport reported a failure
    Transport(heapless::String<128>),
    /// Operation requires a configured MCU
    NotConnected,
    /// A reply message did not arrive in time
    ResponseTimeout(heapless::String<32>),
    /// A reply message lacked a required parameter
    MissingParameter(heapless::String<32>),
    /// MCU kept requesting a reset
    ResetLoop(usize),
    /// Blocking call did not complete in time
    CallTimeout,
    /// Scheduled job panicked on the reactor thread
    CallbackPanicked,
    /// Reactor thread is no longer running
    ReactorStopped,
    /// Named TMC UART bus does not exist
    UnknownUart(heapless::String<32>),
    /// Stepper has no UART-connected driver
    NoDriver(heapless::String<32>),
    /// Stepper is already homing or moving
    Busy(heapless::String<32>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::Register(e) => write!(f, "Register error: {}", e),
            Error::Motion(e) => write!(f, "Motion error: {}", e),
            Error::Mcu(e) => write!(f, "MCU error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::InvalidMicrosteps(v) => {
                write!(f, "Invalid microsteps: {}. Valid values: 1, 2, 4, 8, 16, 32, 64, 128, 256", v)
            }
            ConfigError::InvalidPin(pin) => write!(f, "Invalid pin '{}'", pin),
            ConfigError::UnknownTmcUart { stepper, uart } => {
                write!(f, "Stepper '{}' references unknown tmc uart '{}'", stepper, uart)
            }
            ConfigError::InvalidDriverAddress(a) => write!(f, "Invalid driver address: {}. Must be 0-3", a),
            ConfigError::InvalidRunCurrent(v) => write!(f, "Invalid run current: {}. Must be >= 0", v),
            ConfigError::InvalidRotation { microsteps, distance } => write!(
                f,
                "Invalid rotation: {} microsteps per {} distance. Both must be > 0",
                microsteps, distance
            ),
            ConfigError::InvalidTravel { min, max } => {
                write!(f, "Invalid travel: min ({}) must be < max ({})", min, max)
            }
            ConfigError::InvalidSpeed(v) => write!(f, "Invalid speed: {}. Must be > 0", v),
            ConfigError::InvalidAcceleration(v) => write!(f, "Invalid acceleration: {}. Must be > 0", v),
            ConfigError::InvalidHomingBackoff(v) => write!(f, "Invalid homing backoff: {}. Must be >= 0", v),
            ConfigError::InvalidTiming(field) => write!(f, "Invalid {}: must be > 0", field),
            #[cfg(feature = "std")]
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MessageTooLong(len) => write!(f, "Message of {} bytes exceeds one frame", len),
            CodecError::FrameLength { actual, expected } => {
                write!(f, "Frame is {} bytes, expected {}", actual, expected)
            }
            CodecError::Framing(index) => write!(f, "Bad start/stop bit at byte {}", index),
        }
    }
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::Unsupported(reg) => write!(f, "Register {} not supported by driver", reg.name()),
            RegisterError::DecodeFailed(reg) => write!(f, "Invalid reply reading register {}", reg.name()),
            RegisterError::WriteFailed { register, attempts } => write!(
                f,
                "Unable to write tmc uart register {} after {} attempts",
                register.name(),
                attempts
            ),
            RegisterError::Timeout(reg) => write!(f, "Timed out accessing register {}", reg.name()),
        }
    }
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::InvalidDistance(d) => write!(f, "Invalid move distance {}", d),
            MotionError::InvalidSpeed(v) => write!(f, "Invalid move speed {}", v),
            MotionError::InvalidAcceleration(a) => write!(f, "Invalid move acceleration {}", a),
            MotionError::Overflow => write!(f, "Step interval overflow"),
            MotionError::NoEndstop(name) => write!(f, "Stepper '{}' has no endstop to home against", name),
        }
    }
}

impl fmt::Display for McuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McuError::Transport(msg) => write!(f, "Transport failure: {}", msg),
            McuError::NotConnected => write!(f, "MCU is not connected"),
            McuError::ResponseTimeout(name) => write!(f, "Timed out waiting for '{}'", name),
            McuError::MissingParameter(name) => write!(f, "Response missing parameter '{}'", name),
            McuError::ResetLoop(attempts) => {
                write!(f, "MCU still requires a reset after {} attempts", attempts)
            }
            McuError::CallTimeout => write!(f, "Timed out waiting for reactor"),
            McuError::CallbackPanicked => write!(f, "Reactor callback panicked"),
            McuError::ReactorStopped => write!(f, "Reactor is not running"),
            McuError::UnknownUart(name) => write!(f, "Unknown tmc uart '{}'", name),
            McuError::NoDriver(name) => write!(f, "Stepper '{}' has no uart driver", name),
            McuError::Busy(name) => write!(f, "Stepper '{}' is busy", name),
        }
    }
}

/// Truncating conversion into a fixed-capacity error string.
pub(crate) fn short<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// Conversion impls
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<RegisterError> for Error {
    fn from(e: RegisterError) -> Self {
        Error::Register(e)
    }
}

impl From<MotionError> for Error {
    fn from(e: MotionError) -> Self {
        Error::Motion(e)
    }
}

impl From<McuError> for Error {
    fn from(e: McuError) -> Self {
        Error::Mcu(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

#[cfg(feature = "std")]
impl std::error::Error for RegisterError {}

#[cfg(feature = "std")]
impl std::error::Error for MotionError {}

#[cfg(feature = "std")]
impl std::error::Error for McuError {}
