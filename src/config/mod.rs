//! Configuration module for focuser-mcu.
//!
//! Provides types for loading and validating the MCU, TMC UART bus and stepper
//! configuration from TOML files (with `std` feature) or pre-parsed data.

mod pins;
mod stepper;
mod system;
mod tmc;
pub mod units;
#[cfg(feature = "std")]
mod loader;
mod validation;

pub use pins::{PinSpec, Pull};
pub use stepper::{StepperConfig, TmcDriverConfig};
pub use system::McuConfig;
pub use tmc::TmcUartConfig;
pub use validation::validate_config;

#[cfg(feature = "std")]
pub use loader::{load_config, parse_config};

// Re-export unit types at config level
pub use units::{Microsteps, Steps};
