//! # focuser-mcu
//!
//! Control core for a motorized focuser driven through a Klipper-style
//! microcontroller.
//!
//! ## Features
//!
//! - **OID configuration protocol**: checksummed configuration transaction with
//!   automatic reset when the MCU is out of sync
//! - **TMC UART codec**: CRC8, serial bit-stuffing and verified register writes
//!   for drivers wired over UART-over-GPIO
//! - **Trapezoidal step planning**: accelerate/cruise/decelerate profiles encoded
//!   as `queue_step` interval/add batches
//! - **Blocking API over a cooperative loop**: callers block while the device is
//!   driven from a single reactor thread
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use focuser_mcu::{load_config, Mcu};
//!
//! let config = load_config("focuser.toml")?;
//! let mcu = Mcu::new(config, serial_transport)?;
//!
//! mcu.initialize()?;
//! mcu.home(&["focus"])?;
//! mcu.move_by(&["focus"], 2.5)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): configuration loading, reactor, stepper control and the
//!   [`Mcu`] supervisor
//! - `mock`: exposes [`mcu::mock::MockMcu`], a scripted MCU transport for tests
//! - `defmt`: derives `defmt::Format` on codec and planner types

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]
// Allow large error types - necessary for no_std with heapless strings
#![allow(clippy::result_large_err)]

// Core modules
pub mod config;
pub mod error;
pub mod motion;
pub mod tmc;

#[cfg(feature = "std")]
pub mod mcu;
#[cfg(feature = "std")]
pub mod stepper;

// Re-exports for ergonomic API
pub use config::{validate_config, McuConfig, PinSpec, StepperConfig, TmcUartConfig};
pub use error::{Error, Result};
pub use motion::{MotionPlanner, MotionProfile, QueueStep, Segment};
pub use tmc::{DriverKind, Register};

// Configuration loading (std only)
#[cfg(feature = "std")]
pub use config::{load_config, parse_config};

#[cfg(feature = "std")]
pub use mcu::{Mcu, McuStatus, Transport};
#[cfg(feature = "std")]
pub use stepper::{StepperSnapshot, StepperStatus, TriggerReason};
