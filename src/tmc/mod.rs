//! TMC stepper driver support.
//!
//! The codec and register maps are `no_std`; the bus client that talks to
//! drivers through the MCU needs `std`.

pub mod codec;
mod registers;
#[cfg(feature = "std")]
mod uart;

pub use registers::{
    irun, vactual, DriverBackend, DriverKind, InitSequence, Register, Tmc2209, TmcDriverSettings,
    UnknownRegister,
};

#[cfg(feature = "std")]
pub use uart::TmcUart;
