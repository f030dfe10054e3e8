//! Host side of the MCU link.
//!
//! [`Mcu`] is the blocking entry point. Everything else runs on its reactor
//! thread: [`Serial`] routes commands and responses over a [`Transport`],
//! and the configured buses and steppers talk to the firmware through it.

mod command;
mod oid;
mod reactor;
mod serial;
mod supervisor;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use command::{config_crc, Command};
pub use oid::{Oid, OidAllocator};
pub use reactor::Reactor;
pub use serial::Serial;
pub use supervisor::{Mcu, McuStatus, MAX_RESET_ATTEMPTS};
pub use transport::{MessageParams, ParamValue, Response, Transport};
