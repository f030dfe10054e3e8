//! TMC UART bus configuration from TOML.

use serde::Deserialize;

use super::pins::PinSpec;
use crate::tmc::DriverKind;

/// A bit-banged UART bus shared by one or more TMC drivers.
#[derive(Debug, Clone, Deserialize)]
pub struct TmcUartConfig {
    /// Driver family on the bus.
    #[serde(rename = "type")]
    pub kind: DriverKind,

    /// Receive pin (also the single-wire data pin when no separate transmit pin is wired).
    pub uart_pin: PinSpec,

    /// Transmit pin.
    pub tx_pin: PinSpec,

    /// Bit time in MCU clock ticks.
    #[serde(default = "default_bit_time")]
    pub bit_time: u32,
}

fn default_bit_time() -> u32 {
    300
}
