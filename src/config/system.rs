//! MCU configuration - root configuration structure.

use core::time::Duration;

use heapless::{FnvIndexMap, String};
use serde::Deserialize;

use super::stepper::StepperConfig;
use super::tmc::TmcUartConfig;

/// Root configuration structure from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct McuConfig {
    /// Serial device the MCU is attached to.
    pub serial_port: String<64>,

    /// Serial baud rate.
    pub serial_baud: u32,

    /// Bound on every request/response exchange, in seconds.
    #[serde(default = "default_serial_timeout")]
    pub serial_timeout: f64,

    /// Pause between polls of MCU state, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    /// Optional bound on blocking home/move calls, in seconds.
    #[serde(default)]
    pub move_timeout: Option<f64>,

    /// Named TMC UART buses.
    #[serde(default)]
    pub tmc_uarts: FnvIndexMap<String<32>, TmcUartConfig, 4>,

    /// Named stepper axes.
    pub steppers: FnvIndexMap<String<32>, StepperConfig, 8>,
}

fn default_serial_timeout() -> f64 {
    5.0
}

fn default_poll_interval() -> f64 {
    0.1
}

impl McuConfig {
    /// Get a stepper configuration by name.
    pub fn stepper(&self, name: &str) -> Option<&StepperConfig> {
        self.steppers
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .map(|(_, v)| v)
    }

    /// Get a TMC UART bus configuration by name.
    pub fn tmc_uart(&self, name: &str) -> Option<&TmcUartConfig> {
        self.tmc_uarts
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .map(|(_, v)| v)
    }

    /// List all stepper names.
    pub fn stepper_names(&self) -> impl Iterator<Item = &str> {
        self.steppers.keys().map(|s| s.as_str())
    }

    /// List all TMC UART bus names.
    pub fn tmc_uart_names(&self) -> impl Iterator<Item = &str> {
        self.tmc_uarts.keys().map(|s| s.as_str())
    }

    /// Serial timeout as a duration.
    pub fn serial_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.serial_timeout).unwrap_or_default()
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval).unwrap_or_default()
    }

    /// Bound on blocking home/move calls, if configured.
    pub fn move_timeout(&self) -> Option<Duration> {
        self.move_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
