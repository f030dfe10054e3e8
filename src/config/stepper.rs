//! Stepper axis configuration from TOML.

use heapless::String;
use serde::Deserialize;

use super::pins::PinSpec;
use super::units::Microsteps;

/// Complete stepper axis configuration from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StepperConfig {
    /// Step pulse pin.
    pub step_pin: PinSpec,

    /// Direction pin.
    pub dir_pin: PinSpec,

    /// Driver enable pin.
    pub enable_pin: PinSpec,

    /// Optional homing endstop.
    #[serde(default)]
    pub endstop_pin: Option<PinSpec>,

    /// MCU steps per full rotation of the motor shaft.
    pub rotation_microsteps: u32,

    /// Distance travelled per rotation.
    pub rotation_distance: f64,

    /// Position reached at the endstop side of the travel.
    pub position_min: f64,

    /// Far end of the travel.
    pub position_max: f64,

    /// Cruise speed in distance units per second.
    pub speed: f64,

    /// Acceleration in distance units per second squared.
    pub acceleration: f64,

    /// Distance to back away from the endstop before the slow approach.
    pub homing_backoff: f64,

    /// Optional driver reachable over a TMC UART bus.
    #[serde(default)]
    pub tmc_uart: Option<TmcDriverConfig>,
}

impl StepperConfig {
    /// MCU steps per distance unit.
    #[inline]
    pub fn steps_per_distance(&self) -> f64 {
        self.rotation_microsteps as f64 / self.rotation_distance
    }

    /// Length of the travel range.
    #[inline]
    pub fn travel(&self) -> f64 {
        self.position_max - self.position_min
    }
}

/// Binding of a stepper to a driver on a TMC UART bus.
#[derive(Debug, Clone, Deserialize)]
pub struct TmcDriverConfig {
    /// Name of the bus in `tmc_uarts`.
    pub uart: String<32>,

    /// Driver slave address (0-3).
    pub address: u8,

    /// Driver microstep resolution.
    #[serde(default)]
    pub microsteps: Microsteps,

    /// RMS run current in amps.
    pub run_current: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_per_distance() {
        let config = StepperConfig {
            step_pin: PinSpec::parse("PA0").unwrap(),
            dir_pin: PinSpec::parse("PA1").unwrap(),
            enable_pin: PinSpec::parse("!PA2").unwrap(),
            endstop_pin: None,
            rotation_microsteps: 3200,
            rotation_distance: 8.0,
            position_min: 0.0,
            position_max: 50.0,
            speed: 10.0,
            acceleration: 100.0,
            homing_backoff: 2.0,
            tmc_uart: None,
        };

        // 3200 / 8 = 400
        assert_eq!(config.steps_per_distance(), 400.0);
        assert_eq!(config.travel(), 50.0);
    }
}
