//! Configuration validation.

use crate::error::{short, ConfigError, Error, Result};

use super::McuConfig;

/// Validate an MCU configuration.
///
/// Checks:
/// - Serial and polling timings are positive
/// - Stepper geometry, speed and acceleration are positive
/// - Travel range is non-empty (min < max)
/// - Driver bindings reference existing buses with a valid address
pub fn validate_config(config: &McuConfig) -> Result<()> {
    if config.serial_baud == 0 {
        return Err(Error::Config(ConfigError::InvalidTiming("serial_baud")));
    }
    if !(config.serial_timeout > 0.0) {
        return Err(Error::Config(ConfigError::InvalidTiming("serial_timeout")));
    }
    if !(config.poll_interval > 0.0) {
        return Err(Error::Config(ConfigError::InvalidTiming("poll_interval")));
    }
    if let Some(timeout) = config.move_timeout {
        if !(timeout > 0.0) {
            return Err(Error::Config(ConfigError::InvalidTiming("move_timeout")));
        }
    }

    for (name, stepper) in config.steppers.iter() {
        validate_stepper(name.as_str(), stepper, config)?;
    }

    Ok(())
}

fn validate_stepper(name: &str, stepper: &super::StepperConfig, config: &McuConfig) -> Result<()> {
    // Geometry must give a finite, positive steps-per-distance ratio
    if stepper.rotation_microsteps == 0 || !(stepper.rotation_distance > 0.0) {
        return Err(Error::Config(ConfigError::InvalidRotation {
            microsteps: stepper.rotation_microsteps,
            distance: stepper.rotation_distance,
        }));
    }

    if !(stepper.position_min < stepper.position_max) {
        return Err(Error::Config(ConfigError::InvalidTravel {
            min: stepper.position_min,
            max: stepper.position_max,
        }));
    }

    if !(stepper.speed > 0.0) {
        return Err(Error::Config(ConfigError::InvalidSpeed(stepper.speed)));
    }

    if !(stepper.acceleration > 0.0) {
        return Err(Error::Config(ConfigError::InvalidAcceleration(
            stepper.acceleration,
        )));
    }

    if !(stepper.homing_backoff >= 0.0) {
        return Err(Error::Config(ConfigError::InvalidHomingBackoff(
            stepper.homing_backoff,
        )));
    }

    if let Some(ref driver) = stepper.tmc_uart {
        // Bus must exist
        if config.tmc_uart(driver.uart.as_str()).is_none() {
            return Err(Error::Config(ConfigError::UnknownTmcUart {
                stepper: short(name),
                uart: driver.uart.clone(),
            }));
        }

        if driver.address > 3 {
            return Err(Error::Config(ConfigError::InvalidDriverAddress(driver.address)));
        }

        if !(driver.run_current >= 0.0) {
            return Err(Error::Config(ConfigError::InvalidRunCurrent(driver.run_current)));
        }
    }

    Ok(())
}
