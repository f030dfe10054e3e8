//! Configuration loading from files (std only).

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{short, ConfigError, Error, Result};

use super::McuConfig;

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
///
/// ```rust,ignore
/// use focuser_mcu::load_config;
///
/// let config = load_config("focuser.toml")?;
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<McuConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(ConfigError::IoError(short(&e.to_string()))))?;

    debug!("loading focuser configuration from {}", path.display());
    parse_config(&content)
}

/// Parse configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid or fails validation.
pub fn parse_config(content: &str) -> Result<McuConfig> {
    let config: McuConfig = toml::from_str(content)
        .map_err(|e| Error::Config(ConfigError::ParseError(short(e.message()))))?;

    // Validate the configuration
    super::validation::validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
serial_port = "/dev/ttyACM0"
serial_baud = 250000

[steppers.focus]
step_pin = "PB13"
dir_pin = "!PB12"
enable_pin = "!PB14"
rotation_microsteps = 3200
rotation_distance = 8.0
position_min = 0.0
position_max = 50.0
speed = 10.0
acceleration = 100.0
homing_backoff = 2.0
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config(MINIMAL).unwrap();
        let focus = config.stepper("focus").unwrap();
        assert!(focus.endstop_pin.is_none());
        assert!(focus.dir_pin.invert);
        assert_eq!(config.serial_timeout, 5.0);
        assert_eq!(config.poll_interval, 0.1);
        assert!(config.move_timeout.is_none());
    }

    #[test]
    fn test_parse_with_tmc_uart() {
        let toml = r#"
serial_port = "/dev/ttyACM0"
serial_baud = 250000
move_timeout = 60.0

[tmc_uarts.bus0]
type = "tmc2209"
uart_pin = "^PC11"
tx_pin = "PC10"

[steppers.focus]
step_pin = "PB13"
dir_pin = "PB12"
enable_pin = "!PB14"
endstop_pin = "^PC0"
rotation_microsteps = 3200
rotation_distance = 8.0
position_min = 0.0
position_max = 50.0
speed = 10.0
acceleration = 100.0
homing_backoff = 2.0

[steppers.focus.tmc_uart]
uart = "bus0"
address = 1
run_current = 0.5
"#;

        let config = parse_config(toml).unwrap();
        let bus = config.tmc_uart("bus0").unwrap();
        assert_eq!(bus.bit_time, 300);
        assert_eq!(bus.uart_pin.pull.command_value(), 1);

        let driver = config.stepper("focus").unwrap().tmc_uart.as_ref().unwrap();
        assert_eq!(driver.address, 1);
        assert_eq!(driver.microsteps.value(), 16);
        assert_eq!(config.move_timeout, Some(60.0));
    }

    #[test]
    fn test_unknown_driver_kind_rejected() {
        let toml = r#"
serial_port = "/dev/ttyACM0"
serial_baud = 250000

[tmc_uarts.bus0]
type = "tmc5160"
uart_pin = "PC11"
tx_pin = "PC10"

[steppers]
"#;

        let result = parse_config(toml);
        assert!(matches!(result, Err(Error::Config(ConfigError::ParseError(_)))));
    }
}
