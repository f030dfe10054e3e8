//! Unit tests for configuration validation.

use focuser_mcu::config::{validate_config, McuConfig};
use focuser_mcu::error::{ConfigError, Error};

const VALID: &str = r#"
serial_port = "/dev/ttyACM0"
serial_baud = 250000

[tmc_uarts.uart0]
type = "tmc2209"
uart_pin = "PA10"
tx_pin = "PA9"

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
uart = "uart0"
address = 0
run_current = 0.5
"#;

fn config(toml_str: &str) -> McuConfig {
    toml::from_str(toml_str).expect("Failed to parse TOML")
}

fn validate_with(from: &str, to: &str) -> Result<(), Error> {
    validate_config(&config(&VALID.replace(from, to)))
}

/// Test validation of a valid configuration.
#[test]
fn test_valid_config_passes_validation() {
    assert!(validate_config(&config(VALID)).is_ok());
}

/// Test validation fails for a driver on an unknown bus.
#[test]
fn test_unknown_bus_reference() {
    let result = validate_with("uart = \"uart0\"", "uart = \"uart1\"");
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::UnknownTmcUart { ref uart, .. })) if uart.as_str() == "uart1"
    ));
}

/// Test validation fails for a driver address above 3.
#[test]
fn test_invalid_driver_address() {
    let result = validate_with("address = 0", "address = 4");
    assert_eq!(result, Err(Error::Config(ConfigError::InvalidDriverAddress(4))));
}

/// Test validation fails for an empty travel range.
#[test]
fn test_invalid_travel() {
    let result = validate_with("position_max = 50.0", "position_max = 0.0");
    assert_eq!(
        result,
        Err(Error::Config(ConfigError::InvalidTravel { min: 0.0, max: 0.0 }))
    );
}

/// Test validation fails for zero rotation distance.
#[test]
fn test_invalid_rotation() {
    let result = validate_with("rotation_distance = 8.0", "rotation_distance = 0.0");
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::InvalidRotation { microsteps: 3200, .. }))
    ));
}

/// Test validation fails for non-positive speed and acceleration.
#[test]
fn test_invalid_speed_and_acceleration() {
    assert_eq!(
        validate_with("speed = 10.0", "speed = 0.0"),
        Err(Error::Config(ConfigError::InvalidSpeed(0.0)))
    );
    assert_eq!(
        validate_with("acceleration = 100.0", "acceleration = -1.0"),
        Err(Error::Config(ConfigError::InvalidAcceleration(-1.0)))
    );
}

/// Test validation fails for a negative homing backoff.
#[test]
fn test_invalid_homing_backoff() {
    assert_eq!(
        validate_with("homing_backoff = 2.0", "homing_backoff = -2.0"),
        Err(Error::Config(ConfigError::InvalidHomingBackoff(-2.0)))
    );
}

/// Test validation fails for a zero poll interval.
#[test]
fn test_invalid_poll_interval() {
    let result = validate_with("serial_baud = 250000", "serial_baud = 250000\npoll_interval = 0.0");
    assert_eq!(result, Err(Error::Config(ConfigError::InvalidTiming("poll_interval"))));
}
