//! Unit tests for TOML configuration parsing.

use std::io::Write;

use focuser_mcu::config::{load_config, parse_config, Microsteps, Pull};
use focuser_mcu::error::{ConfigError, Error};
use focuser_mcu::DriverKind;

const FOCUSER: &str = r#"
serial_port = "/dev/ttyACM0"
serial_baud = 250000

[tmc_uarts.uart0]
type = "tmc2209"
uart_pin = "^PA10"
tx_pin = "PA9"

[steppers.focus]
step_pin = "PB13"
dir_pin = "!PB12"
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
microsteps = 32
run_current = 0.5
"#;

/// Test parsing a complete focuser configuration.
#[test]
fn test_parse_focuser_config() {
    let config = parse_config(FOCUSER).expect("Failed to parse TOML");

    assert_eq!(config.serial_port.as_str(), "/dev/ttyACM0");
    assert_eq!(config.serial_baud, 250000);
    assert_eq!(config.serial_timeout, 5.0);
    assert_eq!(config.poll_interval, 0.1);
    assert_eq!(config.move_timeout, None);

    let bus = config.tmc_uart("uart0").expect("Bus not found");
    assert_eq!(bus.kind, DriverKind::Tmc2209);
    assert_eq!(bus.uart_pin.pull, Pull::Up);
    assert_eq!(bus.bit_time, 300);

    let focus = config.stepper("focus").expect("Stepper not found");
    assert!(focus.dir_pin.invert);
    assert!(!focus.step_pin.invert);
    assert_eq!(focus.steps_per_distance(), 400.0);
    assert_eq!(focus.travel(), 50.0);

    let driver = focus.tmc_uart.as_ref().expect("Driver binding missing");
    assert_eq!(driver.microsteps, Microsteps::new(32).unwrap());
    assert_eq!(driver.run_current, 0.5);
}

/// Test that driver microsteps default to 16.
#[test]
fn test_default_microsteps() {
    let config = parse_config(&FOCUSER.replace("microsteps = 32\n", "")).unwrap();
    let driver = config.stepper("focus").unwrap().tmc_uart.as_ref().unwrap();
    assert_eq!(driver.microsteps.value(), 16);
}

/// Test that stepper and bus names keep file order.
#[test]
fn test_names_in_file_order() {
    let aux = r#"
[steppers.aux]
step_pin = "PA0"
dir_pin = "PA1"
enable_pin = "PA2"
rotation_microsteps = 200
rotation_distance = 1.0
position_min = 0.0
position_max = 10.0
speed = 1.0
acceleration = 10.0
homing_backoff = 0.0
"#;
    let config = parse_config(&format!("{}{}", FOCUSER, aux)).unwrap();
    let names: Vec<_> = config.stepper_names().collect();
    assert_eq!(names, vec!["focus", "aux"]);
    assert!(config.stepper("aux").unwrap().endstop_pin.is_none());
}

/// Test that invalid microsteps are rejected while parsing.
#[test]
fn test_parse_invalid_microsteps() {
    let result = parse_config(&FOCUSER.replace("microsteps = 32", "microsteps = 12"));
    assert!(matches!(result, Err(Error::Config(ConfigError::ParseError(_)))));
}

/// Test that unknown driver types are rejected.
#[test]
fn test_parse_unknown_driver_type() {
    let result = parse_config(&FOCUSER.replace("tmc2209", "tmc5160"));
    assert!(matches!(result, Err(Error::Config(ConfigError::ParseError(_)))));
}

/// Test loading configuration from a file.
#[test]
fn test_load_config_file() {
    let path = std::env::temp_dir().join(format!("focuser-mcu-{}.toml", std::process::id()));
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(FOCUSER.as_bytes()))
        .unwrap();

    let config = load_config(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(config.unwrap().stepper("focus").is_some());
}

/// Test that a missing file is reported as an I/O error.
#[test]
fn test_load_missing_file() {
    let result = load_config("/nonexistent/focuser.toml");
    assert!(matches!(result, Err(Error::Config(ConfigError::IoError(_)))));
}
