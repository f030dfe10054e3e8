//! Unit test harness for focuser-mcu.
//!
//! This module organizes tests of the public configuration API.

mod config_parsing;
mod config_validation;
