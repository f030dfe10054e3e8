//! Link to the MCU.
//!
//! The byte-level serial protocol, message dictionary and clock
//! synchronization live behind [`Transport`]; this crate deals in command
//! text and decoded response messages.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;

use super::oid::Oid;

/// A decoded message parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Integer field.
    Int(i64),
    /// Byte-string field.
    Bytes(Vec<u8>),
    /// Text field.
    Str(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bytes(v)
    }
}

impl From<&[u8]> for ParamValue {
    fn from(v: &[u8]) -> Self {
        ParamValue::Bytes(v.to_vec())
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_owned())
    }
}

/// Parameters of a response message.
pub type MessageParams = HashMap<String, ParamValue>;

/// A message received from the MCU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Message name, e.g. `stepper_position`.
    pub name: String,
    /// Decoded parameters.
    pub params: MessageParams,
}

impl Response {
    /// Create a response without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Integer parameter.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte-string parameter.
    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.params.get(key)? {
            ParamValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Object the message refers to, if it carries an `oid`.
    pub fn oid(&self) -> Option<Oid> {
        self.int("oid").and_then(|v| Oid::try_from(v).ok())
    }
}

/// Serial connection to a Klipper-protocol MCU.
///
/// Implementations own the wire encoding and the clock synchronization with
/// the MCU. All methods are called from the reactor thread.
pub trait Transport: Send {
    /// Open the port. Decoded messages are delivered on the returned channel
    /// in arrival order until the link is disconnected.
    fn connect(&mut self, port: &str, baud: u32) -> Result<UnboundedReceiver<Response>>;

    /// Close the port. Pending responses are discarded.
    fn disconnect(&mut self);

    /// Queue one command, in its `name key=value ...` text form.
    fn send(&mut self, command: &str) -> Result<()>;

    /// Host monotonic time in seconds.
    fn monotonic(&self) -> f64;

    /// Print time the MCU is estimated to be at for a host monotonic time.
    fn estimated_print_time(&self, monotonic: f64) -> f64;

    /// MCU clock value at a print time.
    fn print_time_to_clock(&self, print_time: f64) -> u64;

    /// MCU clock frequency in Hz.
    fn mcu_freq(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accessors() {
        let response = Response::new("tmcuart_response")
            .with("oid", 3)
            .with("read", vec![0x0au8, 0xfa]);

        assert_eq!(response.oid(), Some(3));
        assert_eq!(response.bytes("read"), Some(&[0x0a, 0xfa][..]));
        assert_eq!(response.int("read"), None);
        assert_eq!(response.int("missing"), None);
    }

    #[test]
    fn test_negative_oid_ignored() {
        let response = Response::new("trsync_state").with("oid", -1);
        assert_eq!(response.oid(), None);
    }
}
