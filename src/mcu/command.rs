//! Command text builder.

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};

static CONFIG_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One MCU command in `name key=value ...` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Start a command with no arguments.
    pub fn new(name: &str) -> Self {
        Self {
            text: name.to_owned(),
        }
    }

    /// Append `key=value`.
    pub fn arg(mut self, key: &str, value: impl fmt::Display) -> Self {
        use fmt::Write;
        // Writing into a String cannot fail
        let _ = write!(self.text, " {}={}", key, value);
        self
    }

    /// Command name.
    pub fn name(&self) -> &str {
        self.text.split(' ').next().unwrap_or_default()
    }

    /// Full command text.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Checksum sent with `finalize_config`: CRC-32 of the newline-joined
/// configuration commands.
pub fn config_crc(commands: &[Command]) -> u32 {
    let mut digest = CONFIG_CRC.digest();
    for (i, command) in commands.iter().enumerate() {
        if i > 0 {
            digest.update(b"\n");
        }
        digest.update(command.as_str().as_bytes());
    }
    digest.finalize()
}
