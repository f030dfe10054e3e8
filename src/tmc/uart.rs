//! Register access to drivers on a bit-banged TMC UART bus.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, warn};

use crate::config::TmcUartConfig;
use crate::error::{Error, RegisterError, Result};
use crate::mcu::{Command, Oid, Serial};

use super::codec::{self, HOST_SYNC};
use super::registers::{DriverBackend, DriverKind, Register};

/// Attempts made to land a register write before giving up.
pub const WRITE_ATTEMPTS: u8 = 5;

/// One `config_tmcuart` object on the MCU and the drivers behind it.
///
/// Transactions hold the bus lock from request to decoded reply, so
/// concurrent callers on the reactor never interleave datagrams.
pub struct TmcUart {
    name: String,
    oid: Oid,
    config: TmcUartConfig,
    backend: &'static dyn DriverBackend,
    serial: Rc<Serial>,
    lock: tokio::sync::Mutex<()>,
    last_response: RefCell<Vec<u8>>,
    responses: Cell<u64>,
}

impl TmcUart {
    /// Create the bus object and subscribe to its `tmcuart_response` messages.
    pub fn new(name: &str, config: TmcUartConfig, oid: Oid, serial: &Rc<Serial>) -> Rc<Self> {
        let bus = Rc::new(Self {
            name: name.to_owned(),
            oid,
            backend: config.kind.backend(),
            config,
            serial: serial.clone(),
            lock: tokio::sync::Mutex::new(()),
            last_response: RefCell::new(Vec::new()),
            responses: Cell::new(0),
        });

        let weak = Rc::downgrade(&bus);
        serial.register_response("tmcuart_response", Some(oid), move |params| {
            if let Some(bus) = weak.upgrade() {
                *bus.last_response.borrow_mut() = params.bytes("read").unwrap_or_default().to_vec();
                bus.responses.set(bus.responses.get() + 1);
            }
        });

        bus
    }

    /// Bus name from configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MCU object id of the bus.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Driver family on the bus.
    pub fn kind(&self) -> DriverKind {
        self.backend.kind()
    }

    /// Register map of the drivers on the bus.
    pub fn backend(&self) -> &'static dyn DriverBackend {
        self.backend
    }

    /// Configuration commands creating the bus on the MCU.
    pub fn config_commands(&self) -> Vec<Command> {
        vec![Command::new("config_tmcuart")
            .arg("oid", self.oid)
            .arg("rx_pin", self.config.uart_pin.name())
            .arg("pull_up", self.config.uart_pin.pull.command_value())
            .arg("tx_pin", self.config.tx_pin.name())
            .arg("bit_time", self.config.bit_time)]
    }

    /// Read a register of the driver at `address`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::Unsupported` for registers the chip lacks,
    /// `RegisterError::Timeout` if the bus does not answer, and
    /// `RegisterError::DecodeFailed` for a corrupt reply.
    pub async fn read_register(&self, address: u8, register: Register) -> Result<u32> {
        let _bus = self.lock.lock().await;
        self.read_locked(address, register).await
    }

    /// Write a register of the driver at `address`, verifying that the
    /// driver's interface counter advanced.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::WriteFailed` once every attempt has failed to
    /// advance `IFCNT`; bus timeouts are returned immediately.
    pub async fn write_register(&self, address: u8, register: Register, value: u32) -> Result<()> {
        let _bus = self.lock.lock().await;
        let reg = self.resolve(register)?;
        let frame = codec::encode_write_request(HOST_SYNC, address, reg, value);

        for attempt in 1..=WRITE_ATTEMPTS {
            let before = match self.read_locked(address, Register::Ifcnt).await {
                Ok(count) => count,
                Err(Error::Register(RegisterError::DecodeFailed(_))) => {
                    warn!("{}: unreadable IFCNT before writing {} (attempt {})", self.name, register, attempt);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.transact(register, &frame, 0).await?;

            match self.read_locked(address, Register::Ifcnt).await {
                Ok(after) if after == (before + 1) & 0xff => {
                    debug!("{}: {}[{}] = {:#010x}", self.name, register, address, value);
                    return Ok(());
                }
                Ok(after) => {
                    warn!(
                        "{}: write to {} not acknowledged (IFCNT {} -> {}, attempt {})",
                        self.name, register, before, after, attempt
                    );
                }
                Err(Error::Register(RegisterError::DecodeFailed(_))) => {
                    warn!("{}: unreadable IFCNT after writing {} (attempt {})", self.name, register, attempt);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RegisterError::WriteFailed {
            register,
            attempts: WRITE_ATTEMPTS,
        }
        .into())
    }

    fn resolve(&self, register: Register) -> Result<u8> {
        self.backend
            .address(register)
            .ok_or(Error::Register(RegisterError::Unsupported(register)))
    }

    async fn read_locked(&self, address: u8, register: Register) -> Result<u32> {
        let reg = self.resolve(register)?;
        let frame = codec::encode_read(HOST_SYNC, address, reg);
        self.transact(register, &frame, codec::FRAME_LEN as u8).await?;

        let reply = self.last_response.borrow();
        codec::decode_read(reg, &reply).ok_or(Error::Register(RegisterError::DecodeFailed(register)))
    }

    /// Send one datagram and wait for the bus to report back.
    async fn transact(&self, register: Register, frame: &[u8], read: u8) -> Result<()> {
        let seen = self.responses.get();
        self.serial.send(
            &Command::new("tmcuart_send")
                .arg("oid", self.oid)
                .arg("write", codec::hex(frame))
                .arg("read", read),
        )?;

        let answered = self
            .serial
            .poll_until(self.serial.timeout(), || self.responses.get() != seen)
            .await;
        if !answered {
            return Err(RegisterError::Timeout(register).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use crate::mcu::mock::MockMcu;

    fn run<F: Future>(f: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        tokio::task::LocalSet::new().block_on(&runtime, f)
    }

    fn bus(mock: &MockMcu) -> Rc<TmcUart> {
        let serial = Serial::new(Box::new(mock.clone()), Duration::from_millis(1), Duration::from_millis(50));
        serial.connect("mock", 250000).unwrap();
        let config = TmcUartConfig {
            kind: DriverKind::Tmc2209,
            uart_pin: "^PA10".parse().unwrap(),
            tx_pin: "PA9".parse().unwrap(),
            bit_time: 300,
        };
        TmcUart::new("uart0", config, 0, &serial)
    }

    fn writes(mock: &MockMcu) -> usize {
        mock.commands_named("tmcuart_send")
            .iter()
            .filter(|c| c.ends_with("read=0"))
            .count()
    }

    #[test]
    fn test_config_commands() {
        run(async {
            let uart = bus(&MockMcu::new());
            let commands: Vec<_> = uart.config_commands().iter().map(|c| c.to_string()).collect();
            assert_eq!(
                commands,
                vec!["config_tmcuart oid=0 rx_pin=PA10 pull_up=1 tx_pin=PA9 bit_time=300"]
            );
        });
    }

    #[test]
    fn test_write_then_read() {
        run(async {
            let mock = MockMcu::new();
            let uart = bus(&mock);

            uart.write_register(1, Register::IholdIrun, 0x8_1f00).await.unwrap();
            assert_eq!(mock.register(0, 1, 0x10), Some(0x8_1f00));
            assert_eq!(uart.read_register(1, Register::IholdIrun).await, Ok(0x8_1f00));
            assert_eq!(uart.read_register(1, Register::Ifcnt).await, Ok(1));
            assert_eq!(writes(&mock), 1);
        });
    }

    #[test]
    fn test_write_retried_until_acknowledged() {
        run(async {
            let mock = MockMcu::new();
            let uart = bus(&mock);

            mock.drop_writes(4);
            uart.write_register(0, Register::Gconf, 0xc0).await.unwrap();
            assert_eq!(writes(&mock), 5);
            assert_eq!(mock.register(0, 0, 0x00), Some(0xc0));
        });
    }

    #[test]
    fn test_write_gives_up() {
        run(async {
            let mock = MockMcu::new();
            let uart = bus(&mock);

            mock.drop_writes(WRITE_ATTEMPTS as usize);
            let result = uart.write_register(0, Register::Chopconf, 1).await;
            assert_eq!(
                result,
                Err(Error::Register(RegisterError::WriteFailed {
                    register: Register::Chopconf,
                    attempts: WRITE_ATTEMPTS,
                }))
            );
            assert_eq!(mock.register(0, 0, 0x6c), None);
        });
    }

    #[test]
    fn test_silent_bus_times_out() {
        run(async {
            let mock = MockMcu::new();
            let uart = bus(&mock);
            // Swallow the bus replies
            uart.serial.register_response("tmcuart_response", Some(0), |_| {});

            let result = uart.read_register(0, Register::Gconf).await;
            assert_eq!(result, Err(Error::Register(RegisterError::Timeout(Register::Gconf))));
        });
    }
}
