//! Blocking facade over the reactor-owned MCU state.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::McuConfig;
use crate::error::{short, Error, McuError, Result};
use crate::stepper::{StepperController, StepperSnapshot};
use crate::tmc::{Register, TmcUart};

use super::command::{config_crc, Command};
use super::oid::OidAllocator;
use super::reactor::Reactor;
use super::serial::Serial;
use super::transport::Transport;

/// Times the MCU may ask for a reset before `initialize` gives up.
pub const MAX_RESET_ATTEMPTS: usize = 5;

/// Connection state of the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum McuStatus {
    /// Not configured; only `initialize` is accepted.
    #[default]
    Disconnected,
    /// Configured and ready for commands.
    Connected,
}

/// Everything that lives on the reactor thread.
struct McuCore {
    config: McuConfig,
    serial: Rc<Serial>,
    uarts: Vec<Rc<TmcUart>>,
    steppers: Vec<Rc<StepperController>>,
    oid_count: u32,
    status: Arc<Mutex<McuStatus>>,
}

impl McuCore {
    fn build(config: McuConfig, transport: Box<dyn Transport>, status: Arc<Mutex<McuStatus>>) -> Result<Self> {
        let serial = Serial::new(transport, config.poll_interval(), config.serial_timeout());
        let mut oids = OidAllocator::new();

        let mut uarts = Vec::new();
        for (name, bus) in config.tmc_uarts.iter() {
            uarts.push(TmcUart::new(name.as_str(), bus.clone(), oids.reserve(), &serial));
        }

        let mut steppers = Vec::new();
        for (name, stepper) in config.steppers.iter() {
            let uart = match &stepper.tmc_uart {
                Some(driver) => Some(
                    uarts
                        .iter()
                        .find(|u| u.name() == driver.uart.as_str())
                        .cloned()
                        .ok_or_else(|| Error::Mcu(McuError::UnknownUart(driver.uart.clone())))?,
                ),
                None => None,
            };
            steppers.push(StepperController::new(name.as_str(), stepper.clone(), &mut oids, &serial, uart));
        }

        debug!("{} buses and {} steppers use {} objects", uarts.len(), steppers.len(), oids.count());
        Ok(Self {
            config,
            serial,
            uarts,
            steppers,
            oid_count: oids.count(),
            status,
        })
    }

    fn set_status(&self, status: McuStatus) {
        *self.status.lock() = status;
    }

    fn require_connected(&self) -> Result<()> {
        match *self.status.lock() {
            McuStatus::Connected => Ok(()),
            McuStatus::Disconnected => Err(McuError::NotConnected.into()),
        }
    }

    /// Configured steppers among `names`, in request order.
    fn select(&self, names: &[String]) -> Vec<Rc<StepperController>> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.steppers.iter().find(|s| s.name() == name.as_str()).cloned();
                if found.is_none() {
                    debug!("ignoring unknown stepper '{}'", name);
                }
                found
            })
            .collect()
    }

    fn uart(&self, name: &str) -> Result<Rc<TmcUart>> {
        self.uarts
            .iter()
            .find(|u| u.name() == name)
            .cloned()
            .ok_or_else(|| McuError::UnknownUart(short(name)).into())
    }

    fn config_commands(&self) -> Vec<Command> {
        let freq = self.serial.mcu_freq();
        let mut commands = vec![Command::new("allocate_oids").arg("count", self.oid_count)];
        commands.extend(self.uarts.iter().flat_map(|u| u.config_commands()));
        commands.extend(self.steppers.iter().flat_map(|s| s.config_commands(freq)));
        commands
    }

    async fn initialize(&self) -> Result<()> {
        match self.negotiate().await {
            Ok(()) => {
                self.set_status(McuStatus::Connected);
                info!("MCU on {} configured", self.config.serial_port);
                Ok(())
            }
            Err(e) => {
                error!("MCU initialization failed: {}", e);
                self.serial.disconnect();
                self.set_status(McuStatus::Disconnected);
                Err(e)
            }
        }
    }

    async fn negotiate(&self) -> Result<()> {
        self.set_status(McuStatus::Disconnected);
        let mut resets = 0;
        loop {
            self.serial.connect(&self.config.serial_port, self.config.serial_baud)?;
            let reply = self
                .serial
                .send_with_response(&Command::new("get_config"), "config")
                .await?;

            let flag = |key: &str| {
                reply
                    .int(key)
                    .map(|v| v != 0)
                    .ok_or_else(|| Error::Mcu(McuError::MissingParameter(short(key))))
            };
            if !flag("is_shutdown")? && !flag("is_config")? {
                break;
            }

            if resets == MAX_RESET_ATTEMPTS {
                return Err(McuError::ResetLoop(resets).into());
            }
            resets += 1;
            info!("MCU requires a reset (attempt {})", resets);
            self.serial.send(&Command::new("reset"))?;
            self.serial.disconnect();
            self.serial.pause().await;
        }

        let commands = self.config_commands();
        let crc = config_crc(&commands);
        debug!("sending {} config commands, crc {}", commands.len(), crc);
        for command in &commands {
            self.serial.send(command)?;
        }
        self.serial.send(&Command::new("finalize_config").arg("crc", crc))?;

        for stepper in &self.steppers {
            stepper.configure().await?;
        }
        Ok(())
    }

    async fn home(&self, names: &[String]) -> Result<()> {
        self.require_connected()?;
        self.start_each(names, |s| s.home_async()).await
    }

    async fn move_by(&self, names: &[String], distance: f64) -> Result<()> {
        self.require_connected()?;
        self.start_each(names, |s| s.move_async(distance)).await
    }

    /// Start an operation on every named stepper and wait for the ones that
    /// started. A stepper refusing to start is reported after the others finish.
    async fn start_each<F>(&self, names: &[String], start: F) -> Result<()>
    where
        F: Fn(&Rc<StepperController>) -> Result<()>,
    {
        let mut first_error = None;
        let mut started = Vec::new();
        for stepper in self.select(names) {
            match start(&stepper) {
                Ok(()) => started.push(stepper),
                Err(e) => {
                    warn!("{}: {}", stepper.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        let result = self.wait_settled(&started).await;
        first_error.map_or(result, Err)
    }

    /// Wait until every stepper has finished, then surface the first failure.
    async fn wait_settled(&self, steppers: &[Rc<StepperController>]) -> Result<()> {
        loop {
            self.serial.pause().await;
            if steppers.iter().all(|s| s.status().is_settled()) {
                break;
            }
        }
        match steppers.iter().find_map(|s| s.take_error()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Blocking handle to a Klipper-protocol MCU driving focuser steppers.
///
/// All device state is owned by a reactor thread; each method submits a job
/// there and blocks the calling thread until it completes. Methods may be
/// called from several threads at once, which is how [`Mcu::stop`] interrupts
/// a blocked [`Mcu::home`] or [`Mcu::move_by`].
pub struct Mcu {
    reactor: Reactor<McuCore>,
    status: Arc<Mutex<McuStatus>>,
    serial_timeout: Duration,
    move_timeout: Option<Duration>,
}

impl Mcu {
    /// Start the reactor and build the MCU objects described by `config`.
    ///
    /// Nothing is sent until [`Mcu::initialize`].
    pub fn new(config: McuConfig, transport: impl Transport + 'static) -> Result<Self> {
        let status = Arc::new(Mutex::new(McuStatus::Disconnected));
        let serial_timeout = config.serial_timeout();
        let move_timeout = config.move_timeout();

        let shared = status.clone();
        let transport: Box<dyn Transport> = Box::new(transport);
        let reactor = Reactor::spawn("mcu-reactor", move || McuCore::build(config, transport, shared))?;

        Ok(Self {
            reactor,
            status,
            serial_timeout,
            move_timeout,
        })
    }

    /// Connect, reset the MCU if it is already configured or shut down, then
    /// send the configuration and program every driver.
    ///
    /// # Errors
    ///
    /// Returns the first transport, negotiation or driver error; the MCU is
    /// left disconnected.
    pub fn initialize(&self) -> Result<()> {
        self.reactor
            .call(None, |core| async move { core.initialize().await })
    }

    /// Current connection state.
    pub fn status(&self) -> McuStatus {
        *self.status.lock()
    }

    /// Home the named steppers and block until all have finished.
    ///
    /// Unknown names are ignored.
    pub fn home(&self, names: &[&str]) -> Result<()> {
        let names = owned(names);
        self.reactor
            .call(self.move_timeout, move |core| async move { core.home(&names).await })
    }

    /// Move the named steppers by `distance` and block until all have
    /// finished. Unknown names are ignored.
    pub fn move_by(&self, names: &[&str], distance: f64) -> Result<()> {
        let names = owned(names);
        self.reactor.call(self.move_timeout, move |core| async move {
            core.move_by(&names, distance).await
        })
    }

    /// Halt any move of the named steppers.
    pub fn stop(&self, names: &[&str]) -> Result<()> {
        let names = owned(names);
        self.reactor.call(Some(self.serial_timeout), move |core| async move {
            core.require_connected()?;
            for stepper in core.select(&names) {
                stepper.stop()?;
            }
            Ok(())
        })
    }

    /// Run the named steppers from their drivers' internal pulse generators.
    pub fn set_speed(&self, names: &[&str], speed: f64) -> Result<()> {
        let names = owned(names);
        self.reactor.call(None, move |core| async move {
            core.require_connected()?;
            for stepper in core.select(&names) {
                stepper.set_speed(speed).await?;
            }
            Ok(())
        })
    }

    /// Snapshots of every configured stepper, in configuration order.
    pub fn steppers(&self) -> Result<Vec<StepperSnapshot>> {
        self.reactor.call(Some(self.serial_timeout), |core| async move {
            Ok(core.steppers.iter().map(|s| s.snapshot()).collect())
        })
    }

    /// Read a register of the driver at `address` on bus `uart`.
    pub fn read_register(&self, uart: &str, address: u8, register: Register) -> Result<u32> {
        let uart = uart.to_owned();
        self.reactor.call(Some(2 * self.serial_timeout), move |core| async move {
            core.require_connected()?;
            core.uart(&uart)?.read_register(address, register).await
        })
    }

    /// Write a register of the driver at `address` on bus `uart`.
    pub fn write_register(&self, uart: &str, address: u8, register: Register, value: u32) -> Result<()> {
        let uart = uart.to_owned();
        self.reactor.call(None, move |core| async move {
            core.require_connected()?;
            core.uart(&uart)?.write_register(address, register, value).await
        })
    }

    /// Disconnect from the MCU.
    pub fn shutdown(&self) -> Result<()> {
        self.reactor.call(Some(self.serial_timeout), |core| async move {
            core.serial.disconnect();
            core.set_status(McuStatus::Disconnected);
            info!("MCU disconnected");
            Ok(())
        })
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}
