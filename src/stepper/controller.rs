//! Per-axis MCU objects and the homing/move state machine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use libm::floor;
use log::{debug, error, info, warn};

use crate::config::{StepperConfig, Steps};
use crate::error::{short, Error, McuError, MotionError, Result};
use crate::mcu::{Command, Oid, OidAllocator, Serial};
use crate::motion::{Direction, MotionPlanner};
use crate::tmc::{vactual, Register, TmcDriverSettings, TmcUart};

use super::position::Position;
use super::status::{StepperSnapshot, StepperStatus, TriggerReason};

/// Delay between issuing a move and its first step, in seconds.
pub const MOVE_START_DELAY: f64 = 0.1;

/// Time between endstop samples, in seconds.
pub const ENDSTOP_SAMPLE_TIME: f64 = 0.000015;

/// Consecutive endstop samples required to trigger.
pub const ENDSTOP_SAMPLE_COUNT: u32 = 4;

/// Step pulse width for drivers stepping on one edge, in seconds.
pub const STEP_PULSE_DURATION: f64 = 0.000002;

/// MCU objects of one configured stepper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepperOids {
    /// `config_stepper` object.
    pub stepper: Oid,
    /// `config_digital_out` object driving the enable pin.
    pub enable: Oid,
    /// `config_trsync` trigger group stopping the stepper.
    pub trigger: Oid,
    /// `config_endstop` object, when an endstop is wired.
    pub endstop: Option<Oid>,
}

/// One stepper axis on the MCU.
///
/// Lives on the reactor thread. Operations started with
/// [`home_async`](Self::home_async) and [`move_async`](Self::move_async) run
/// as local tasks; their progress is visible through [`status`](Self::status).
pub struct StepperController {
    name: String,
    config: StepperConfig,
    oids: StepperOids,
    serial: Rc<Serial>,
    uart: Option<Rc<TmcUart>>,
    status: Cell<StepperStatus>,
    position: Cell<Position>,
    trigger: Cell<TriggerReason>,
    last_error: RefCell<Option<Error>>,
}

impl StepperController {
    /// Reserve the stepper's MCU objects and subscribe to their reports.
    pub fn new(
        name: &str,
        config: StepperConfig,
        allocator: &mut OidAllocator,
        serial: &Rc<Serial>,
        uart: Option<Rc<TmcUart>>,
    ) -> Rc<Self> {
        let oids = StepperOids {
            stepper: allocator.reserve(),
            enable: allocator.reserve(),
            trigger: allocator.reserve(),
            endstop: config.endstop_pin.as_ref().map(|_| allocator.reserve()),
        };

        let stepper = Rc::new(Self {
            name: name.to_owned(),
            position: Cell::new(Position::new(config.steps_per_distance())),
            config,
            oids,
            serial: serial.clone(),
            uart,
            status: Cell::new(StepperStatus::NotHomed),
            trigger: Cell::new(TriggerReason::Active),
            last_error: RefCell::new(None),
        });

        let weak = Rc::downgrade(&stepper);
        serial.register_response("trsync_state", Some(oids.trigger), move |params| {
            if let (Some(s), Some(reason)) = (weak.upgrade(), params.int("trigger_reason")) {
                s.trigger.set(TriggerReason::from_code(reason as u8));
            }
        });

        let weak = Rc::downgrade(&stepper);
        serial.register_response("stepper_position", Some(oids.stepper), move |params| {
            if let (Some(s), Some(pos)) = (weak.upgrade(), params.int("pos")) {
                let mut position = s.position.get();
                position.record(Steps(pos));
                s.position.set(position);
            }
        });

        stepper
    }

    /// Stepper name from configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stepper configuration.
    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    /// MCU objects owned by the stepper.
    pub fn oids(&self) -> StepperOids {
        self.oids
    }

    /// Current status.
    pub fn status(&self) -> StepperStatus {
        self.status.get()
    }

    /// Position relative to the homed origin, in distance units.
    pub fn position(&self) -> f64 {
        self.position.get().distance()
    }

    /// Last MCU step counter report.
    pub fn raw_position(&self) -> Steps {
        self.position.get().raw()
    }

    /// Check whether an origin was established since configuration.
    pub fn is_homed(&self) -> bool {
        self.position.get().is_homed()
    }

    /// Most recent trigger reason.
    pub fn trigger(&self) -> TriggerReason {
        self.trigger.get()
    }

    /// Take the error that put the stepper into `Fault`, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.last_error.borrow_mut().take()
    }

    /// Point-in-time view for status reporting.
    pub fn snapshot(&self) -> StepperSnapshot {
        StepperSnapshot {
            name: self.name.clone(),
            status: self.status(),
            position: self.position(),
            homed: self.is_homed(),
        }
    }

    /// Configuration commands creating the stepper's MCU objects.
    pub fn config_commands(&self, clock_freq: f64) -> Vec<Command> {
        let c = &self.config;
        // Drivers on a TMC bus run with dual-edge stepping
        let (invert_step, pulse_ticks) = if c.tmc_uart.is_some() {
            (-1, 0)
        } else {
            (
                i8::from(c.step_pin.invert),
                floor(STEP_PULSE_DURATION * clock_freq + 0.5) as u32,
            )
        };

        let mut commands = vec![
            Command::new("config_stepper")
                .arg("oid", self.oids.stepper)
                .arg("step_pin", c.step_pin.name())
                .arg("dir_pin", c.dir_pin.name())
                .arg("invert_step", invert_step)
                .arg("step_pulse_ticks", pulse_ticks),
            Command::new("config_digital_out")
                .arg("oid", self.oids.enable)
                .arg("pin", c.enable_pin.name())
                .arg("value", u8::from(!c.enable_pin.invert))
                .arg("default_value", u8::from(c.enable_pin.invert))
                .arg("max_duration", 0),
            Command::new("config_trsync").arg("oid", self.oids.trigger),
        ];

        if let (Some(oid), Some(pin)) = (self.oids.endstop, &c.endstop_pin) {
            commands.push(
                Command::new("config_endstop")
                    .arg("oid", oid)
                    .arg("pin", pin.name())
                    .arg("pull_up", pin.pull.command_value()),
            );
        }
        commands
    }

    /// Reset connection-scoped state and program the driver.
    ///
    /// Called after every successful `finalize_config`.
    pub async fn configure(&self) -> Result<()> {
        self.status.set(StepperStatus::NotHomed);
        self.trigger.set(TriggerReason::Active);
        self.last_error.borrow_mut().take();
        let mut position = self.position.get();
        position.reset();
        self.position.set(position);

        if let (Some(uart), Some(driver)) = (&self.uart, &self.config.tmc_uart) {
            let settings = TmcDriverSettings {
                microsteps: driver.microsteps,
                run_current: driver.run_current,
            };
            for (register, value) in uart.backend().init_sequence(&settings) {
                uart.write_register(driver.address, register, value).await?;
            }
            debug!("{}: driver {} configured on {}", self.name, driver.address, uart.name());
        }
        Ok(())
    }

    /// Start homing against the endstop.
    ///
    /// The status is `Homing` when this returns; it becomes `Idle` (or
    /// `Fault`) once the sequence finishes.
    ///
    /// # Errors
    ///
    /// Returns `MotionError::NoEndstop` when no endstop is configured and
    /// `McuError::Busy` while another home or move is in progress.
    pub fn home_async(self: &Rc<Self>) -> Result<()> {
        if self.oids.endstop.is_none() {
            return Err(MotionError::NoEndstop(short(&self.name)).into());
        }
        self.claim(StepperStatus::Homing)?;

        let this = self.clone();
        tokio::task::spawn_local(async move {
            let result = this.home().await;
            this.finish(result);
        });
        Ok(())
    }

    /// Start a relative move of `distance` at the configured speed.
    ///
    /// # Errors
    ///
    /// Returns `McuError::Busy` while another home or move is in progress.
    pub fn move_async(self: &Rc<Self>, distance: f64) -> Result<()> {
        self.claim(StepperStatus::Moving)?;

        let this = self.clone();
        tokio::task::spawn_local(async move {
            let result = this
                .run_move(distance, this.config.speed, false)
                .await
                .map(|_| ());
            this.finish(result);
        });
        Ok(())
    }

    /// Fire the stepper's trigger group, halting any move in progress.
    pub fn stop(&self) -> Result<()> {
        info!("{}: stop requested", self.name);
        self.serial.send(
            &Command::new("trsync_trigger")
                .arg("oid", self.oids.trigger)
                .arg("reason", TriggerReason::Manual.code()),
        )
    }

    /// Run the motor from the driver's internal pulse generator at `speed`
    /// (distance units per second, signed). Zero hands control back to the
    /// step input.
    ///
    /// # Errors
    ///
    /// Returns `McuError::NoDriver` when the stepper has no UART driver.
    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        let (Some(uart), Some(driver)) = (&self.uart, &self.config.tmc_uart) else {
            return Err(McuError::NoDriver(short(&self.name)).into());
        };
        let value = vactual(speed, self.config.steps_per_distance());
        uart.write_register(driver.address, Register::Vactual, value).await
    }

    fn claim(&self, status: StepperStatus) -> Result<()> {
        if self.status.get().is_busy() {
            return Err(McuError::Busy(short(&self.name)).into());
        }
        self.status.set(status);
        Ok(())
    }

    fn finish(&self, result: Result<()>) {
        match result {
            Ok(()) => self.status.set(StepperStatus::Idle),
            Err(e) => {
                error!("{}: {}", self.name, e);
                *self.last_error.borrow_mut() = Some(e);
                self.status.set(StepperStatus::Fault);
            }
        }
    }

    async fn home(&self) -> Result<()> {
        let c = &self.config;

        // Fast approach across the whole travel
        let reason = self.run_move(c.position_min - c.position_max, c.speed, true).await?;
        if reason != TriggerReason::EndstopHit {
            warn!("{}: homing aborted, endstop not reached ({:?})", self.name, reason);
            return Ok(());
        }

        if c.homing_backoff > 0.0 {
            let reason = self.run_move(c.homing_backoff, c.speed / 2.0, false).await?;
            if reason == TriggerReason::Manual {
                warn!("{}: homing aborted during backoff", self.name);
                return Ok(());
            }

            // Slow approach
            let reason = self
                .run_move(-2.0 * c.homing_backoff, c.speed / 10.0, true)
                .await?;
            if reason != TriggerReason::EndstopHit {
                warn!("{}: homing aborted, endstop not reached on slow approach ({:?})", self.name, reason);
                return Ok(());
            }
        }

        let mut position = self.position.get();
        position.set_origin();
        self.position.set(position);
        info!("{}: homed, origin at step {}", self.name, position.origin().value());
        Ok(())
    }

    /// Execute one move and wait for its trigger group to fire.
    async fn run_move(&self, distance: f64, speed: f64, check_endstop: bool) -> Result<TriggerReason> {
        let spd = self.config.steps_per_distance();
        let freq = self.serial.mcu_freq();
        let profile = MotionPlanner::new(spd, freq).plan(distance.abs(), speed, self.config.acceleration)?;
        if profile.is_zero() {
            debug!("{}: move of {} is below one step", self.name, distance);
            return Ok(TriggerReason::Timeout);
        }

        let direction = Direction::of(distance, speed);
        let dir = direction.bit() ^ u8::from(self.config.dir_pin.invert);
        let start_time = self.serial.estimated_print_time(self.serial.monotonic()) + MOVE_START_DELAY;
        let start_clock = self.serial.print_time_to_clock(start_time);
        let end_clock = start_clock + profile.total_ticks();
        let (stepper, trigger) = (self.oids.stepper, self.oids.trigger);

        debug!(
            "{}: move {} ({} steps, cruise {:.3}/s, {:.3}s)",
            self.name,
            distance,
            profile.total_steps as i64 * direction.sign(),
            profile.cruise_speed,
            profile.duration_secs(freq)
        );

        self.trigger.set(TriggerReason::Active);
        self.serial
            .send(&Command::new("set_next_step_dir").arg("oid", stepper).arg("dir", dir))?;
        self.serial
            .send(&Command::new("reset_step_clock").arg("oid", stepper).arg("clock", start_clock))?;
        for step in profile.queue_steps() {
            self.serial.send(
                &Command::new("queue_step")
                    .arg("oid", stepper)
                    .arg("interval", step.interval)
                    .arg("count", step.count)
                    .arg("add", step.add),
            )?;
        }

        self.serial.send(
            &Command::new("trsync_start")
                .arg("oid", trigger)
                .arg("report_clock", 0)
                .arg("report_ticks", 0)
                .arg("expire_reason", TriggerReason::Timeout.code()),
        )?;
        self.serial
            .send(&Command::new("trsync_set_timeout").arg("oid", trigger).arg("clock", end_clock))?;
        self.serial.send(
            &Command::new("stepper_stop_on_trigger")
                .arg("oid", stepper)
                .arg("trsync_oid", trigger),
        )?;

        if let (true, Some(endstop), Some(pin)) = (check_endstop, self.oids.endstop, &self.config.endstop_pin) {
            let sample_ticks = floor(ENDSTOP_SAMPLE_TIME * freq + 0.5) as u64;
            let rest_ticks = floor(freq / (5.0 * speed.abs() * spd) + 0.5) as u64;
            self.serial.send(
                &Command::new("endstop_home")
                    .arg("oid", endstop)
                    .arg("clock", start_clock)
                    .arg("sample_ticks", sample_ticks)
                    .arg("sample_count", ENDSTOP_SAMPLE_COUNT)
                    .arg("rest_ticks", rest_ticks)
                    .arg("pin_value", u8::from(!pin.invert))
                    .arg("trsync_oid", trigger)
                    .arg("trigger_reason", TriggerReason::EndstopHit.code()),
            )?;
        }

        // The trigger group expires at end_clock, so a reply is due by then
        let query = Command::new("stepper_get_position").arg("oid", stepper);
        let limit = Duration::try_from_secs_f64(profile.duration_secs(freq) + MOVE_START_DELAY)
            .unwrap_or_default()
            + self.serial.timeout();
        let deadline = tokio::time::Instant::now() + limit;
        while self.trigger.get() == TriggerReason::Active {
            if tokio::time::Instant::now() >= deadline {
                return Err(McuError::ResponseTimeout(short("trsync_state")).into());
            }
            self.serial.send(&query)?;
            self.serial.pause().await;
        }

        let reason = self.trigger.get();
        match reason {
            TriggerReason::EndstopHit => debug!("{}: endstop hit", self.name),
            TriggerReason::Timeout if check_endstop => {
                warn!("{}: move finished without reaching the endstop", self.name)
            }
            TriggerReason::Timeout => debug!("{}: move complete", self.name),
            TriggerReason::Manual => info!("{}: move stopped", self.name),
            other => warn!("{}: move ended with trigger {:?}", self.name, other),
        }

        // Resynchronize with where the MCU actually stopped
        let seen = self.position.get().reports();
        self.serial.send(&query)?;
        let synced = self
            .serial
            .poll_until(self.serial.timeout(), || self.position.get().reports() != seen)
            .await;
        if !synced {
            return Err(McuError::ResponseTimeout(short("stepper_position")).into());
        }

        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;

    use crate::mcu::mock::{MockMcu, MOCK_FREQ};

    fn run<F: Future>(f: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        tokio::task::LocalSet::new().block_on(&runtime, f)
    }

    fn config(dir_pin: &str) -> StepperConfig {
        StepperConfig {
            step_pin: "!PA0".parse().unwrap(),
            dir_pin: dir_pin.parse().unwrap(),
            enable_pin: "PA2".parse().unwrap(),
            endstop_pin: None,
            rotation_microsteps: 200,
            rotation_distance: 1.0,
            position_min: 0.0,
            position_max: 10.0,
            speed: 5.0,
            acceleration: 50.0,
            homing_backoff: 0.0,
            tmc_uart: None,
        }
    }

    fn stepper(mock: &MockMcu, config: StepperConfig) -> Rc<StepperController> {
        let serial = Serial::new(Box::new(mock.clone()), Duration::from_millis(1), Duration::from_millis(200));
        serial.connect("mock", 250000).unwrap();
        StepperController::new("focus", config, &mut OidAllocator::new(), &serial, None)
    }

    async fn settle(stepper: &StepperController) {
        assert!(
            stepper
                .serial
                .poll_until(Duration::from_secs(5), || stepper.status().is_settled())
                .await
        );
    }

    #[test]
    fn test_config_commands_without_driver() {
        let mock = MockMcu::new();
        run(async {
            let stepper = stepper(&mock, config("PA1"));
            let commands: Vec<_> = stepper
                .config_commands(MOCK_FREQ)
                .iter()
                .map(|c| c.to_string())
                .collect();
            assert_eq!(
                commands,
                vec![
                    "config_stepper oid=0 step_pin=PA0 dir_pin=PA1 invert_step=1 step_pulse_ticks=32",
                    "config_digital_out oid=1 pin=PA2 value=1 default_value=0 max_duration=0",
                    "config_trsync oid=2",
                ]
            );
            assert_eq!(stepper.oids().endstop, None);
        });
    }

    #[test]
    fn test_move_honors_dir_invert() {
        let mock = MockMcu::new();
        run(async {
            let stepper = stepper(&mock, config("!PA1"));
            stepper.move_async(-1.0).unwrap();
            assert_eq!(stepper.status(), StepperStatus::Moving);
            settle(&stepper).await;

            assert_eq!(stepper.status(), StepperStatus::Idle);
            assert_eq!(stepper.trigger(), TriggerReason::Timeout);
            // The motor turns the other way, so the MCU counts up
            assert_eq!(mock.position(0), 200);
            assert_eq!(stepper.raw_position(), Steps(200));
        });
        assert_eq!(mock.commands_named("set_next_step_dir"), vec!["set_next_step_dir oid=0 dir=1"]);
        assert!(mock.commands_named("endstop_home").is_empty());
    }

    #[test]
    fn test_sub_step_move_sends_nothing() {
        let mock = MockMcu::new();
        run(async {
            let stepper = stepper(&mock, config("PA1"));
            stepper.move_async(0.001).unwrap();
            settle(&stepper).await;
            assert_eq!(stepper.status(), StepperStatus::Idle);
        });
        assert!(mock.commands_named("queue_step").is_empty());
    }

    #[test]
    fn test_move_rejected_while_moving() {
        let mock = MockMcu::new();
        mock.hold_moves(true);
        run(async {
            let stepper = stepper(&mock, config("PA1"));
            stepper.move_async(1.0).unwrap();
            assert_eq!(
                stepper.move_async(2.0),
                Err(Error::Mcu(McuError::Busy(short("focus"))))
            );
            assert_eq!(stepper.status(), StepperStatus::Moving);

            assert!(
                stepper
                    .serial
                    .poll_until(Duration::from_secs(1), || mock.is_moving(0))
                    .await
            );
            stepper.stop().unwrap();
            settle(&stepper).await;
            assert_eq!(stepper.status(), StepperStatus::Idle);
            assert_eq!(stepper.trigger(), TriggerReason::Manual);
        });
        assert_eq!(mock.commands_named("reset_step_clock").len(), 1);
    }

    #[test]
    fn test_failed_move_faults() {
        let mock = MockMcu::new();
        run(async {
            let stepper = stepper(&mock, config("PA1"));
            stepper.move_async(f64::NAN).unwrap();
            settle(&stepper).await;

            assert_eq!(stepper.status(), StepperStatus::Fault);
            assert!(matches!(
                stepper.take_error(),
                Some(Error::Motion(MotionError::InvalidDistance(_)))
            ));
            assert_eq!(stepper.take_error(), None);
        });
    }

    #[test]
    fn test_home_requires_endstop() {
        let mock = MockMcu::new();
        run(async {
            let stepper = stepper(&mock, config("PA1"));
            assert!(matches!(
                stepper.home_async(),
                Err(Error::Motion(MotionError::NoEndstop(_)))
            ));
            assert_eq!(stepper.status(), StepperStatus::NotHomed);
        });
    }
}
