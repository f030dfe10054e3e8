//! Simulated MCU for tests.
//!
//! [`MockMcu`] answers the command surface the crate uses the way the
//! firmware would, without timing: a move resolves as soon as its position is
//! queried. It keeps a register file for every driver on every bus, step
//! counters for every stepper, and a single simulated endstop position.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{short, McuError, Result};
use crate::tmc::codec::{self, REPLY_ADDRESS, REPLY_SYNC, WRITE_BIT};

use super::oid::Oid;
use super::transport::{Response, Transport};

/// Clock frequency of the simulated MCU.
pub const MOCK_FREQ: f64 = 16_000_000.0;

const IFCNT: u8 = 0x02;
const REASON_ENDSTOP: i64 = 1;
const REASON_TIMEOUT: i64 = 4;

#[derive(Debug, Default)]
struct PendingMove {
    dir: i64,
    steps: i64,
    trsync: Option<Oid>,
    endstop: bool,
}

#[derive(Debug, Default)]
struct MockStepper {
    position: i64,
    dir: i64,
    pending: Option<PendingMove>,
}

#[derive(Debug)]
struct State {
    tx: Option<UnboundedSender<Response>>,
    commands: Vec<String>,
    connects: usize,
    configured: bool,
    shutdown: bool,
    finalize_crc: Option<u32>,
    registers: HashMap<(Oid, u8, u8), u32>,
    drop_writes: usize,
    steppers: HashMap<Oid, MockStepper>,
    endstop_position: Option<i64>,
    hold_moves: bool,
    fail_connect: bool,
}

/// In-memory [`Transport`] simulating the MCU firmware.
///
/// Cloning yields another handle on the same simulated device, so a test can
/// keep one handle for inspection after moving the other into an `Mcu`.
#[derive(Debug, Clone)]
pub struct MockMcu {
    state: Arc<Mutex<State>>,
    started: Instant,
}

impl Default for MockMcu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMcu {
    /// Create an unconfigured device with the endstop out of reach.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                tx: None,
                commands: Vec::new(),
                connects: 0,
                configured: false,
                shutdown: false,
                finalize_crc: None,
                registers: HashMap::new(),
                drop_writes: 0,
                steppers: HashMap::new(),
                endstop_position: None,
                hold_moves: false,
                fail_connect: false,
            })),
            started: Instant::now(),
        }
    }

    /// Report `is_config=1` on the first `get_config`, forcing a reset.
    pub fn already_configured(self) -> Self {
        self.state.lock().configured = true;
        self
    }

    /// Report `is_shutdown=1` until the next reset.
    pub fn shut_down(self) -> Self {
        self.state.lock().shutdown = true;
        self
    }

    /// Place the endstop at a raw step position.
    pub fn with_endstop_at(self, raw: i64) -> Self {
        self.state.lock().endstop_position = Some(raw);
        self
    }

    /// Make every `connect` fail.
    pub fn failing_connect(self) -> Self {
        self.state.lock().fail_connect = true;
        self
    }

    /// Ignore the next `count` register writes without advancing `IFCNT`.
    pub fn drop_writes(&self, count: usize) {
        self.state.lock().drop_writes = count;
    }

    /// Leave moves running until a `trsync_trigger` arrives.
    pub fn hold_moves(&self, hold: bool) {
        self.state.lock().hold_moves = hold;
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Commands received with the given name.
    pub fn commands_named(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.split(' ').next() == Some(name))
            .cloned()
            .collect()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Checksum of the last `finalize_config`.
    pub fn finalize_crc(&self) -> Option<u32> {
        self.state.lock().finalize_crc
    }

    /// Register value of the driver at `address` on bus `bus`.
    pub fn register(&self, bus: Oid, address: u8, register: u8) -> Option<u32> {
        self.state.lock().registers.get(&(bus, address, register)).copied()
    }

    /// Step counter of a stepper object.
    pub fn position(&self, stepper: Oid) -> i64 {
        self.state.lock().steppers.get(&stepper).map_or(0, |s| s.position)
    }

    /// Check whether a stepper has a move waiting to resolve.
    pub fn is_moving(&self, stepper: Oid) -> bool {
        self.state
            .lock()
            .steppers
            .get(&stepper)
            .is_some_and(|s| s.pending.is_some())
    }
}

impl Transport for MockMcu {
    fn connect(&mut self, _port: &str, _baud: u32) -> Result<UnboundedReceiver<Response>> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(McuError::Transport(short("no such device")).into());
        }
        let (tx, rx) = unbounded_channel();
        state.tx = Some(tx);
        state.connects += 1;
        Ok(rx)
    }

    fn disconnect(&mut self) {
        self.state.lock().tx = None;
    }

    fn send(&mut self, command: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.tx.is_none() {
            return Err(McuError::NotConnected.into());
        }
        state.commands.push(command.to_owned());
        state.handle(command);
        Ok(())
    }

    fn monotonic(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn estimated_print_time(&self, monotonic: f64) -> f64 {
        monotonic
    }

    fn print_time_to_clock(&self, print_time: f64) -> u64 {
        (print_time * MOCK_FREQ) as u64
    }

    fn mcu_freq(&self) -> f64 {
        MOCK_FREQ
    }
}

/// Parsed `key=value` arguments of one command.
struct Args<'a>(HashMap<&'a str, &'a str>);

impl<'a> Args<'a> {
    fn parse(command: &'a str) -> (&'a str, Self) {
        let mut parts = command.split(' ');
        let name = parts.next().unwrap_or_default();
        let args = parts.filter_map(|p| p.split_once('=')).collect();
        (name, Self(args))
    }

    fn int(&self, key: &str) -> i64 {
        self.0.get(key).and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    fn oid(&self, key: &str) -> Oid {
        self.int(key) as Oid
    }

    fn bytes(&self, key: &str) -> Vec<u8> {
        let text = self.0.get(key).copied().unwrap_or_default();
        (0..text.len() / 2)
            .filter_map(|i| u8::from_str_radix(&text[2 * i..2 * i + 2], 16).ok())
            .collect()
    }
}

impl State {
    fn reply(&self, response: Response) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(response);
        }
    }

    fn handle(&mut self, command: &str) {
        let (name, args) = Args::parse(command);
        match name {
            "get_config" => self.reply(
                Response::new("config")
                    .with("is_config", i64::from(self.configured))
                    .with("is_shutdown", i64::from(self.shutdown))
                    .with("crc", self.finalize_crc.unwrap_or_default())
                    .with("move_count", 0),
            ),
            "reset" => {
                self.configured = false;
                self.shutdown = false;
                self.finalize_crc = None;
                self.steppers.clear();
            }
            "finalize_config" => {
                self.finalize_crc = Some(args.int("crc") as u32);
                self.configured = true;
            }
            "config_stepper" => {
                self.steppers.entry(args.oid("oid")).or_default();
            }
            "tmcuart_send" => self.tmcuart_send(&args),
            "set_next_step_dir" => {
                let stepper = self.steppers.entry(args.oid("oid")).or_default();
                stepper.dir = if args.int("dir") == 1 { 1 } else { -1 };
            }
            "reset_step_clock" => {
                let stepper = self.steppers.entry(args.oid("oid")).or_default();
                stepper.pending = Some(PendingMove {
                    dir: stepper.dir,
                    ..PendingMove::default()
                });
            }
            "queue_step" => {
                if let Some(pending) = self.pending(args.oid("oid")) {
                    pending.steps += args.int("count");
                }
            }
            "stepper_stop_on_trigger" => {
                if let Some(pending) = self.pending(args.oid("oid")) {
                    pending.trsync = Some(args.oid("trsync_oid"));
                }
            }
            "endstop_home" => {
                let trsync = args.oid("trsync_oid");
                for stepper in self.steppers.values_mut() {
                    if let Some(pending) = stepper.pending.as_mut().filter(|p| p.trsync == Some(trsync)) {
                        pending.endstop = true;
                    }
                }
            }
            "stepper_get_position" => {
                let oid = args.oid("oid");
                if !self.hold_moves {
                    self.resolve(oid, None);
                }
                let position = self.steppers.get(&oid).map_or(0, |s| s.position);
                self.reply(Response::new("stepper_position").with("oid", oid).with("pos", position));
            }
            "trsync_trigger" => {
                let trsync = args.oid("oid");
                let reason = args.int("reason");
                let stepper = self
                    .steppers
                    .iter()
                    .find(|(_, s)| s.pending.as_ref().is_some_and(|p| p.trsync == Some(trsync)))
                    .map(|(oid, _)| *oid);
                match stepper {
                    Some(oid) => self.resolve(oid, Some(reason)),
                    None => self.trsync_state(trsync, reason),
                }
            }
            _ => {}
        }
    }

    fn pending(&mut self, oid: Oid) -> Option<&mut PendingMove> {
        self.steppers.get_mut(&oid).and_then(|s| s.pending.as_mut())
    }

    fn trsync_state(&self, trsync: Oid, reason: i64) {
        self.reply(
            Response::new("trsync_state")
                .with("oid", trsync)
                .with("can_trigger", 0)
                .with("trigger_reason", reason)
                .with("clock", 0),
        );
    }

    /// Finish the stepper's pending move. A forced `reason` stops it in place.
    fn resolve(&mut self, oid: Oid, reason: Option<i64>) {
        let endstop = self.endstop_position;
        let Some(stepper) = self.steppers.get_mut(&oid) else {
            return;
        };
        let Some(pending) = stepper.pending.take() else {
            return;
        };

        let start = stepper.position;
        let target = start + pending.dir * pending.steps;
        let reason = match (reason, endstop) {
            (Some(reason), _) => reason,
            (None, Some(at)) if pending.endstop && at >= start.min(target) && at <= start.max(target) => {
                stepper.position = at;
                REASON_ENDSTOP
            }
            (None, _) => {
                stepper.position = target;
                REASON_TIMEOUT
            }
        };

        if let Some(trsync) = pending.trsync {
            self.trsync_state(trsync, reason);
        }
    }

    fn tmcuart_send(&mut self, args: &Args<'_>) {
        let bus = args.oid("oid");
        let frame = args.bytes("write");
        let read = args.int("read");

        let reply = if read > 0 {
            codec::strip_serial_bits(&frame, 4).ok().map(|msg| {
                let (address, register) = (msg[1], msg[2]);
                let value = self.registers.get(&(bus, address, register)).copied().unwrap_or_default();
                codec::encode_write(REPLY_SYNC, REPLY_ADDRESS, register, value).to_vec()
            })
        } else {
            if let Ok(msg) = codec::strip_serial_bits(&frame, 8) {
                let (address, register) = (msg[1], msg[2] & !WRITE_BIT);
                let value = u32::from_be_bytes([msg[3], msg[4], msg[5], msg[6]]);
                if self.drop_writes > 0 {
                    self.drop_writes -= 1;
                } else {
                    self.registers.insert((bus, address, register), value);
                    let count = self.registers.entry((bus, address, IFCNT)).or_default();
                    *count = (*count + 1) & 0xff;
                }
            }
            Some(Vec::new())
        };

        // A malformed read request gets no answer, like a silent bus
        if let Some(reply) = reply {
            self.reply(Response::new("tmcuart_response").with("oid", bus).with("read", reply));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_file() {
        let mut mcu = MockMcu::new();
        let mut rx = mcu.connect("mock", 250000).unwrap();

        let write = codec::encode_write_request(0xf5, 1, 0x10, 0x1f08);
        mcu.send(&format!("tmcuart_send oid=0 write={} read=0", codec::hex(&write)))
            .unwrap();
        assert_eq!(mcu.register(0, 1, 0x10), Some(0x1f08));
        assert_eq!(mcu.register(0, 1, IFCNT), Some(1));

        let read = codec::encode_read(0xf5, 1, IFCNT);
        mcu.send(&format!("tmcuart_send oid=0 write={} read=10", codec::hex(&read)))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().bytes("read").map(<[u8]>::len), Some(0));
        let reply = rx.try_recv().unwrap();
        assert_eq!(codec::decode_read(IFCNT, reply.bytes("read").unwrap()), Some(1));
    }

    #[test]
    fn test_move_stops_at_endstop() {
        let mut mcu = MockMcu::new().with_endstop_at(-300);
        let mut rx = mcu.connect("mock", 250000).unwrap();
        for command in [
            "config_stepper oid=0",
            "set_next_step_dir oid=0 dir=0",
            "reset_step_clock oid=0 clock=100",
            "queue_step oid=0 interval=10 count=1000 add=0",
            "stepper_stop_on_trigger oid=0 trsync_oid=2",
            "endstop_home oid=3 trsync_oid=2",
            "stepper_get_position oid=0",
        ] {
            mcu.send(command).unwrap();
        }

        let state = rx.try_recv().unwrap();
        assert_eq!(state.name, "trsync_state");
        assert_eq!(state.int("trigger_reason"), Some(REASON_ENDSTOP));
        assert_eq!(rx.try_recv().unwrap().int("pos"), Some(-300));
        assert!(!mcu.is_moving(0));
    }
}
