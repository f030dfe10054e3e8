//! Driver register maps and initialization sequences.

use core::fmt;
use core::str::FromStr;

use libm::{floor, sqrt};
use serde::Deserialize;

use crate::config::Microsteps;

/// Named driver registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// Global configuration flags.
    Gconf,
    /// Interface transmission counter, incremented on every accepted write.
    Ifcnt,
    /// Reply delay.
    Slaveconf,
    /// Hold and run current.
    IholdIrun,
    /// Delay before standstill current reduction.
    Tpowerdown,
    /// Internal pulse generator velocity.
    Vactual,
    /// Chopper and microstep configuration.
    Chopconf,
    /// StealthChop PWM configuration.
    Pwmconf,
}

impl Register {
    /// Every register known to the crate.
    pub const ALL: [Register; 8] = [
        Register::Gconf,
        Register::Ifcnt,
        Register::Slaveconf,
        Register::IholdIrun,
        Register::Tpowerdown,
        Register::Vactual,
        Register::Chopconf,
        Register::Pwmconf,
    ];

    /// Datasheet name.
    pub const fn name(self) -> &'static str {
        match self {
            Register::Gconf => "GCONF",
            Register::Ifcnt => "IFCNT",
            Register::Slaveconf => "SLAVECONF",
            Register::IholdIrun => "IHOLD_IRUN",
            Register::Tpowerdown => "TPOWERDOWN",
            Register::Vactual => "VACTUAL",
            Register::Chopconf => "CHOPCONF",
            Register::Pwmconf => "PWMCONF",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRegister;

impl fmt::Display for UnknownRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown register name")
    }
}

impl FromStr for Register {
    type Err = UnknownRegister;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Register::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or(UnknownRegister)
    }
}

/// Supported driver families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverKind {
    /// Trinamic TMC2209.
    Tmc2209,
}

impl DriverKind {
    /// Register map and init sequence for this driver family.
    pub fn backend(self) -> &'static dyn DriverBackend {
        match self {
            DriverKind::Tmc2209 => &Tmc2209,
        }
    }
}

/// Driver settings applied by the init sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TmcDriverSettings {
    /// Microstep resolution.
    pub microsteps: Microsteps,
    /// RMS run current in amps.
    pub run_current: f64,
}

/// Register writes performed when a driver is configured, in order.
pub type InitSequence = heapless::Vec<(Register, u32), 8>;

/// Chip-specific register access.
pub trait DriverBackend: Sync {
    /// Driver family.
    fn kind(&self) -> DriverKind;

    /// Register address, or `None` when the chip lacks the register.
    fn address(&self, register: Register) -> Option<u8>;

    /// Register writes that bring a freshly powered driver into service.
    fn init_sequence(&self, settings: &TmcDriverSettings) -> InitSequence;
}

/// TMC2209 register map.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tmc2209;

impl Tmc2209 {
    /// pdn_disable, mstep_reg_select.
    pub const GCONF: u32 = 0xC0;
    /// senddelay=2.
    pub const SLAVECONF: u32 = 0x200;
    /// dedge, intpol, vsense, tbl=2, hstrt=5, toff=3.
    pub const CHOPCONF: u32 = 0x3003_0053;
    /// tpowerdown=20.
    pub const TPOWERDOWN: u32 = 0x14;
    /// Passive braking, pwm_autoscale, pwm_autograd, pwm_ofs=36, pwm_grad=14,
    /// pwm_freq=1, pwm_reg=8, pwm_lim=12.
    pub const PWMCONF: u32 = 0xC83D_0E24;
    /// iholddelay=8, ihold=0.
    pub const IHOLD_IRUN: u32 = 0x8_0000;
}

impl DriverBackend for Tmc2209 {
    fn kind(&self) -> DriverKind {
        DriverKind::Tmc2209
    }

    fn address(&self, register: Register) -> Option<u8> {
        Some(match register {
            Register::Gconf => 0x00,
            Register::Ifcnt => 0x02,
            Register::Slaveconf => 0x03,
            Register::IholdIrun => 0x10,
            Register::Tpowerdown => 0x11,
            Register::Vactual => 0x22,
            Register::Chopconf => 0x6C,
            Register::Pwmconf => 0x70,
        })
    }

    fn init_sequence(&self, settings: &TmcDriverSettings) -> InitSequence {
        let mut seq = InitSequence::new();
        for write in [
            (Register::Gconf, Self::GCONF),
            (Register::Slaveconf, Self::SLAVECONF),
            (Register::Chopconf, Self::CHOPCONF | settings.microsteps.mres() << 24),
            (Register::Tpowerdown, Self::TPOWERDOWN),
            (Register::Pwmconf, Self::PWMCONF),
            (Register::IholdIrun, Self::IHOLD_IRUN | (irun(settings.run_current) as u32) << 8),
        ] {
            // Six writes into an eight-slot sequence
            let _ = seq.push(write);
        }
        seq
    }
}

/// Run current scale (0-31) for an RMS current, assuming a 0.11 ohm sense
/// resistor and `vsense` set.
pub fn irun(run_current: f64) -> u8 {
    let cs = floor(32.0 * 0.130 * run_current * sqrt(2.0) / 0.18 + 0.5) - 1.0;
    cs.clamp(0.0, 31.0) as u8
}

/// VACTUAL register value for a signed speed, as a 24-bit two's complement
/// field. Zero returns control to the STEP input.
pub fn vactual(speed: f64, steps_per_distance: f64) -> u32 {
    let velocity = (speed * steps_per_distance / 0.715) as i64;
    (velocity.clamp(-(1 << 23), (1 << 23) - 1) as u32) & 0x00FF_FFFF
}
