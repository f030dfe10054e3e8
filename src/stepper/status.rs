//! Stepper lifecycle and trigger states.

use core::fmt;

/// Stepper axis status.
///
/// Ordered so that every state an operation can still be in compares
/// `<= Homing`; `status > Homing` means the last operation has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StepperStatus {
    /// No origin established since the MCU was configured.
    #[default]
    NotHomed,
    /// Executing a relative move.
    Moving,
    /// Executing the homing sequence.
    Homing,
    /// Ready for commands.
    Idle,
    /// Last operation failed; see the stepper's last error.
    Fault,
}

impl StepperStatus {
    /// Check whether the last operation has finished.
    #[inline]
    pub fn is_settled(self) -> bool {
        self > StepperStatus::Homing
    }

    /// Check whether a home or move is in progress.
    #[inline]
    pub fn is_busy(self) -> bool {
        matches!(self, StepperStatus::Moving | StepperStatus::Homing)
    }

    /// State name for display/debugging.
    pub const fn name(self) -> &'static str {
        match self {
            StepperStatus::NotHomed => "NotHomed",
            StepperStatus::Moving => "Moving",
            StepperStatus::Homing => "Homing",
            StepperStatus::Idle => "Idle",
            StepperStatus::Fault => "Fault",
        }
    }
}

impl fmt::Display for StepperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a trigger group fired, as reported in `trsync_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriggerReason {
    /// Not triggered yet.
    #[default]
    Active,
    /// Endstop reached.
    EndstopHit,
    /// Stopped by `trsync_trigger`.
    Manual,
    /// Deadline passed; the move ran to completion.
    Timeout,
    /// Any other reason code.
    Other(u8),
}

impl TriggerReason {
    /// Decode a reason code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TriggerReason::Active,
            1 => TriggerReason::EndstopHit,
            2 => TriggerReason::Manual,
            4 => TriggerReason::Timeout,
            other => TriggerReason::Other(other),
        }
    }

    /// Reason code sent to the MCU.
    pub fn code(self) -> u8 {
        match self {
            TriggerReason::Active => 0,
            TriggerReason::EndstopHit => 1,
            TriggerReason::Manual => 2,
            TriggerReason::Timeout => 4,
            TriggerReason::Other(code) => code,
        }
    }
}

/// Point-in-time view of one stepper.
#[derive(Debug, Clone, PartialEq)]
pub struct StepperSnapshot {
    /// Stepper name from configuration.
    pub name: String,
    /// Current status.
    pub status: StepperStatus,
    /// Position relative to the homed origin, in distance units.
    pub position: f64,
    /// An origin has been established since the MCU was configured.
    pub homed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        use StepperStatus::*;
        assert!(NotHomed < Moving);
        assert!(Moving < Homing);
        assert!(Homing < Idle);
        assert!(Idle < Fault);

        assert!(!NotHomed.is_settled());
        assert!(!Moving.is_settled());
        assert!(!Homing.is_settled());
        assert!(Idle.is_settled());
        assert!(Fault.is_settled());

        assert!(!NotHomed.is_busy());
        assert!(Moving.is_busy());
        assert!(Homing.is_busy());
        assert!(!Idle.is_busy());
        assert!(!Fault.is_busy());
    }

    #[test]
    fn test_trigger_codes() {
        for code in 0..=8u8 {
            assert_eq!(TriggerReason::from_code(code).code(), code);
        }
        assert_eq!(TriggerReason::from_code(4), TriggerReason::Timeout);
        assert_eq!(TriggerReason::from_code(3), TriggerReason::Other(3));
    }
}
