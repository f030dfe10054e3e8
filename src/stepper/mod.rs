//! Stepper axes: status, position tracking and the move/homing controller.

mod controller;
mod position;
mod status;

pub use controller::{
    StepperController, StepperOids, ENDSTOP_SAMPLE_COUNT, ENDSTOP_SAMPLE_TIME, MOVE_START_DELAY,
    STEP_PULSE_DURATION,
};
pub use position::Position;
pub use status::{StepperSnapshot, StepperStatus, TriggerReason};
