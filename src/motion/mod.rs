//! Motion module for focuser-mcu.
//!
//! Provides trapezoidal profile calculation and its encoding as MCU step
//! queue commands.

mod profile;
mod queue;

pub use profile::{Direction, MotionPhase, MotionPlanner, MotionProfile, Segment};
pub use queue::{QueueStep, QueueSteps, MAX_QUEUE_COUNT};
