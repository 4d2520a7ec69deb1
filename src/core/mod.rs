//! Core functionality for the Idasen Desk Bridge
//! This module contains the desk link, telemetry fan-out, the closed-loop
//! move controller and the timers that drive the sit/stand cycle.

pub mod bluetooth;
pub mod cycle;
pub mod error;
pub mod events;
pub mod motion;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cycle::{Posture, SitStandCycle};
pub use error::{DeskError, DeskResult};
pub use events::{DeskEvent, EventBus};
pub use motion::{MoveController, MoveOutcome};
pub use scheduler::Scheduler;
