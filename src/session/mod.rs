//! Session window calculation
//!
//! Tracking only runs during the two regional sessions and the pre-queue
//! window that opens before each of them. This module decides, from the
//! wall clock alone, which phase of the daily cycle is current.

pub mod window;

pub use window::{time_between, Region, SessionPhase, SessionSchedule, SessionStatus};
