//! Ramp scheduling
//!
//! [`RunProfile`] turns elapsed time into a target concurrency;
//! [`RampScheduler`] spawns and retires virtual users to follow it.

mod profile;
mod ramp;

pub use profile::{RunProfile, Stage, MAX_RUN_DURATION};
pub use ramp::{DrainReport, RampExit, RampScheduler, SchedulerGauges, SchedulerSettings};

#[cfg(test)]
mod tests;
