//! Run controller for load run lifecycle management
//!
//! The RunController composes the other components into one run:
//! - Builds the request executor, aggregator and rate limiter from config
//! - Drives the ramp scheduler through the profile
//! - Drains workers on profile end or cancellation
//! - Takes the final snapshot and produces the report
//!
//! # Example
//!
//! ```ignore
//! use loadramp_core::{RunConfig, RunControllerBuilder};
//!
//! let config = RunConfig::new("http://localhost:8080")
//!     .with_stage(Duration::from_secs(60), 100)
//!     .with_stage(Duration::from_secs(300), 100)
//!     .with_stage(Duration::from_secs(60), 0);
//!
//! let controller = RunControllerBuilder::new().config(config).build()?;
//! let report = controller.run_with_signal_handling().await?;
//! ```

mod builder;
mod executor;

pub use builder::RunControllerBuilder;
pub use executor::{RunController, RunState};
