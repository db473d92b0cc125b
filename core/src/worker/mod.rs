//! Worker module for executing load requests
//!
//! A virtual user is a tokio task running the loop
//! **rate permit -> request -> checks -> record -> think -> repeat**
//! until its retirement token fires.
//!
//! All virtual users of a run share one [`RequestExecutor`] (transport,
//! target, headers, checks, aggregator) and one [`GlobalRateLimiter`].
//! Each keeps its own [`VirtualUserStats`], handed back when it exits.
//!
//! # Example
//!
//! ```ignore
//! use loadramp_core::worker::{RequestExecutorBuilder, VirtualUser, GlobalRateLimiter};
//!
//! let executor = Arc::new(
//!     RequestExecutorBuilder::new()
//!         .transport(transport)
//!         .target(url)
//!         .aggregator(aggregator)
//!         .build()?,
//! );
//! let retire = CancellationToken::new();
//! let vu = VirtualUser::new(0, executor, Arc::new(GlobalRateLimiter::unlimited()), retire.clone());
//! let handle = tokio::spawn(vu.run());
//!
//! retire.cancel();
//! let stats = handle.await?;
//! println!("Iterations: {}", stats.iterations());
//! ```

mod builder;
mod executor;
mod rate_limiter;
mod stats;
mod virtual_user;

pub use builder::RequestExecutorBuilder;
pub use executor::RequestExecutor;
pub use rate_limiter::GlobalRateLimiter;
pub use stats::VirtualUserStats;
pub use virtual_user::VirtualUser;
