//! Scheduling core.
//!
//! This module provides the pieces that turn cache misses into bounded
//! upstream traffic:
//! - Rolling-window budget tracking (`RateGovernor`)
//! - Per-key coalescing and priority ordering (`PendingRegistry`)
//! - The dispatch control loop and lifecycle (`FetchScheduler`)

mod dispatcher;
mod governor;
mod pending;

pub use dispatcher::{FetchScheduler, SchedulerStats};
pub use governor::RateGovernor;
pub use pending::{DispatchJob, PendingRegistry, WaiterHandle};
