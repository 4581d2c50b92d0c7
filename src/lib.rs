//! # Faultline
//! Cluster coordination for chaos-engineering control planes.
//!
//! This is a convenience package re-exporting the sub-projects; most
//! applications only want one of them:
//!
//! ### Features
//! - `faultline-grid` - The in-process coordination grid: partitioned maps,
//!   membership, migration and quorum event delivery.
//! - `faultline-failover` - The task-ownership and failover coordinator
//!   built on top of the grid.

#[cfg(feature = "faultline-failover")]
pub use faultline_failover as failover;
#[cfg(feature = "faultline-grid")]
pub use faultline_grid as grid;
