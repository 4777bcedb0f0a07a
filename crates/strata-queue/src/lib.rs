//! Strata Queue - Layered state resolution
//!
//! This crate implements the state resolution queue:
//! - Contributor and target abstractions
//! - Priority-ordered registration with origin tags
//! - Resolution with change notification
//! - Active contributors driven by state signals
//! - Batched and host-driven resolution

pub mod config;
pub mod contributor;
pub mod queue;

pub use config::*;
pub use contributor::*;
pub use queue::*;
