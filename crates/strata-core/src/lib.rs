//! Strata Core - Fundamental types for layered state resolution
//!
//! This crate defines the types shared by queues and their collaborators:
//! - Identifiers (QueueId, ContributorHandle, SubscriptionId, ListenerId, Origin)
//! - Change events
//! - State signals for active contributors
//! - Errors

pub mod id;
pub mod event;
pub mod signal;
pub mod error;

pub use id::*;
pub use event::*;
pub use signal::*;
pub use error::*;
