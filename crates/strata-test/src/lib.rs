//! Strata Test Harness - Queue validation and fuzzing
//!
//! This crate provides:
//! - Recording observers and scripted contributors
//! - Seeded queue fuzzing against a reference fold
//! - End-to-end integration scenarios

pub mod harness;
pub mod queue_fuzzer;
pub mod integration;

pub use harness::*;
pub use queue_fuzzer::*;
pub use integration::*;
