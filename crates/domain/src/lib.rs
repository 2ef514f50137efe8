//! # CirclePay Domain
//!
//! Business domain types for the CirclePay client resilience core.
//!
//! This crate contains:
//! - Connectivity snapshots and raw platform signals
//! - Pending actions, priorities and sync bookkeeping types
//! - Domain error types and Result definitions
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other CirclePay crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
