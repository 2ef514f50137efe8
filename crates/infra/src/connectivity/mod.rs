//! Connectivity adapters

pub mod probe;

pub use probe::{HttpProbe, ProbeReport};
