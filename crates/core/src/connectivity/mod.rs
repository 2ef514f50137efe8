//! Connectivity detection
//!
//! The monitor owns the authoritative "current snapshot"; everything else in
//! the core asks it whether the device is online.

pub mod monitor;
pub mod ports;
pub mod quality;
pub mod source;

pub use monitor::{ConnectivityMonitor, ConnectivityObserver};
pub use ports::ConnectivitySource;
pub use source::ChannelConnectivitySource;
