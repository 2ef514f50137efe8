//! Post-reconnect synchronization of pending actions

pub mod coordinator;
pub mod ports;

pub use coordinator::SyncCoordinator;
pub use ports::ActionDispatcher;
