//! Domain types and models

pub mod actions;
pub mod connectivity;
pub mod sync;

pub use actions::{ActionKind, PendingAction, Priority};
pub use connectivity::{
    ConnectionQuality, ConnectivitySignal, ConnectivityState, ConnectivitySummary, SignalDetails,
    TransportType,
};
pub use sync::{
    SyncConflict, SyncErrorRecord, SyncPhase, SyncProgress, SyncResult, SyncStatus,
};
