//! Connectivity snapshots and raw platform signals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Physical transport reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Wifi,
    Cellular,
    Other,
    #[default]
    Unknown,
}

impl TransportType {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }
}

/// Heuristic link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    #[default]
    Unknown,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        }
    }
}

/// Transport-specific details attached to a raw signal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDetails {
    /// Wifi signal strength in dBm.
    pub strength_dbm: Option<i32>,
    /// Cellular generation as reported by the platform (`"4g"`, `"5g"`, ...).
    pub cellular_generation: Option<String>,
    pub is_connection_expensive: Option<bool>,
}

/// Raw event delivered by the platform connectivity source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySignal {
    pub is_connected: bool,
    /// `None` when the platform has not determined reachability yet.
    pub is_internet_reachable: Option<bool>,
    pub transport: TransportType,
    pub details: SignalDetails,
}

impl ConnectivitySignal {
    /// Connected and reachable wifi link.
    pub fn wifi(strength_dbm: i32) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            transport: TransportType::Wifi,
            details: SignalDetails { strength_dbm: Some(strength_dbm), ..SignalDetails::default() },
        }
    }

    /// Connected and reachable cellular link of the given generation.
    pub fn cellular(generation: &str) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            transport: TransportType::Cellular,
            details: SignalDetails {
                cellular_generation: Some(generation.to_string()),
                is_connection_expensive: Some(true),
                ..SignalDetails::default()
            },
        }
    }

    /// No link at all.
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
            transport: TransportType::Unknown,
            details: SignalDetails::default(),
        }
    }
}

/// Normalized connectivity snapshot
///
/// A fresh value is produced for every signal; snapshots are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub is_reachable: bool,
    pub transport: TransportType,
    pub is_metered: bool,
    pub quality: ConnectionQuality,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub reconnected_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    /// Connected and able to reach the internet.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_reachable
    }
}

/// Display-oriented summary of the current connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySummary {
    pub status: String,
    pub transport: String,
    pub quality: String,
    pub is_metered: bool,
}

impl ConnectivitySummary {
    /// Summary of `state`, or an unknown summary before the first signal.
    pub fn from_state(state: Option<&ConnectivityState>) -> Self {
        match state {
            Some(state) => Self {
                status: if state.is_online() { "online" } else { "offline" }.to_string(),
                transport: state.transport.as_str().to_string(),
                quality: state.quality.as_str().to_string(),
                is_metered: state.is_metered,
            },
            None => Self {
                status: "unknown".to_string(),
                transport: TransportType::Unknown.as_str().to_string(),
                quality: ConnectionQuality::Unknown.as_str().to_string(),
                is_metered: false,
            },
        }
    }
}
