//! Signal normalization and quality heuristics

use chrono::{DateTime, Utc};
use circlepay_domain::constants::{WIFI_EXCELLENT_DBM, WIFI_GOOD_DBM};
use circlepay_domain::{ConnectionQuality, ConnectivitySignal, ConnectivityState, TransportType};

/// Classify link quality from a raw signal.
pub fn classify_quality(signal: &ConnectivitySignal) -> ConnectionQuality {
    if !signal.is_connected {
        return ConnectionQuality::Unknown;
    }

    let by_transport = match signal.transport {
        TransportType::Wifi => signal.details.strength_dbm.map(|dbm| {
            if dbm >= WIFI_EXCELLENT_DBM {
                ConnectionQuality::Excellent
            } else if dbm >= WIFI_GOOD_DBM {
                ConnectionQuality::Good
            } else {
                ConnectionQuality::Poor
            }
        }),
        TransportType::Cellular => {
            signal.details.cellular_generation.as_deref().and_then(|generation| {
                match generation.to_ascii_lowercase().as_str() {
                    "5g" => Some(ConnectionQuality::Excellent),
                    "4g" => Some(ConnectionQuality::Good),
                    "3g" | "2g" => Some(ConnectionQuality::Poor),
                    _ => None,
                }
            })
        }
        TransportType::Other | TransportType::Unknown => None,
    };

    by_transport.unwrap_or(if is_reachable(signal) {
        ConnectionQuality::Good
    } else {
        ConnectionQuality::Poor
    })
}

/// Unknown reachability is treated as reachable when a link exists.
pub fn is_reachable(signal: &ConnectivitySignal) -> bool {
    signal.is_internet_reachable.unwrap_or(signal.is_connected)
}

/// Build the snapshot for `signal`, carrying timestamps over from `previous`.
///
/// `reconnected_at` is left as the previous value; edge detection stamps it.
pub fn normalize(
    signal: &ConnectivitySignal,
    previous: Option<&ConnectivityState>,
    now: DateTime<Utc>,
) -> ConnectivityState {
    let is_reachable = signal.is_connected && is_reachable(signal);
    let online = signal.is_connected && is_reachable;
    let is_metered = signal
        .details
        .is_connection_expensive
        .unwrap_or(signal.transport == TransportType::Cellular);

    ConnectivityState {
        is_connected: signal.is_connected,
        is_reachable,
        transport: signal.transport,
        is_metered,
        quality: classify_quality(signal),
        last_connected_at: if online {
            Some(now)
        } else {
            previous.and_then(|state| state.last_connected_at)
        },
        reconnected_at: previous.and_then(|state| state.reconnected_at),
    }
}
