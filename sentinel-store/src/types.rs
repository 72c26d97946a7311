//! Data model entities the core exchanges with persistence (§3).

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use sentinel_chain::PeerServices;

/// A geolocation record attached to a [`PeerEndpoint`] (§3, §6).
#[derive(Clone, Debug, PartialEq)]
pub struct GeoInfo {
    pub country_code: String,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub asn: Option<u32>,
    pub organization: Option<String>,
}

/// The version-handshake fields a session learns about a peer and reports
/// via [`crate::Persistence::record_peer_connection`].
#[derive(Clone, Debug, PartialEq)]
pub struct PeerVersionInfo {
    pub protocol_version: i32,
    pub services: PeerServices,
    pub user_agent: String,
}

/// A first-seen observation of an announced transaction (§3). Written, not
/// held in memory by the core — this is the shape persistence returns on
/// read and the shape callers construct on write.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub tx_hash: [u8; 32],
    pub first_seen: DateTime<Utc>,
    pub first_peer: SocketAddr,
    pub peer_count: i32,
    pub confirming_block_hash: Option<[u8; 32]>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<[u8; 32]>,
    pub double_spend_flag: bool,
}

/// One propagation-timing row: an announcement of `tx_hash` by `peer` at
/// `announced_at`, `delay_from_first_ms` after the transaction's first-seen
/// time (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct PropagationEvent {
    pub tx_hash: [u8; 32],
    pub peer: SocketAddr,
    pub announced_at: DateTime<Utc>,
    pub delay_from_first_ms: i64,
}

/// The result of [`crate::Persistence::record_observation`]: the event just
/// appended, alongside whether this insert created the observation row.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationOutcome {
    pub propagation_event: PropagationEvent,
    pub newly_created: bool,
}

/// The outcome of [`crate::Persistence::detect_input_conflicts`]: the set of
/// other unconfirmed transactions that conflict with the one just processed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConflictOutcome {
    pub conflicting_tx_hashes: Vec<[u8; 32]>,
}

impl ConflictOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicting_tx_hashes.is_empty()
    }
}

/// Counter totals derivable from stored rows, read back once at startup to
/// seed the process's metric counters (§6: "restarts do not reset them").
/// Only covers counters that map onto a persisted quantity; counters of
/// transient events that are never written to storage (handshake failures,
/// peer disconnections, in-session dedup hits) have no persisted total and
/// stay at zero after a restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricTotals {
    pub transactions_recorded: u64,
    pub blocks_received: u64,
    pub peer_connections: u64,
    pub inv_tx_announcements: u64,
    pub inv_block_announcements: u64,
}
