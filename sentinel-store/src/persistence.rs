//! The narrow contract the observer core writes through (§4.2). Everything
//! about the storage engine itself — schema, connection pooling, SQL
//! dialect — is hidden behind this trait; the core only ever sees these nine
//! operations.

use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_chain::{Block, Transaction};

use crate::error::StoreError;
use crate::types::{ConflictOutcome, GeoInfo, MetricTotals, ObservationOutcome, PeerVersionInfo};

/// The persistence interface (§4.2). A plain async trait is enough here —
/// unlike a `tower::Service`, the core never needs load-shedding or
/// backpressure signals from the storage engine, just a place to write rows.
/// Write-only save for one read: `startup_metric_totals`, needed to seed the
/// process's metric counters from what's already on disk (§6).
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Upsert: create if new with first/last-seen = now and
    /// connection-count = 1; otherwise refresh last-seen, version fields,
    /// increment connection-count.
    async fn record_peer_connection(
        &self,
        endpoint: SocketAddr,
        version: &PeerVersionInfo,
    ) -> Result<(), StoreError>;

    /// Overwrite geolocation columns for `endpoint`.
    async fn update_peer_geo_info(&self, endpoint: SocketAddr, geo: &GeoInfo) -> Result<(), StoreError>;

    /// Atomic add to the transaction/block announcement counters; refreshes
    /// last-seen.
    async fn increment_peer_announcements(
        &self,
        endpoint: SocketAddr,
        delta_tx: i64,
        delta_block: i64,
    ) -> Result<(), StoreError>;

    /// If no prior latency is recorded, set it; otherwise store the
    /// arithmetic mean of the previous value and `latency_ms`.
    async fn update_peer_latency(&self, endpoint: SocketAddr, latency_ms: f64) -> Result<(), StoreError>;

    /// Upserts the observation row for `tx_hash` and appends a propagation
    /// event in the same logical operation (§4.2, §5 ordering guarantee):
    /// first insert sets first-seen = now, first-peer = peer, peer-count = 1
    /// and a propagation event with delay 0; every subsequent call
    /// increments peer-count and appends an event with delay =
    /// `now - first_seen` in milliseconds.
    async fn record_observation(
        &self,
        tx_hash: [u8; 32],
        peer: SocketAddr,
    ) -> Result<ObservationOutcome, StoreError>;

    /// Inserts (or ignores if already present) the transaction, its inputs
    /// and outputs; marks each referenced output spent if still unspent; and
    /// — only if every input resolved to a known value — updates the fee to
    /// `Σinputs − Σoutputs`.
    async fn record_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Inserts the block header (ignore on conflict) with first-seen = now,
    /// first-peer = `peer`.
    async fn record_block(&self, block: &Block, peer: SocketAddr) -> Result<(), StoreError>;

    /// For each tx hash in `tx_hashes`, sets the transaction's block-hash/
    /// height only if currently null, and the observation's in-block/
    /// confirmed-at only if currently null (§8 invariant 12: idempotent).
    async fn confirm_transactions(
        &self,
        block_hash: [u8; 32],
        height: u32,
        block_time: DateTime<Utc>,
        tx_hashes: &[[u8; 32]],
    ) -> Result<(), StoreError>;

    /// Finds every other unconfirmed transaction that claims an outpoint
    /// also claimed by `tx` (excluding coinbase inputs and `tx` itself,
    /// §4.7), and atomically marks both sides `double_spend_flag = true`
    /// with `replaced_by` set on each conflicting transaction's observation.
    async fn detect_input_conflicts(&self, tx: &Transaction) -> Result<ConflictOutcome, StoreError>;

    /// Reads back the counter totals persisted so far, to seed the process's
    /// metric counters at startup (§6).
    async fn startup_metric_totals(&self) -> Result<MetricTotals, StoreError>;
}
