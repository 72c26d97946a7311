//! Metric registration (§6), via `metrics` + `metrics-exporter-prometheus` —
//! the same two crates the teacher depends on for its own `/metrics`
//! surface.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const TRANSACTIONS_RECEIVED: &str = "sentinel_transactions_received_total";
pub const TRANSACTIONS_RECORDED: &str = "sentinel_transactions_recorded_total";
pub const BLOCKS_RECEIVED: &str = "sentinel_blocks_received_total";
pub const PEER_CONNECTIONS: &str = "sentinel_peer_connections_total";
pub const PEER_DISCONNECTIONS: &str = "sentinel_peer_disconnections_total";
pub const HANDSHAKE_FAILURES: &str = "sentinel_handshake_failures_total";
pub const INV_TX_ANNOUNCEMENTS: &str = "sentinel_inv_tx_announcements_total";
pub const INV_BLOCK_ANNOUNCEMENTS: &str = "sentinel_inv_block_announcements_total";
pub const TX_DEDUPLICATED: &str = "sentinel_tx_deduplicated_total";

pub const PEERS_ACTIVE: &str = "sentinel_peers_active";
pub const PEERS_BY_REGION: &str = "sentinel_peers_by_region";
pub const LATEST_BLOCK_HEIGHT: &str = "sentinel_latest_block_height";
pub const SEEN_MAP_SIZE: &str = "sentinel_seen_map_size";

pub const PEER_LATENCY_MS: &str = "sentinel_peer_latency_ms";
pub const BLOCK_TX_COUNT: &str = "sentinel_block_tx_count";
pub const DB_QUERY_DURATION_MS: &str = "sentinel_db_query_duration_ms";

/// Installs the process-wide Prometheus recorder and starts its HTTP
/// listener on `addr` (§6). Returns a handle the caller can hold for the
/// life of the process (dropping it does not stop the exporter, but keeps
/// the intent explicit at the call site).
pub fn install(addr: std::net::SocketAddr) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install_recorder()
}

/// Registers every counter named in §6 at zero, so they show up in
/// `/metrics` immediately even before the first event. Counters are later
/// seeded from persistence totals by the caller (§6: "restarts do not reset
/// them").
pub fn register_all() {
    for name in [
        TRANSACTIONS_RECEIVED,
        TRANSACTIONS_RECORDED,
        BLOCKS_RECEIVED,
        PEER_CONNECTIONS,
        PEER_DISCONNECTIONS,
        HANDSHAKE_FAILURES,
        INV_TX_ANNOUNCEMENTS,
        INV_BLOCK_ANNOUNCEMENTS,
        TX_DEDUPLICATED,
    ] {
        metrics::counter!(name).absolute(0);
    }
    for name in [PEERS_ACTIVE, LATEST_BLOCK_HEIGHT] {
        metrics::gauge!(name).set(0.0);
    }
}

/// Seeds a counter to an absolute starting value (persistence totals at
/// startup, §6).
pub fn seed_counter(name: &'static str, value: u64) {
    if value > 0 {
        metrics::counter!(name).absolute(value);
    }
}

/// Thin wrappers over the `metrics` macros, so call sites that also have a
/// local module named `metrics` in scope (this one) don't have to
/// disambiguate the macro invocation from the module path.
pub fn counter(name: &'static str, value: u64) {
    metrics::counter!(name).increment(value);
}

pub fn gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

pub fn histogram(name: &'static str, value: f64) {
    metrics::histogram!(name).record(value);
}

/// Per-region occupancy (§6: "peers-by-region").
pub fn peers_by_region(region: &str, value: f64) {
    metrics::gauge!(PEERS_BY_REGION, "region" => region.to_string()).set(value);
}

/// Seen-set size, labeled by which of the two disjoint sets it is (§6:
/// "seen-map-size by kind").
pub fn seen_map_size(kind: &'static str, value: f64) {
    metrics::gauge!(SEEN_MAP_SIZE, "kind" => kind).set(value);
}

/// Times a persistence call and records it into [`DB_QUERY_DURATION_MS`]
/// (§6), regardless of whether the call succeeded.
pub async fn time_db_call<F, T, E>(future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    histogram(DB_QUERY_DURATION_MS, start.elapsed().as_secs_f64() * 1000.0);
    result
}
