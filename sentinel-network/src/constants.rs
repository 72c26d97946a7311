//! Reference timing/sizing constants (§3-§6), in the spirit of the
//! teacher's own `constants.rs` (referenced throughout `candidate_set.rs` as
//! `crate::constants::...`). All of these are the spec's *reference*
//! values; [`crate::config::Config`] lets an operator override each one.

use std::time::Duration;

/// The 32-bit magic prefixing every frame (§4.1). This is the target
/// network's well-known mainnet value; configuration may point at a
/// different network.
pub const DEFAULT_MAGIC: u32 = 0xD9B4_BEF9;

/// Seen-set eviction window (§4.3).
pub const SEEN_SET_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Seen-set sweep interval (§4.3).
pub const SEEN_SET_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-region target concurrent sessions (§3 invariant, §4.4).
pub const DEFAULT_PER_REGION_TARGET: usize = 1;

/// Candidate failure-backoff window (§4.4).
pub const FAILURE_BACKOFF_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Disconnect-strike window (§4.4).
pub const DISCONNECT_STRIKE_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Strikes before permanent blacklisting (§4.4).
pub const STRIKE_THRESHOLD: u32 = 2;

/// A session below this duration counts as a "quick" disconnect for strike
/// purposes (§4.6 termination rule).
pub const QUICK_DISCONNECT_THRESHOLD: Duration = Duration::from_secs(60);

/// Slot-maintenance poll interval (§4.4).
pub const SLOT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Discovery cycle interval (§4.5).
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Maximum number of endpoints geolocated per discovery cycle (§4.5).
pub const DISCOVERY_GEOLOCATE_CAP: usize = 1000;

/// Geolocation batch size (§4.5).
pub const DISCOVERY_GEOLOCATE_BATCH: usize = 100;

/// Pause between geolocation batches (§4.5).
pub const DISCOVERY_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Candidates retained per target country (§4.5).
pub const DISCOVERY_PER_COUNTRY_CAP: usize = 10;

/// Maximum HTTP 429 retries during discovery, and the linear backoff unit
/// (§4.5, §9 design note: linear by attempt, preserved for fidelity).
pub const DISCOVERY_MAX_RETRIES: u32 = 3;
pub const DISCOVERY_BACKOFF_UNIT: Duration = Duration::from_secs(30);

/// TCP dial timeout (§4.6, §5).
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Total time budget for the handshake phase (§4.6, §5).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-read deadline once a session is active (§4.6, §5).
pub const ACTIVE_READ_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Status-log / keepalive-ping interval (§4.6).
pub const STATUS_AND_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Shutdown grace period (§4.8, §5).
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// The protocol version and services this observer reports in its own
/// `version` message (§4.6): no relay services, height 0 — it never serves
/// data (§1 non-goal).
pub const LOCAL_PROTOCOL_VERSION: i32 = 70015;
pub const LOCAL_START_HEIGHT: i32 = 0;
pub const LOCAL_USER_AGENT: &str = "/sentineld:0.1/";

/// Default Prometheus exporter bind address (§6).
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";
