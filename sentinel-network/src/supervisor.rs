//! Process-wide orchestration (C7, §4.8): startup sequence, the
//! slot-maintenance loop that keeps each region provisioned, signal
//! handling, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use sentinel_store::Persistence;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::constants::{SHUTDOWN_GRACE_PERIOD, SLOT_MAINTENANCE_INTERVAL, STATUS_AND_PING_INTERVAL};
use crate::discovery;
use crate::metrics;
use crate::pool::Pool;
use crate::seenset::SeenSets;
use crate::session::{self, SessionDeps};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("invalid metrics listen address {0}: {1}")]
    BadMetricsAddr(String, std::net::AddrParseError),
    #[error("failed to install the metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Owns every long-lived resource of the process: the pool, the seen-sets,
/// the persistence handle, and the configuration (§9: "explicit singletons
/// created at startup and passed into tasks").
pub struct Supervisor {
    config: Config,
    pool: Arc<Pool>,
    store: Arc<dyn Persistence>,
    seen: Arc<SeenSets>,
}

impl Supervisor {
    pub fn new(config: Config, store: Arc<dyn Persistence>) -> Supervisor {
        Supervisor {
            config,
            pool: Arc::new(Pool::new()),
            store,
            seen: Arc::new(SeenSets::new()),
        }
    }

    /// Runs the supervisor until a shutdown signal arrives, then unwinds
    /// within the shutdown grace period (§4.8).
    pub async fn run(self) -> Result<(), SupervisorError> {
        metrics::register_all();
        match self.store.startup_metric_totals().await {
            Ok(totals) => {
                metrics::seed_counter(metrics::TRANSACTIONS_RECORDED, totals.transactions_recorded);
                metrics::seed_counter(metrics::BLOCKS_RECEIVED, totals.blocks_received);
                metrics::seed_counter(metrics::PEER_CONNECTIONS, totals.peer_connections);
                metrics::seed_counter(metrics::INV_TX_ANNOUNCEMENTS, totals.inv_tx_announcements);
                metrics::seed_counter(metrics::INV_BLOCK_ANNOUNCEMENTS, totals.inv_block_announcements);
            }
            Err(error) => warn!(%error, "failed to read startup metric totals, counters start at zero"),
        }

        let metrics_addr: SocketAddr = self
            .config
            .metrics_addr
            .parse()
            .map_err(|error| SupervisorError::BadMetricsAddr(self.config.metrics_addr.clone(), error))?;
        let _metrics_handle = metrics::install(metrics_addr)?;
        info!(%metrics_addr, "metrics exporter listening");

        let cancelled = CancellationToken::new();
        let http_client = reqwest::Client::new();

        let mut background = JoinSet::new();
        background.spawn({
            let seen = self.seen.clone();
            let cancelled = cancelled.child_token();
            async move { seen.run_sweeper(cancelled).await }
        });
        background.spawn({
            let config = self.config.clone();
            let pool = self.pool.clone();
            let cancelled = cancelled.child_token();
            async move { discovery::run_discovery_loop(&config, &pool, http_client, cancelled).await }
        });
        background.spawn({
            let pool = self.pool.clone();
            let seen = self.seen.clone();
            let cancelled = cancelled.child_token();
            async move { run_status_reporter(pool, seen, cancelled).await }
        });

        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut slot_ticker = tokio::time::interval(SLOT_MAINTENANCE_INTERVAL);

        loop {
            tokio::select! {
                _ = wait_for_shutdown_signal() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = slot_ticker.tick() => {
                    self.maintain_slots(&mut sessions, &cancelled);
                }
                Some(_finished) = sessions.join_next(), if !sessions.is_empty() => {
                    // A session ended; the next slot-maintenance tick
                    // re-provisions its region if still under target.
                }
            }
        }

        if !shutdown_within(&cancelled, &mut sessions, &mut background, SHUTDOWN_GRACE_PERIOD).await {
            warn!("shutdown grace period elapsed with tasks still outstanding");
        }

        Ok(())
    }

    /// Polls every known region and spawns sessions until each reaches its
    /// target concurrency (§4.4: "polls active_count(region) <
    /// per_region_target every 5 seconds").
    fn maintain_slots(&self, sessions: &mut JoinSet<()>, cancelled: &CancellationToken) {
        for region in self.pool.regions() {
            while self.pool.active_count(&region) < self.config.per_region_target {
                let Some(endpoint) = self.pool.next_for_region(&region) else {
                    break;
                };
                let deps = Arc::new(SessionDeps {
                    pool: self.pool.clone(),
                    store: self.store.clone(),
                    seen: self.seen.clone(),
                    magic: self.config.magic,
                });
                let region_name = region.clone();
                let session_cancelled = cancelled.child_token();
                sessions.spawn(async move {
                    session::run_session(endpoint, region_name, deps, session_cancelled).await;
                });
            }
        }
    }
}

/// Cancels every session and background task, then waits for them to finish
/// draining, bounded by `grace` (§4.8). Returns `false` if `grace` elapsed
/// with tasks still outstanding.
async fn shutdown_within(
    cancelled: &CancellationToken,
    sessions: &mut JoinSet<()>,
    background: &mut JoinSet<()>,
    grace: std::time::Duration,
) -> bool {
    cancelled.cancel();
    let drain = async {
        while sessions.join_next().await.is_some() {}
        background.shutdown().await;
    };
    tokio::time::timeout(grace, drain).await.is_ok()
}

/// A process-wide status line, separate from each session's own per-peer
/// tick (§4.6), reporting aggregate pool occupancy.
async fn run_status_reporter(pool: Arc<Pool>, seen: Arc<SeenSets>, cancelled: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_AND_PING_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let total = pool.total_active();
                metrics::gauge(metrics::PEERS_ACTIVE, total as f64);
                for region in pool.regions() {
                    let active = pool.active_count(&region);
                    metrics::peers_by_region(&region, active as f64);
                }
                metrics::seen_map_size("tx", seen.transactions.len() as f64);
                metrics::seen_map_size("block", seen.blocks.len() as f64);
                info!(total_active = total, "supervisor status");
            }
            _ = cancelled.cancelled() => return,
        }
    }
}

/// Waits for either SIGINT or SIGTERM (§4.8: "On signal (INT/TERM)").
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    /// §8 scenario S6: 17 active sessions all drain inside the shutdown
    /// grace period once cancelled.
    #[tokio::test]
    async fn seventeen_sessions_drain_within_the_shutdown_grace_period() {
        let cancelled = CancellationToken::new();
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut background: JoinSet<()> = JoinSet::new();

        for _ in 0..17 {
            let token = cancelled.child_token();
            sessions.spawn(async move {
                token.cancelled().await;
            });
        }

        let start = Instant::now();
        let drained = shutdown_within(&cancelled, &mut sessions, &mut background, SHUTDOWN_GRACE_PERIOD).await;

        assert!(drained, "sessions should drain inside the grace period");
        assert!(start.elapsed() < SHUTDOWN_GRACE_PERIOD);
    }

    /// A session that ignores cancellation (e.g. stuck on a blocking call)
    /// should cause the grace period to elapse rather than hang forever.
    #[tokio::test]
    async fn a_stuck_session_trips_the_grace_period_timeout() {
        let cancelled = CancellationToken::new();
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut background: JoinSet<()> = JoinSet::new();

        sessions.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let drained =
            shutdown_within(&cancelled, &mut sessions, &mut background, Duration::from_millis(50)).await;
        assert!(!drained);
    }
}
