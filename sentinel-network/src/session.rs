//! The peer session state machine (C6, §4.6): dial, handshake, active
//! message loop, termination. One task per connection, spawned by the
//! supervisor's slot-maintenance loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use sentinel_chain::{
    InventoryKind, InventoryVector, NetworkAddress, PeerServices, PingMessage, PongMessage, VersionMessage,
};
use sentinel_store::{PeerVersionInfo, Persistence};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::constants::{
    ACTIVE_READ_TIMEOUT, DIAL_TIMEOUT, HANDSHAKE_TIMEOUT, LOCAL_PROTOCOL_VERSION, LOCAL_START_HEIGHT,
    LOCAL_USER_AGENT, QUICK_DISCONNECT_THRESHOLD, STATUS_AND_PING_INTERVAL,
};
use crate::message::Message;
use crate::metrics;
use crate::pool::{PeerEndpoint, Pool};
use crate::seenset::{SeenKind, SeenSets};

type PeerStream = Framed<TcpStream, FrameCodec>;

/// Everything a session needs that it doesn't own itself.
pub struct SessionDeps {
    pub pool: Arc<Pool>,
    pub store: Arc<dyn Persistence>,
    pub seen: Arc<SeenSets>,
    pub magic: u32,
}

/// Counters accumulated since the last 60-second status tick (§4.6).
#[derive(Default)]
struct TickCounters {
    tx_seen: u64,
    block_seen: u64,
    inv_vectors: u64,
    deduplicated: u64,
}

struct PendingPing {
    nonce: [u8; 8],
    sent_at: Instant,
}

/// Runs one session end to end: dial, handshake, active loop, cleanup.
/// Never panics on a peer's misbehavior — every failure path falls through
/// to the pool bookkeeping and returns (§7: never propagate one peer's
/// failure beyond its own session).
pub async fn run_session(endpoint: PeerEndpoint, region: String, deps: Arc<SessionDeps>, cancelled: CancellationToken) {
    let addr = endpoint.addr;

    let stream = match dial(addr).await {
        Ok(stream) => stream,
        Err(error) => {
            debug!(%addr, %error, "dial failed");
            deps.pool.mark_failed(addr);
            return;
        }
    };

    let mut framed = Framed::new(stream, FrameCodec::new(deps.magic));
    if let Err(error) = handshake(&mut framed, &endpoint, &deps).await {
        warn!(%addr, %error, "handshake failed");
        deps.pool.mark_failed(addr);
        metrics::counter(metrics::HANDSHAKE_FAILURES, 1);
        return;
    }

    if let Err(error) = metrics::time_db_call(deps.store.update_peer_geo_info(addr, &endpoint.geo)).await {
        warn!(%addr, %error, "failed to record peer geo info");
    }
    deps.pool.set_active(&region, addr);
    metrics::counter(metrics::PEER_CONNECTIONS, 1);

    let started_at = Instant::now();
    active_loop(&mut framed, &endpoint, &deps, cancelled).await;

    deps.pool.remove_active(&region, addr);
    metrics::counter(metrics::PEER_DISCONNECTIONS, 1);
    if started_at.elapsed() < QUICK_DISCONNECT_THRESHOLD {
        deps.pool.mark_disconnect(addr);
    }
}

async fn dial(addr: SocketAddr) -> Result<TcpStream, std::io::Error> {
    match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out")),
    }
}

#[derive(Debug, thiserror::Error)]
enum HandshakeError {
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] crate::codec::FrameCodecError),
    #[error(transparent)]
    Serialization(#[from] sentinel_chain::SerializationError),
    #[error("connection closed during handshake")]
    Eof,
    #[error("expected a version message, got {0}")]
    UnexpectedMessage(String),
}

/// The handshake phase, under one shared 30 s deadline (§4.6).
async fn handshake(framed: &mut PeerStream, endpoint: &PeerEndpoint, deps: &SessionDeps) -> Result<(), HandshakeError> {
    let inner = async {
        let local_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let version = VersionMessage {
            version: LOCAL_PROTOCOL_VERSION,
            services: PeerServices::empty(),
            timestamp: Utc::now(),
            addr_recv: NetworkAddress {
                services: PeerServices::empty(),
                addr: endpoint.addr,
            },
            addr_from: NetworkAddress {
                services: PeerServices::empty(),
                addr: local_addr,
            },
            nonce: rand::random(),
            user_agent: LOCAL_USER_AGENT.to_string(),
            start_height: LOCAL_START_HEIGHT,
            relay: Some(true),
        };
        send(framed, Message::Version(version)).await?;

        let reply = recv(framed).await?;
        let peer_version = match reply {
            Message::Version(version) => version,
            other => return Err(HandshakeError::UnexpectedMessage(other.command().to_string())),
        };
        let version_info = PeerVersionInfo {
            protocol_version: peer_version.version,
            services: peer_version.services,
            user_agent: peer_version.user_agent,
        };
        if let Err(error) =
            metrics::time_db_call(deps.store.record_peer_connection(endpoint.addr, &version_info)).await
        {
            warn!(addr = %endpoint.addr, %error, "failed to record peer connection");
        }

        send(framed, Message::Verack).await?;
        recv(framed).await?; // expected verack; any frame here completes the phase
        Ok(())
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, inner).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn send(framed: &mut PeerStream, message: Message) -> Result<(), HandshakeError> {
    let frame = message.into_raw_frame()?;
    framed.send(frame).await?;
    Ok(())
}

async fn recv(framed: &mut PeerStream) -> Result<Message, HandshakeError> {
    let frame = framed.next().await.ok_or(HandshakeError::Eof)??;
    Ok(Message::from_raw_frame(&frame)?)
}

/// The active message loop (§4.6): reads with a per-read deadline, dispatches
/// by command, and emits a status/ping tick every 60 seconds.
async fn active_loop(framed: &mut PeerStream, endpoint: &PeerEndpoint, deps: &SessionDeps, cancelled: CancellationToken) {
    let addr = endpoint.addr;
    let mut counters = TickCounters::default();
    let mut pending_ping: Option<PendingPing> = None;
    let mut status_ticker = tokio::time::interval(STATUS_AND_PING_INTERVAL);
    status_ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;

            _ = cancelled.cancelled() => {
                info!(%addr, "session cancelled by supervisor");
                return;
            }

            _ = status_ticker.tick() => {
                info!(
                    %addr,
                    tx_seen = counters.tx_seen,
                    block_seen = counters.block_seen,
                    inv_vectors = counters.inv_vectors,
                    deduplicated = counters.deduplicated,
                    "peer status"
                );
                counters = TickCounters::default();

                let mut nonce = [0u8; 8];
                rand::thread_rng().fill_bytes(&mut nonce);
                if send(framed, Message::Ping(PingMessage { nonce })).await.is_err() {
                    return;
                }
                pending_ping = Some(PendingPing { nonce, sent_at: Instant::now() });
            }

            frame = tokio::time::timeout(ACTIVE_READ_TIMEOUT, framed.next()) => {
                let frame = match frame {
                    Ok(Some(Ok(frame))) => frame,
                    Ok(Some(Err(error))) => {
                        debug!(%addr, %error, "frame decode error, closing session");
                        return;
                    }
                    Ok(None) => {
                        debug!(%addr, "peer closed the connection");
                        return;
                    }
                    Err(_) => {
                        debug!(%addr, "read timed out, closing session");
                        return;
                    }
                };

                let message = match Message::from_raw_frame(&frame) {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(%addr, %error, "malformed message, skipping");
                        continue;
                    }
                };

                dispatch(framed, endpoint, deps, message, &mut counters, &mut pending_ping).await;
            }
        }
    }
}

async fn dispatch(
    framed: &mut PeerStream,
    endpoint: &PeerEndpoint,
    deps: &SessionDeps,
    message: Message,
    counters: &mut TickCounters,
    pending_ping: &mut Option<PendingPing>,
) {
    let addr = endpoint.addr;
    match message {
        Message::Inv(items) => handle_inv(framed, endpoint, deps, items, counters).await,
        Message::Tx(tx) => handle_tx(deps, tx).await,
        Message::Block(block) => handle_block(deps, block, addr).await,
        Message::Ping(ping) => {
            let _ = send(framed, Message::Pong(PongMessage { nonce: ping.nonce })).await;
        }
        Message::Pong(pong) => {
            if let Some(pending) = pending_ping.take() {
                if pending.nonce == pong.nonce {
                    let elapsed_ms = pending.sent_at.elapsed().as_secs_f64() * 1000.0;
                    if let Err(error) = metrics::time_db_call(deps.store.update_peer_latency(addr, elapsed_ms)).await {
                        warn!(%addr, %error, "failed to record peer latency");
                    }
                    metrics::histogram(metrics::PEER_LATENCY_MS, elapsed_ms);
                } else {
                    *pending_ping = Some(pending);
                }
            }
        }
        Message::Version(_) | Message::Verack | Message::Unknown(_) => {}
    }
}

async fn handle_inv(
    framed: &mut PeerStream,
    endpoint: &PeerEndpoint,
    deps: &SessionDeps,
    items: Vec<InventoryVector>,
    counters: &mut TickCounters,
) {
    let addr = endpoint.addr;
    counters.inv_vectors += items.len() as u64;

    let mut not_seen = Vec::new();
    let mut tx_count = 0i64;
    let mut block_count = 0i64;
    // A single `inv` frame can list the same hash more than once; only the
    // first occurrence within this frame gets a RecordObservation call, so a
    // peer repeating itself in one message doesn't inflate propagation-event
    // counts (distinct from the seen-set, which dedups across frames/peers).
    let mut recorded_this_frame = std::collections::HashSet::new();

    for vector in &items {
        match vector.kind {
            InventoryKind::Transaction => {
                tx_count += 1;
                counters.tx_seen += 1;
                if recorded_this_frame.insert(vector.hash) {
                    if let Err(error) = metrics::time_db_call(deps.store.record_observation(vector.hash, addr)).await
                    {
                        warn!(%addr, %error, "failed to record observation");
                    }
                }
                if deps.seen.mark(SeenKind::Transaction, vector.hash) {
                    not_seen.push(*vector);
                } else {
                    counters.deduplicated += 1;
                    metrics::counter(metrics::TX_DEDUPLICATED, 1);
                }
            }
            InventoryKind::Block => {
                block_count += 1;
                counters.block_seen += 1;
                if deps.seen.mark(SeenKind::Block, vector.hash) {
                    not_seen.push(*vector);
                }
            }
            InventoryKind::Other(_) => {}
        }
    }

    if tx_count > 0 {
        metrics::counter(metrics::INV_TX_ANNOUNCEMENTS, tx_count as u64);
    }
    if block_count > 0 {
        metrics::counter(metrics::INV_BLOCK_ANNOUNCEMENTS, block_count as u64);
    }
    if tx_count > 0 || block_count > 0 {
        if let Err(error) =
            metrics::time_db_call(deps.store.increment_peer_announcements(addr, tx_count, block_count)).await
        {
            warn!(%addr, %error, "failed to increment peer announcements");
        }
    }

    if !not_seen.is_empty() {
        let _ = send(framed, Message::GetData(not_seen)).await;
    }
}

async fn handle_tx(deps: &SessionDeps, tx: sentinel_chain::Transaction) {
    metrics::counter(metrics::TRANSACTIONS_RECEIVED, 1);
    if let Err(error) = metrics::time_db_call(deps.store.record_transaction(&tx)).await {
        warn!(%error, "failed to record transaction");
        return;
    }
    metrics::counter(metrics::TRANSACTIONS_RECORDED, 1);
    if let Err(error) = metrics::time_db_call(deps.store.detect_input_conflicts(&tx)).await {
        warn!(%error, "failed to detect input conflicts");
    }
}

async fn handle_block(deps: &SessionDeps, block: sentinel_chain::Block, peer: SocketAddr) {
    metrics::counter(metrics::BLOCKS_RECEIVED, 1);
    metrics::histogram(metrics::BLOCK_TX_COUNT, block.transactions.len() as f64);
    metrics::gauge(metrics::LATEST_BLOCK_HEIGHT, block.height as f64);

    if let Err(error) = metrics::time_db_call(deps.store.record_block(&block, peer)).await {
        warn!(%error, "failed to record block");
    }

    let mut tx_hashes = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        // Best-effort: one transaction's failure must not drop the rest of
        // the block's confirmations (§4.6).
        if let Err(error) = metrics::time_db_call(deps.store.record_transaction(tx)).await {
            warn!(%error, "failed to record transaction from block, continuing");
        }
        tx_hashes.push(tx.txid);
    }

    let block_time = Utc
        .timestamp_opt(block.header.timestamp as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);

    if let Err(error) = metrics::time_db_call(
        deps.store.confirm_transactions(block.hash, block.height, block_time, &tx_hashes),
    )
    .await
    {
        warn!(%error, "failed to confirm transactions");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use sentinel_store::{ConflictOutcome, GeoInfo, MemoryStore, MetricTotals, ObservationOutcome, StoreError};
    use tokio::net::TcpListener;

    use super::*;
    use crate::constants::DEFAULT_MAGIC;

    #[test]
    fn quick_disconnect_threshold_is_sixty_seconds() {
        assert_eq!(QUICK_DISCONNECT_THRESHOLD, Duration::from_secs(60));
    }

    fn test_geo() -> GeoInfo {
        GeoInfo {
            country_code: "US".to_string(),
            city: None,
            latitude: 0.0,
            longitude: 0.0,
            asn: None,
            organization: None,
        }
    }

    /// §8 scenario S1: a successful handshake records one peer connection,
    /// one geo update, and enters the pool's ACTIVE state for its region.
    #[tokio::test]
    async fn handshake_success_enters_active_and_records_peer_connection() {
        sentinel_test::init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap();

        let fake_peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new(DEFAULT_MAGIC));

            let frame = framed.next().await.unwrap().unwrap();
            assert_eq!(frame.command, "version");

            let reply = VersionMessage {
                version: LOCAL_PROTOCOL_VERSION,
                services: PeerServices::NETWORK,
                timestamp: Utc::now(),
                addr_recv: NetworkAddress { services: PeerServices::NETWORK, addr: peer_addr },
                addr_from: NetworkAddress { services: PeerServices::NETWORK, addr: peer_addr },
                nonce: 42,
                user_agent: "/fakepeer:0.1/".to_string(),
                start_height: 700_000,
                relay: Some(true),
            };
            framed.send(Message::Version(reply).into_raw_frame().unwrap()).await.unwrap();

            let frame = framed.next().await.unwrap().unwrap();
            assert_eq!(frame.command, "verack");
            framed.send(Message::Verack.into_raw_frame().unwrap()).await.unwrap();

            // Hold the connection open so the test body can observe the
            // ACTIVE state before the session's read loop times out.
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let pool = Arc::new(Pool::new());
        let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
        let seen = Arc::new(SeenSets::new());
        let deps = Arc::new(SessionDeps {
            pool: pool.clone(),
            store: store.clone(),
            seen,
            magic: DEFAULT_MAGIC,
        });
        let endpoint = PeerEndpoint { addr: peer_addr, geo: test_geo() };
        let cancelled = CancellationToken::new();
        let session = tokio::spawn(run_session(endpoint, "US".to_string(), deps, cancelled.clone()));

        let mut active = 0;
        for _ in 0..50 {
            active = pool.active_count("US");
            if active == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(active, 1, "session should have entered ACTIVE for its region");

        let totals = store.startup_metric_totals().await.unwrap();
        assert_eq!(totals.peer_connections, 1);

        cancelled.cancel();
        session.await.unwrap();
        fake_peer.await.unwrap();
    }

    /// A persistence wrapper that otherwise behaves exactly like
    /// [`MemoryStore`], but counts calls to `record_observation` so S2 can
    /// assert on call count rather than just stored content.
    struct CountingStore {
        inner: MemoryStore,
        record_observation_calls: AtomicU64,
    }

    impl CountingStore {
        fn new() -> Self {
            CountingStore {
                inner: MemoryStore::new(),
                record_observation_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Persistence for CountingStore {
        async fn record_peer_connection(
            &self,
            endpoint: SocketAddr,
            version: &PeerVersionInfo,
        ) -> Result<(), StoreError> {
            self.inner.record_peer_connection(endpoint, version).await
        }

        async fn update_peer_geo_info(&self, endpoint: SocketAddr, geo: &GeoInfo) -> Result<(), StoreError> {
            self.inner.update_peer_geo_info(endpoint, geo).await
        }

        async fn increment_peer_announcements(
            &self,
            endpoint: SocketAddr,
            delta_tx: i64,
            delta_block: i64,
        ) -> Result<(), StoreError> {
            self.inner.increment_peer_announcements(endpoint, delta_tx, delta_block).await
        }

        async fn update_peer_latency(&self, endpoint: SocketAddr, latency_ms: f64) -> Result<(), StoreError> {
            self.inner.update_peer_latency(endpoint, latency_ms).await
        }

        async fn record_observation(
            &self,
            tx_hash: [u8; 32],
            peer: SocketAddr,
        ) -> Result<ObservationOutcome, StoreError> {
            self.record_observation_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.record_observation(tx_hash, peer).await
        }

        async fn record_transaction(&self, tx: &sentinel_chain::Transaction) -> Result<(), StoreError> {
            self.inner.record_transaction(tx).await
        }

        async fn record_block(&self, block: &sentinel_chain::Block, peer: SocketAddr) -> Result<(), StoreError> {
            self.inner.record_block(block, peer).await
        }

        async fn confirm_transactions(
            &self,
            block_hash: [u8; 32],
            height: u32,
            block_time: chrono::DateTime<Utc>,
            tx_hashes: &[[u8; 32]],
        ) -> Result<(), StoreError> {
            self.inner.confirm_transactions(block_hash, height, block_time, tx_hashes).await
        }

        async fn detect_input_conflicts(&self, tx: &sentinel_chain::Transaction) -> Result<ConflictOutcome, StoreError> {
            self.inner.detect_input_conflicts(tx).await
        }

        async fn startup_metric_totals(&self) -> Result<MetricTotals, StoreError> {
            self.inner.startup_metric_totals().await
        }
    }

    /// §8 scenario S2: an `inv` with hashes `[H1, H2, H1]` produces a single
    /// `getdata` listing H1 then H2, and exactly two `record_observation`
    /// calls — the repeated H1 within this one frame doesn't double-count,
    /// even though decision (a) in DESIGN.md allows duplicates *across*
    /// separate announcements.
    #[tokio::test]
    async fn inv_with_repeated_hash_sends_getdata_once_and_dedups_within_the_frame() {
        sentinel_test::init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(listen_addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let mut session_side = Framed::new(client, FrameCodec::new(DEFAULT_MAGIC));
        let mut peer_side = Framed::new(server_stream, FrameCodec::new(DEFAULT_MAGIC));

        let store = Arc::new(CountingStore::new());
        let deps_store: Arc<dyn Persistence> = store.clone();
        let deps = SessionDeps {
            pool: Arc::new(Pool::new()),
            store: deps_store,
            seen: Arc::new(SeenSets::new()),
            magic: DEFAULT_MAGIC,
        };
        let endpoint = PeerEndpoint { addr: listen_addr, geo: test_geo() };

        let h1 = [1u8; 32];
        let h2 = [2u8; 32];
        let items = vec![
            InventoryVector::transaction(h1),
            InventoryVector::transaction(h2),
            InventoryVector::transaction(h1),
        ];
        let mut counters = TickCounters::default();
        handle_inv(&mut session_side, &endpoint, &deps, items, &mut counters).await;

        let frame = peer_side.next().await.unwrap().unwrap();
        assert_eq!(frame.command, "getdata");
        let Message::GetData(received) = Message::from_raw_frame(&frame).unwrap() else {
            panic!("expected a getdata frame");
        };
        assert_eq!(received, vec![InventoryVector::transaction(h1), InventoryVector::transaction(h2)]);

        assert_eq!(store.record_observation_calls.load(Ordering::SeqCst), 2);
    }
}
