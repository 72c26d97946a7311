//! An in-memory [`Persistence`] implementation for tests (§4.2, §8). Behind
//! the `test-support` feature so `sentinel-network`'s own test suite can
//! exercise the session/supervisor logic (S1-S6) without a live Postgres
//! instance, while observing the identical upsert/idempotence/double-spend
//! semantics as [`crate::postgres::PostgresStore`].

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_chain::{extract_address, Block, Transaction};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::persistence::Persistence;
use crate::types::{
    ConflictOutcome, GeoInfo, MetricTotals, Observation, ObservationOutcome, PeerVersionInfo, PropagationEvent,
};

type Outpoint = ([u8; 32], u32);

#[derive(Clone, Debug)]
struct PeerRecord {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    connection_count: i64,
    version: Option<PeerVersionInfo>,
    geo: Option<GeoInfo>,
    tx_announcements: i64,
    block_announcements: i64,
    latency_ms: Option<f64>,
}

#[derive(Clone, Debug)]
struct PersistedOutput {
    value: i64,
    address: Option<String>,
    spent_by: Option<[u8; 32]>,
}

#[derive(Clone, Debug)]
struct StoredTransaction {
    fee: Option<i64>,
    block_hash: Option<[u8; 32]>,
    height: Option<u32>,
}

#[derive(Clone, Debug)]
struct StoredBlock {
    first_seen: DateTime<Utc>,
    first_peer: SocketAddr,
}

#[derive(Default)]
struct State {
    peers: HashMap<SocketAddr, PeerRecord>,
    observations: HashMap<[u8; 32], Observation>,
    propagation_events: Vec<PropagationEvent>,
    transactions: HashMap<[u8; 32], StoredTransaction>,
    outputs: HashMap<Outpoint, PersistedOutput>,
    /// Every non-coinbase outpoint a recorded transaction spends, regardless
    /// of that transaction's current confirmation status — looked up by
    /// `detect_input_conflicts` and filtered to unconfirmed spenders there.
    spenders: HashMap<Outpoint, HashSet<[u8; 32]>>,
    blocks: HashMap<[u8; 32], StoredBlock>,
}

/// A `tokio::sync::Mutex`-guarded in-memory store. No lock is ever held
/// across network or database I/O here — there is none; every method body
/// is a constant number of map operations under one short critical section.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn record_peer_connection(
        &self,
        endpoint: SocketAddr,
        version: &PeerVersionInfo,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        match state.peers.get_mut(&endpoint) {
            Some(peer) => {
                peer.last_seen = now;
                peer.version = Some(version.clone());
                peer.connection_count += 1;
            }
            None => {
                state.peers.insert(
                    endpoint,
                    PeerRecord {
                        first_seen: now,
                        last_seen: now,
                        connection_count: 1,
                        version: Some(version.clone()),
                        geo: None,
                        tx_announcements: 0,
                        block_announcements: 0,
                        latency_ms: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_peer_geo_info(&self, endpoint: SocketAddr, geo: &GeoInfo) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.geo = Some(geo.clone());
        }
        Ok(())
    }

    async fn increment_peer_announcements(
        &self,
        endpoint: SocketAddr,
        delta_tx: i64,
        delta_block: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.tx_announcements += delta_tx;
            peer.block_announcements += delta_block;
            peer.last_seen = Utc::now();
        }
        Ok(())
    }

    async fn update_peer_latency(&self, endpoint: SocketAddr, latency_ms: f64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.latency_ms = Some(match peer.latency_ms {
                Some(previous) => (previous + latency_ms) / 2.0,
                None => latency_ms,
            });
        }
        Ok(())
    }

    async fn record_observation(
        &self,
        tx_hash: [u8; 32],
        peer: SocketAddr,
    ) -> Result<ObservationOutcome, StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let (event, newly_created) = match state.observations.get_mut(&tx_hash) {
            Some(obs) => {
                obs.peer_count += 1;
                let delay = (now - obs.first_seen).num_milliseconds().max(0);
                (
                    PropagationEvent {
                        tx_hash,
                        peer,
                        announced_at: now,
                        delay_from_first_ms: delay,
                    },
                    false,
                )
            }
            None => {
                state.observations.insert(
                    tx_hash,
                    Observation {
                        tx_hash,
                        first_seen: now,
                        first_peer: peer,
                        peer_count: 1,
                        confirming_block_hash: None,
                        confirmed_at: None,
                        replaced_by: None,
                        double_spend_flag: false,
                    },
                );
                (
                    PropagationEvent {
                        tx_hash,
                        peer,
                        announced_at: now,
                        delay_from_first_ms: 0,
                    },
                    true,
                )
            }
        };
        state.propagation_events.push(event.clone());
        Ok(ObservationOutcome {
            propagation_event: event,
            newly_created,
        })
    }

    async fn record_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&tx.txid) {
            return Ok(());
        }

        let mut total_input_value: i64 = 0;
        let mut all_inputs_resolved = true;
        for input in &tx.inputs {
            let outpoint = (input.previous_output.hash, input.previous_output.index);
            if let Some(output) = state.outputs.get_mut(&outpoint) {
                if output.spent_by.is_none() {
                    output.spent_by = Some(tx.txid);
                }
                total_input_value += output.value;
            } else {
                all_inputs_resolved = false;
            }
            if !input.previous_output.is_coinbase() {
                state.spenders.entry(outpoint).or_default().insert(tx.txid);
            }
        }

        let mut total_output_value: i64 = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            total_output_value += output.value;
            let outpoint = (tx.txid, index as u32);
            state.outputs.entry(outpoint).or_insert(PersistedOutput {
                value: output.value,
                address: extract_address(&output.script_pubkey),
                spent_by: None,
            });
        }

        let fee = if all_inputs_resolved {
            Some(total_input_value - total_output_value)
        } else {
            None
        };

        state.transactions.insert(
            tx.txid,
            StoredTransaction {
                fee,
                block_hash: None,
                height: None,
            },
        );
        Ok(())
    }

    async fn record_block(&self, block: &Block, peer: SocketAddr) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.blocks.entry(block.hash).or_insert(StoredBlock {
            first_seen: Utc::now(),
            first_peer: peer,
        });
        Ok(())
    }

    async fn confirm_transactions(
        &self,
        block_hash: [u8; 32],
        height: u32,
        block_time: DateTime<Utc>,
        tx_hashes: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for hash in tx_hashes {
            if let Some(tx) = state.transactions.get_mut(hash) {
                if tx.block_hash.is_none() {
                    tx.block_hash = Some(block_hash);
                    tx.height = Some(height);
                }
            }
            if let Some(obs) = state.observations.get_mut(hash) {
                if obs.confirming_block_hash.is_none() {
                    obs.confirming_block_hash = Some(block_hash);
                    obs.confirmed_at = Some(block_time);
                }
            }
        }
        Ok(())
    }

    async fn detect_input_conflicts(&self, tx: &Transaction) -> Result<ConflictOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let mut conflicts = HashSet::new();
        for input in &tx.inputs {
            if input.previous_output.is_coinbase() {
                continue;
            }
            let outpoint = (input.previous_output.hash, input.previous_output.index);
            let Some(spenders) = state.spenders.get(&outpoint) else {
                continue;
            };
            for &candidate in spenders {
                if candidate == tx.txid {
                    continue;
                }
                let is_unconfirmed = state
                    .transactions
                    .get(&candidate)
                    .map(|stored| stored.block_hash.is_none())
                    .unwrap_or(false);
                if is_unconfirmed {
                    conflicts.insert(candidate);
                }
            }
        }

        if !conflicts.is_empty() {
            for &conflicting in &conflicts {
                if let Some(obs) = state.observations.get_mut(&conflicting) {
                    obs.replaced_by = Some(tx.txid);
                    obs.double_spend_flag = true;
                }
            }
            if let Some(obs) = state.observations.get_mut(&tx.txid) {
                obs.double_spend_flag = true;
            }
        }

        Ok(ConflictOutcome {
            conflicting_tx_hashes: conflicts.into_iter().collect(),
        })
    }

    async fn startup_metric_totals(&self) -> Result<MetricTotals, StoreError> {
        let state = self.state.lock().await;
        Ok(MetricTotals {
            transactions_recorded: state.transactions.len() as u64,
            blocks_received: state.blocks.len() as u64,
            peer_connections: state.peers.values().map(|peer| peer.connection_count.max(0) as u64).sum(),
            inv_tx_announcements: state.peers.values().map(|peer| peer.tx_announcements.max(0) as u64).sum(),
            inv_block_announcements: state.peers.values().map(|peer| peer.block_announcements.max(0) as u64).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_chain::{OutPoint, TxIn, TxOut};

    fn tx_spending(hash: [u8; 32], index: u32, txid_seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint { hash, index },
                signature_script: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOut {
                value: 1000,
                script_pubkey: vec![],
            }],
            lock_time: 0,
            witness_present: false,
            txid: [txid_seed; 32],
            size_bytes: 100,
            base_size_bytes: 100,
        }
    }

    #[tokio::test]
    async fn record_observation_first_event_has_zero_delay() {
        let store = MemoryStore::new();
        let peer: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let outcome = store.record_observation([1u8; 32], peer).await.unwrap();
        assert!(outcome.newly_created);
        assert_eq!(outcome.propagation_event.delay_from_first_ms, 0);

        let second = store.record_observation([1u8; 32], peer).await.unwrap();
        assert!(!second.newly_created);
        assert!(second.propagation_event.delay_from_first_ms >= 0);
    }

    #[tokio::test]
    async fn double_spend_marks_both_sides() {
        let store = MemoryStore::new();
        let peer: SocketAddr = "127.0.0.1:8333".parse().unwrap();

        let spent_outpoint_hash = [9u8; 32];
        let tx_a = tx_spending(spent_outpoint_hash, 0, 0xAA);
        let tx_b = tx_spending(spent_outpoint_hash, 0, 0xBB);

        store.record_observation(tx_a.txid, peer).await.unwrap();
        store.record_observation(tx_b.txid, peer).await.unwrap();

        store.record_transaction(&tx_a).await.unwrap();
        let outcome_a = store.detect_input_conflicts(&tx_a).await.unwrap();
        assert!(!outcome_a.has_conflicts());

        store.record_transaction(&tx_b).await.unwrap();
        let outcome_b = store.detect_input_conflicts(&tx_b).await.unwrap();
        assert!(outcome_b.has_conflicts());
        assert_eq!(outcome_b.conflicting_tx_hashes, vec![tx_a.txid]);

        let state = store.state.lock().await;
        let obs_a = state.observations.get(&tx_a.txid).unwrap();
        assert_eq!(obs_a.replaced_by, Some(tx_b.txid));
        assert!(obs_a.double_spend_flag);
        let obs_b = state.observations.get(&tx_b.txid).unwrap();
        assert!(obs_b.double_spend_flag);
    }

    #[tokio::test]
    async fn confirm_transactions_is_idempotent() {
        let store = MemoryStore::new();
        let peer: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let tx = tx_spending([1u8; 32], 0, 0xCC);
        store.record_observation(tx.txid, peer).await.unwrap();
        store.record_transaction(&tx).await.unwrap();

        let block_hash = [7u8; 32];
        let block_time = Utc::now();
        store.confirm_transactions(block_hash, 100, block_time, &[tx.txid]).await.unwrap();
        store.confirm_transactions(block_hash, 999, block_time, &[tx.txid]).await.unwrap();

        let state = store.state.lock().await;
        let stored = state.transactions.get(&tx.txid).unwrap();
        assert_eq!(stored.height, Some(100));
        let obs = state.observations.get(&tx.txid).unwrap();
        assert_eq!(obs.confirming_block_hash, Some(block_hash));
    }

    #[tokio::test]
    async fn coinbase_input_never_triggers_conflict() {
        let store = MemoryStore::new();
        let tx = tx_spending([0u8; 32], 0xFFFF_FFFF, 0xDD);
        store.record_transaction(&tx).await.unwrap();
        let outcome = store.detect_input_conflicts(&tx).await.unwrap();
        assert!(!outcome.has_conflicts());
    }
}
