//! The geo-diverse peer-pool manager (C4, §4.4). Adapted from the teacher's
//! `candidate_set.rs`: the same "one lock, short critical sections, never
//! held across an await" discipline, but organized around fixed region
//! buckets instead of a `tower::Service`-fronted `AddressBook` — this pool
//! has no load-balanced `Service` to front, just per-region candidate lists
//! the supervisor polls (see DESIGN.md for the dropped-`tower` rationale).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use sentinel_store::GeoInfo;

use crate::constants::{DISCONNECT_STRIKE_WINDOW, FAILURE_BACKOFF_WINDOW, STRIKE_THRESHOLD};

pub type Region = String;

/// A candidate's network address plus the geolocation record discovery
/// attached to it (glossary: "Created by discovery; mutated only by its
/// owning session").
#[derive(Clone, Debug)]
pub struct PeerEndpoint {
    pub addr: SocketAddr,
    pub geo: GeoInfo,
}

struct State {
    /// Per-region ordered candidate lists (§4.4). `IndexSet` preserves
    /// discovery's insertion order — `next_for_region` walks it in that
    /// order — while still giving O(1) membership checks.
    candidates: HashMap<Region, IndexSet<SocketAddr>>,
    geo_by_addr: HashMap<SocketAddr, GeoInfo>,
    active: HashMap<Region, HashSet<SocketAddr>>,
    last_failure: HashMap<SocketAddr, Instant>,
    last_disconnect: HashMap<SocketAddr, Instant>,
    strikes: HashMap<SocketAddr, u32>,
    blacklist: HashSet<SocketAddr>,
}

impl State {
    fn new() -> State {
        State {
            candidates: HashMap::new(),
            geo_by_addr: HashMap::new(),
            active: HashMap::new(),
            last_failure: HashMap::new(),
            last_disconnect: HashMap::new(),
            strikes: HashMap::new(),
            blacklist: HashSet::new(),
        }
    }
}

/// The pool owns the candidate list and all bookkeeping maps (§3 ownership).
/// One instance is shared (as an `Arc`) across the supervisor and every
/// session task.
pub struct Pool {
    state: Mutex<State>,
    failure_backoff: Duration,
    disconnect_window: Duration,
    strike_threshold: u32,
}

impl Pool {
    pub fn new() -> Pool {
        Pool::with_policy(FAILURE_BACKOFF_WINDOW, DISCONNECT_STRIKE_WINDOW, STRIKE_THRESHOLD)
    }

    pub fn with_policy(failure_backoff: Duration, disconnect_window: Duration, strike_threshold: u32) -> Pool {
        Pool {
            state: Mutex::new(State::new()),
            failure_backoff,
            disconnect_window,
            strike_threshold,
        }
    }

    /// Replaces the candidate list for `region` (§4.5 step 4: discovery
    /// calls this once per populated region each cycle).
    pub fn set_candidates(&self, region: &str, candidates: Vec<PeerEndpoint>) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let mut addrs = IndexSet::with_capacity(candidates.len());
        for candidate in candidates {
            addrs.insert(candidate.addr);
            state.geo_by_addr.insert(candidate.addr, candidate.geo);
        }
        state.candidates.insert(region.to_string(), addrs);
    }

    /// Returns the first candidate in `region` that is not blacklisted, not
    /// currently active, and whose last failure is outside the backoff
    /// window — or `None` if nothing qualifies (§4.4, §8 invariant 8).
    ///
    /// CORRECTNESS: this critical section only reads maps and does
    /// constant-time lookups; it never awaits and never acquires another
    /// lock, so it can't deadlock against a session holding this same lock.
    pub fn next_for_region(&self, region: &str) -> Option<PeerEndpoint> {
        let state = self.state.lock().expect("pool mutex poisoned");
        let candidates = state.candidates.get(region)?;
        let active = state.active.get(region);
        let now = Instant::now();

        let addr = candidates
            .iter()
            .find(|addr| {
                if state.blacklist.contains(*addr) {
                    return false;
                }
                if active.is_some_and(|set| set.contains(*addr)) {
                    return false;
                }
                match state.last_failure.get(*addr) {
                    Some(failed_at) => now.duration_since(*failed_at) >= self.failure_backoff,
                    None => true,
                }
            })
            .copied()?;
        let geo = state.geo_by_addr.get(&addr).cloned()?;
        Some(PeerEndpoint { addr, geo })
    }

    /// Marks `addr` as failed (dial or handshake failure, §4.6).
    pub fn mark_failed(&self, addr: SocketAddr) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.last_failure.insert(addr, Instant::now());
    }

    /// Records a disconnect and applies the strike/blacklist policy (§4.4,
    /// §8 invariant 9). Returns `true` if this disconnect caused `addr` to
    /// be blacklisted.
    pub fn mark_disconnect(&self, addr: SocketAddr) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("pool mutex poisoned");

        let within_window = state
            .last_disconnect
            .get(&addr)
            .is_some_and(|previous| now.duration_since(*previous) < self.disconnect_window);

        let strikes = state.strikes.entry(addr).or_insert(0);
        if within_window {
            *strikes += 1;
        } else {
            *strikes = 1;
        }
        let blacklisted = *strikes >= self.strike_threshold;
        if blacklisted {
            state.blacklist.insert(addr);
        }

        state.last_disconnect.insert(addr, now);
        state.last_failure.insert(addr, now);
        blacklisted
    }

    pub fn set_active(&self, region: &str, addr: SocketAddr) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.active.entry(region.to_string()).or_default().insert(addr);
    }

    pub fn remove_active(&self, region: &str, addr: SocketAddr) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        if let Some(set) = state.active.get_mut(region) {
            set.remove(&addr);
        }
    }

    pub fn active_count(&self, region: &str) -> usize {
        let state = self.state.lock().expect("pool mutex poisoned");
        state.active.get(region).map(|set| set.len()).unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        let state = self.state.lock().expect("pool mutex poisoned");
        state.active.values().map(|set| set.len()).sum()
    }

    pub fn regions(&self) -> Vec<Region> {
        let state = self.state.lock().expect("pool mutex poisoned");
        state.candidates.keys().cloned().collect()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn endpoint(port: u16) -> PeerEndpoint {
        PeerEndpoint {
            addr: addr(port),
            geo: GeoInfo {
                country_code: "US".to_string(),
                city: None,
                latitude: 0.0,
                longitude: 0.0,
                asn: None,
                organization: None,
            },
        }
    }

    #[test]
    fn next_for_region_skips_active_and_blacklisted() {
        let pool = Pool::new();
        pool.set_candidates("US", vec![endpoint(1), endpoint(2), endpoint(3)]);
        pool.set_active("US", addr(1));

        // Blacklist addr(2) via two quick disconnects.
        pool.mark_disconnect(addr(2));
        assert!(pool.mark_disconnect(addr(2)));

        assert_eq!(pool.next_for_region("US").map(|e| e.addr), Some(addr(3)));
    }

    #[test]
    fn next_for_region_respects_failure_backoff() {
        let pool = Pool::with_policy(Duration::from_secs(300), Duration::from_secs(120), 2);
        pool.set_candidates("DE", vec![endpoint(10)]);
        pool.mark_failed(addr(10));
        assert!(pool.next_for_region("DE").is_none());
    }

    #[test]
    fn next_for_region_returns_none_for_unknown_region() {
        let pool = Pool::new();
        assert!(pool.next_for_region("ZZ").is_none());
    }

    #[test]
    fn strikes_reset_when_disconnects_are_far_apart() {
        let pool = Pool::with_policy(Duration::from_secs(300), Duration::from_millis(1), 2);
        pool.set_candidates("FR", vec![endpoint(20)]);
        assert!(!pool.mark_disconnect(addr(20)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!pool.mark_disconnect(addr(20)));
    }

    #[test]
    fn active_accounting_tracks_per_region_and_total() {
        let pool = Pool::new();
        pool.set_active("US", addr(1));
        pool.set_active("DE", addr(2));
        assert_eq!(pool.active_count("US"), 1);
        assert_eq!(pool.total_active(), 2);
        pool.remove_active("US", addr(1));
        assert_eq!(pool.active_count("US"), 0);
        assert_eq!(pool.total_active(), 1);
    }
}
