//! The persistence interface the observer core writes through (§4.2), plus
//! a Postgres-backed implementation and an in-memory one for tests.
//!
//! This crate has no teacher counterpart — the teacher's own state crate
//! (`zebra-state`) is an embedded key-value chain-state store, not a
//! relational-DB client, and this system needs the latter (§6). The shape
//! (a narrow trait the core depends on, concrete backends behind it) is
//! nonetheless the same "narrow async contract" idea the teacher expresses
//! via `tower::Buffer`-wrapped `Service`s in front of `zebra-state`.

pub mod error;
pub mod persistence;
#[cfg(feature = "test-support")]
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod types;

pub use error::StoreError;
pub use persistence::Persistence;
#[cfg(feature = "test-support")]
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use types::{
    ConflictOutcome, GeoInfo, MetricTotals, Observation, ObservationOutcome, PeerVersionInfo, PropagationEvent,
};
