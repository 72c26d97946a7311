//! Small wire-level value types shared across messages.

use bitflags::bitflags;

bitflags! {
    /// Services advertised in a peer's `version` message.
    ///
    /// Only `NETWORK` is meaningful to an observer (it never requests
    /// pruned-only data), but the full bitmask is preserved verbatim so it
    /// can be recorded and displayed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PeerServices: u64 {
        const NETWORK = 1 << 0;
        const GETUTXO = 1 << 1;
        const BLOOM = 1 << 2;
        const WITNESS = 1 << 3;
        const COMPACT_FILTERS = 1 << 6;
        const NETWORK_LIMITED = 1 << 10;
    }
}

/// The kind of object an inventory vector refers to (§4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InventoryKind {
    Transaction,
    Block,
    /// Any other kind code: recognized but ignored by the core.
    Other(u32),
}

impl InventoryKind {
    pub fn from_code(code: u32) -> InventoryKind {
        match code {
            1 => InventoryKind::Transaction,
            2 => InventoryKind::Block,
            other => InventoryKind::Other(other),
        }
    }

    pub fn to_code(self) -> u32 {
        match self {
            InventoryKind::Transaction => 1,
            InventoryKind::Block => 2,
            InventoryKind::Other(code) => code,
        }
    }
}
