//! Wire-protocol codec for a Bitcoin-like gossip network: framing, var-ints,
//! network addresses, handshake messages, inventory vectors, transactions
//! (including the segregated-witness extension), and blocks.
//!
//! This crate is pure data and `std::io` — no networking, no async. It
//! mirrors `zebra-chain`'s shape: small modules, one wire type per file,
//! `#[cfg(test)]` unit tests alongside each.

pub mod block;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod inventory;
pub mod network_address;
pub mod ping;
pub mod script;
pub mod serialization;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader};
pub use error::SerializationError;
pub use frame::{checksum, encode_frame, verify_checksum, FrameHeader, COMMAND_LEN, HEADER_LEN, MAX_PROTOCOL_MESSAGE_LEN};
pub use handshake::{VerackMessage, VersionMessage};
pub use inventory::{read_inventory_list, write_inventory_list, InventoryVector};
pub use network_address::{GossipedAddress, NetworkAddress};
pub use ping::{PingMessage, PongMessage};
pub use script::extract_address;
pub use serialization::{
    ReadWireExt, TrustedPreallocate, WireDeserialize, WireDeserializeInto, WireSerialize, WriteWireExt,
};
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};
pub use types::{InventoryKind, PeerServices};
