//! Inventory vectors (§4.1): a typed hash used by `inv`/`getdata` messages.
//!
//! Adapted from the teacher's `protocol/external/inv.rs`: same `(u32 kind,
//! 32-byte hash)` wire shape and `TrustedPreallocate` sizing, trimmed to the
//! spec's two recognized kinds.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::SerializationError;
use crate::serialization::{ReadWireExt, TrustedPreallocate, WireDeserialize, WireSerialize};
use crate::types::InventoryKind;

/// A pair (kind, 32-byte hash) as carried in `inv`/`getdata` messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InventoryVector {
    pub kind: InventoryKind,
    pub hash: [u8; 32],
}

impl InventoryVector {
    pub fn transaction(hash: [u8; 32]) -> InventoryVector {
        InventoryVector {
            kind: InventoryKind::Transaction,
            hash,
        }
    }

    pub fn block(hash: [u8; 32]) -> InventoryVector {
        InventoryVector {
            kind: InventoryKind::Block,
            hash,
        }
    }
}

impl WireSerialize for InventoryVector {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u32::<LittleEndian>(self.kind.to_code())?;
        writer.write_all(&self.hash)
    }
}

impl WireDeserialize for InventoryVector {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = reader.read_u32::<LittleEndian>()?;
        let hash = reader.read_32_bytes()?;
        Ok(InventoryVector {
            kind: InventoryKind::from_code(code),
            hash,
        })
    }
}

/// Wire size of one inventory vector: 4-byte kind + 32-byte hash.
pub const INVENTORY_VECTOR_SIZE: usize = 36;

impl TrustedPreallocate for InventoryVector {
    fn max_allocation() -> u64 {
        ((crate::frame::MAX_PROTOCOL_MESSAGE_LEN - 1) / INVENTORY_VECTOR_SIZE) as u64
    }
}

/// Reads a var-int-prefixed list of inventory vectors, as carried by both
/// `inv` and `getdata` messages.
pub fn read_inventory_list<R: Read>(
    mut reader: R,
) -> Result<Vec<InventoryVector>, SerializationError> {
    let count = reader.read_compactsize_bounded::<InventoryVector>()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(InventoryVector::wire_deserialize(&mut reader)?);
    }
    Ok(out)
}

/// Writes a var-int-prefixed list of inventory vectors.
pub fn write_inventory_list<W: Write>(
    mut writer: W,
    items: &[InventoryVector],
) -> Result<(), std::io::Error> {
    use crate::serialization::WriteWireExt;
    writer.write_compactsize(items.len() as u64)?;
    for item in items {
        item.wire_serialize(&mut writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_list_roundtrip() {
        let items = vec![
            InventoryVector::transaction([1u8; 32]),
            InventoryVector::block([2u8; 32]),
        ];
        let mut buf = Vec::new();
        write_inventory_list(&mut buf, &items).unwrap();
        let decoded = read_inventory_list(&buf[..]).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn unknown_kind_is_recognized_but_preserved() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(99).unwrap();
        buf.extend_from_slice(&[7u8; 32]);
        let decoded = InventoryVector::wire_deserialize(&buf[..]).unwrap();
        assert_eq!(decoded.kind, InventoryKind::Other(99));
    }
}
