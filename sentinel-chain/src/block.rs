//! Block headers and whole-block parsing (§4.1).

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::SerializationError;
use crate::serialization::{ReadWireExt, WireDeserialize, WireSerialize, WriteWireExt};
use crate::transaction::Transaction;

/// Length of the fixed block header.
pub const BLOCK_HEADER_LEN: usize = 80;

/// The 80-byte block header, before transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub previous_block_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl WireSerialize for BlockHeader {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_i32::<LittleEndian>(self.version)?;
        writer.write_32_bytes(&self.previous_block_hash)?;
        writer.write_32_bytes(&self.merkle_root)?;
        writer.write_u32::<LittleEndian>(self.timestamp)?;
        writer.write_u32::<LittleEndian>(self.bits)?;
        writer.write_u32::<LittleEndian>(self.nonce)?;
        Ok(())
    }
}

impl WireDeserialize for BlockHeader {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockHeader {
            version: reader.read_i32::<LittleEndian>()?,
            previous_block_hash: reader.read_32_bytes()?,
            merkle_root: reader.read_32_bytes()?,
            timestamp: reader.read_u32::<LittleEndian>()?,
            bits: reader.read_u32::<LittleEndian>()?,
            nonce: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl BlockHeader {
    /// Double-SHA-256 of the 80-byte header serialization (§8 invariant 5).
    pub fn block_hash(&self) -> [u8; 32] {
        let bytes = self
            .wire_serialize_to_vec()
            .expect("writing to a Vec<u8> cannot fail");
        let once = Sha256::digest(&bytes);
        let twice = Sha256::digest(once);
        let mut out = [0u8; 32];
        out.copy_from_slice(&twice);
        out
    }

    /// Decodes the numeric difficulty from the compact `bits` field (§4.1):
    /// `exp = bits >> 24`, `coef = bits & 0x007fffff`,
    /// `difficulty = (0xFFFF / coef) * 2^(8 * (0x1d - exp))`. A zero
    /// coefficient yields a difficulty of zero.
    pub fn difficulty(&self) -> f64 {
        let exp = (self.bits >> 24) as i32;
        let coef = (self.bits & 0x007f_ffff) as f64;
        if coef == 0.0 {
            return 0.0;
        }
        let shift = 8 * (0x1d - exp);
        (0xFFFFu32 as f64 / coef) * 2f64.powi(shift)
    }
}

/// A fully-parsed block: header, derived hash, derived height, transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: [u8; 32],
    /// Height decoded from the coinbase transaction's signature-script
    /// prefix (§4.1, §8 invariant 6); 0 if the script is too short or its
    /// length byte is 0.
    pub height: u32,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Parses a whole block: 80-byte header, var-int transaction count,
    /// that many transactions (§4.1).
    pub fn parse<R: Read>(mut reader: R) -> Result<Block, SerializationError> {
        let mut header_bytes = [0u8; BLOCK_HEADER_LEN];
        reader.read_exact(&mut header_bytes)?;
        let header = BlockHeader::wire_deserialize(&header_bytes[..])?;
        let hash = header.block_hash();

        let tx_count = reader.read_compactsize()?;
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::parse(&mut reader)?);
        }

        let height = transactions
            .first()
            .map(|coinbase| coinbase_height(coinbase))
            .unwrap_or(0);

        Ok(Block {
            header,
            hash,
            height,
            transactions,
        })
    }
}

/// Parses a block from an in-memory buffer.
pub fn parse_block_from_slice(buf: &[u8]) -> Result<Block, SerializationError> {
    Block::parse(Cursor::new(buf))
}

/// Decodes the coinbase height-encoding convention (§4.1, §8 invariant 6):
/// the first input's signature script begins with a length byte *N* (1..8),
/// followed by *N* little-endian bytes read as the height. A length byte of
/// 0, or a script shorter than `N + 1` bytes, yields height 0.
fn coinbase_height(coinbase: &Transaction) -> u32 {
    let script = match coinbase.inputs.first() {
        Some(input) => &input.signature_script,
        None => return 0,
    };
    let n = match script.first() {
        Some(&n) if n > 0 => n as usize,
        _ => return 0,
    };
    if script.len() < n + 1 {
        return 0;
    }
    let mut value: i64 = 0;
    for (i, &byte) in script[1..1 + n].iter().enumerate() {
        value |= (byte as i64) << (8 * i);
    }
    value.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{WriteWireExt as _};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 4,
            previous_block_hash: [0xAA; 32],
            merkle_root: [0xBB; 32],
            timestamp: 1_700_000_000,
            bits: 0x1d00_ffff,
            nonce: 42,
        }
    }

    #[test]
    fn header_roundtrip_is_exactly_80_bytes() {
        let header = sample_header();
        let bytes = header.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), BLOCK_HEADER_LEN);
        let decoded = BlockHeader::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn difficulty_of_max_target_bits_is_one() {
        let header = sample_header();
        assert!((header.difficulty() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn difficulty_is_zero_for_zero_coefficient() {
        let mut header = sample_header();
        header.bits = 0x1d00_0000;
        assert_eq!(header.difficulty(), 0.0);
    }

    fn coinbase_tx_with_script(script: Vec<u8>) -> Transaction {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(1).unwrap();
        buf.write_compactsize(1).unwrap();
        buf.extend_from_slice(&[0u8; 32]);
        buf.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        buf.write_var_bytes(&script).unwrap();
        buf.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        buf.write_compactsize(1).unwrap();
        buf.write_i64::<LittleEndian>(5_000_000_000).unwrap();
        buf.write_var_bytes(&[0x51]).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        Transaction::parse(&buf[..]).unwrap()
    }

    #[test]
    fn extracts_height_from_coinbase_script() {
        // length byte 3, then height 500000 (0x07A120) little-endian.
        let tx = coinbase_tx_with_script(vec![0x03, 0x20, 0xA1, 0x07, 0x0D]);
        assert_eq!(coinbase_height(&tx), 500_000);
    }

    #[test]
    fn zero_length_byte_yields_height_zero() {
        let tx = coinbase_tx_with_script(vec![0x00, 0xFF]);
        assert_eq!(coinbase_height(&tx), 0);
    }

    #[test]
    fn script_shorter_than_declared_length_yields_height_zero() {
        let tx = coinbase_tx_with_script(vec![0x04, 0x01, 0x02]);
        assert_eq!(coinbase_height(&tx), 0);
    }

    #[test]
    fn block_roundtrip_derives_hash_and_height() {
        let header = sample_header();
        let coinbase_script = vec![0x02, 0x64, 0x00]; // height 100
        let mut buf = Vec::new();
        header.wire_serialize(&mut buf).unwrap();
        buf.write_compactsize(1).unwrap();

        let mut tx_buf = Vec::new();
        tx_buf.write_i32::<LittleEndian>(1).unwrap();
        tx_buf.write_compactsize(1).unwrap();
        tx_buf.extend_from_slice(&[0u8; 32]);
        tx_buf.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        tx_buf.write_var_bytes(&coinbase_script).unwrap();
        tx_buf.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
        tx_buf.write_compactsize(1).unwrap();
        tx_buf.write_i64::<LittleEndian>(5_000_000_000).unwrap();
        tx_buf.write_var_bytes(&[0x51]).unwrap();
        tx_buf.write_u32::<LittleEndian>(0).unwrap();
        buf.extend_from_slice(&tx_buf);

        let block = parse_block_from_slice(&buf).unwrap();
        assert_eq!(block.hash, header.block_hash());
        assert_eq!(block.height, 100);
        assert_eq!(block.transactions.len(), 1);
    }
}
