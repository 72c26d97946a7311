//! Frame-level wire format (§4.1): `magic(4) || command(12) || length(4) ||
//! checksum(4) || payload`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::SerializationError;

/// Length of the command field, NUL-padded ASCII.
pub const COMMAND_LEN: usize = 12;

/// Length of the fixed frame header (everything before the payload).
pub const HEADER_LEN: usize = 4 + COMMAND_LEN + 4 + 4;

/// A conservative cap on payload length the codec will accept before
/// allocating a receive buffer for it. The reference implementation accepts
/// any length that fits in memory; this is the "implementation-defined
/// safety limit" §4.1 requires callers to enforce.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// The decoded fixed-size portion of a frame, before the payload is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: [u8; COMMAND_LEN],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl FrameHeader {
    /// The command as a `&str`, with trailing NUL padding trimmed.
    pub fn command_str(&self) -> Result<&str, SerializationError> {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LEN);
        std::str::from_utf8(&self.command[..end]).map_err(|_| SerializationError::BadCommand)
    }

    /// Parses the fixed-size header out of exactly `HEADER_LEN` bytes.
    pub fn parse(bytes: &[u8], magic: u32) -> Result<FrameHeader, SerializationError> {
        if bytes.len() != HEADER_LEN {
            return Err(SerializationError::Parse("frame header has the wrong length"));
        }
        let mut cursor = bytes;
        let got_magic = cursor.read_u32::<LittleEndian>()?;
        if got_magic != magic {
            return Err(SerializationError::Parse("frame magic does not match the configured network"));
        }
        let mut command = [0u8; COMMAND_LEN];
        command.copy_from_slice(&cursor[..COMMAND_LEN]);
        cursor = &cursor[COMMAND_LEN..];
        let length = cursor.read_u32::<LittleEndian>()?;
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&cursor[..4]);

        Ok(FrameHeader {
            command,
            length,
            checksum,
        })
    }
}

/// The 4-byte checksum is the first 4 bytes of double-SHA-256 of the
/// payload (§3 invariant).
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let once = Sha256::digest(payload);
    let twice = Sha256::digest(once);
    let mut out = [0u8; 4];
    out.copy_from_slice(&twice[..4]);
    out
}

/// Encodes a full frame: header plus payload.
pub fn encode_frame(magic: u32, command: &str, payload: &[u8]) -> Result<Vec<u8>, SerializationError> {
    if command.len() > COMMAND_LEN {
        return Err(SerializationError::BadCommand);
    }
    if payload.len() > MAX_PROTOCOL_MESSAGE_LEN {
        return Err(SerializationError::PayloadTooLarge(payload.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.write_u32::<LittleEndian>(magic)?;
    let mut command_bytes = [0u8; COMMAND_LEN];
    command_bytes[..command.len()].copy_from_slice(command.as_bytes());
    out.extend_from_slice(&command_bytes);
    out.write_u32::<LittleEndian>(payload.len() as u32)?;
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    Ok(out)
}

/// Verifies a payload against a header's checksum, §3 invariant.
pub fn verify_checksum(header: &FrameHeader, payload: &[u8]) -> Result<(), SerializationError> {
    if checksum(payload) != header.checksum {
        return Err(SerializationError::BadChecksum);
    }
    Ok(())
}
