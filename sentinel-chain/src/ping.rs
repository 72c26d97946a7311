//! `ping`/`pong` payloads: an 8-byte nonce, echoed back by the peer.

use std::io::{Read, Write};

use crate::error::SerializationError;
use crate::serialization::{WireDeserialize, WireSerialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PingMessage {
    pub nonce: [u8; 8],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PongMessage {
    pub nonce: [u8; 8],
}

impl WireSerialize for PingMessage {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_all(&self.nonce)
    }
}

impl WireDeserialize for PingMessage {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut nonce = [0u8; 8];
        reader.read_exact(&mut nonce)?;
        Ok(PingMessage { nonce })
    }
}

impl WireSerialize for PongMessage {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_all(&self.nonce)
    }
}

impl WireDeserialize for PongMessage {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut nonce = [0u8; 8];
        reader.read_exact(&mut nonce)?;
        Ok(PongMessage { nonce })
    }
}
