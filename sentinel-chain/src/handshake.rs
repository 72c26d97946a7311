//! Handshake messages (§4.1): `version` and `verack`.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::SerializationError;
use crate::network_address::NetworkAddress;
use crate::serialization::{ReadWireExt, WireDeserialize, WireSerialize, WriteWireExt};
use crate::types::PeerServices;

/// The protocol version at and above which a `version` message carries a
/// trailing relay-flag byte.
pub const RELAY_FLAG_MIN_VERSION: i32 = 70001;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: PeerServices,
    pub timestamp: DateTime<Utc>,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    /// Present (and meaningful) only when `version >= RELAY_FLAG_MIN_VERSION`.
    pub relay: Option<bool>,
}

impl WireSerialize for VersionMessage {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_i32::<LittleEndian>(self.version)?;
        writer.write_u64::<LittleEndian>(self.services.bits())?;
        writer.write_i64::<LittleEndian>(self.timestamp.timestamp())?;
        self.addr_recv.wire_serialize(&mut writer)?;
        self.addr_from.wire_serialize(&mut writer)?;
        writer.write_u64::<LittleEndian>(self.nonce)?;
        writer.write_var_string(&self.user_agent)?;
        writer.write_i32::<LittleEndian>(self.start_height)?;
        if self.version >= RELAY_FLAG_MIN_VERSION {
            writer.write_u8(self.relay.unwrap_or(true) as u8)?;
        }
        Ok(())
    }
}

impl WireDeserialize for VersionMessage {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = reader.read_i32::<LittleEndian>()?;
        let services = PeerServices::from_bits_truncate(reader.read_u64::<LittleEndian>()?);
        let ts = reader.read_i64::<LittleEndian>()?;
        let timestamp = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or(SerializationError::Parse("version timestamp out of range"))?;
        let addr_recv = NetworkAddress::wire_deserialize(&mut reader)?;
        let addr_from = NetworkAddress::wire_deserialize(&mut reader)?;
        let nonce = reader.read_u64::<LittleEndian>()?;
        let user_agent = reader.read_var_string()?;
        let start_height = reader.read_i32::<LittleEndian>()?;

        let relay = if version >= RELAY_FLAG_MIN_VERSION {
            let mut byte = [0u8; 1];
            match reader.read(&mut byte)? {
                0 => None,
                _ => Some(byte[0] != 0),
            }
        } else {
            None
        };

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// The `verack` message: empty payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerackMessage;

impl WireSerialize for VerackMessage {
    fn wire_serialize<W: Write>(&self, _writer: W) -> Result<(), std::io::Error> {
        Ok(())
    }
}

impl WireDeserialize for VerackMessage {
    fn wire_deserialize<R: Read>(_reader: R) -> Result<Self, SerializationError> {
        Ok(VerackMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NetworkAddress {
        NetworkAddress {
            services: PeerServices::NETWORK,
            addr: format!("127.0.0.1:{port}").parse().unwrap(),
        }
    }

    #[test]
    fn version_message_roundtrip_with_relay_flag() {
        let msg = VersionMessage {
            version: 70015,
            services: PeerServices::NETWORK,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            addr_recv: addr(8333),
            addr_from: addr(8334),
            nonce: 0xDEAD_BEEF_0000_0001,
            user_agent: "/sentinel:0.1/".to_string(),
            start_height: 0,
            relay: Some(true),
        };
        let bytes = msg.wire_serialize_to_vec().unwrap();
        let decoded = VersionMessage::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn version_message_without_relay_flag_below_threshold() {
        let msg = VersionMessage {
            version: 60001,
            services: PeerServices::NETWORK,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            addr_recv: addr(8333),
            addr_from: addr(8334),
            nonce: 1,
            user_agent: "/old:1/".to_string(),
            start_height: 100,
            relay: None,
        };
        let bytes = msg.wire_serialize_to_vec().unwrap();
        // No trailing relay byte was written.
        let decoded = VersionMessage::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded.relay, None);
    }

    #[test]
    fn verack_is_empty() {
        let bytes = VerackMessage.wire_serialize_to_vec().unwrap();
        assert!(bytes.is_empty());
    }
}
