//! Network address encoding (§4.1): 26 bytes inside a `version` message, 30
//! bytes (with a leading timestamp) inside an `addr` message.

use std::io::{Read, Write};
use std::net::SocketAddr;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::SerializationError;
use crate::serialization::{ReadWireExt, WireDeserialize, WireSerialize, WriteWireExt};
use crate::types::PeerServices;

/// The address as it appears inside a `version` message's `addr_recv`/
/// `addr_from` fields: no timestamp, 26 bytes total.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: PeerServices,
    pub addr: SocketAddr,
}

impl WireSerialize for NetworkAddress {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u64::<LittleEndian>(self.services.bits())?;
        writer.write_socket_addr(self.addr)?;
        Ok(())
    }
}

impl WireDeserialize for NetworkAddress {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let services = PeerServices::from_bits_truncate(reader.read_u64::<LittleEndian>()?);
        let addr = reader.read_socket_addr()?;
        Ok(NetworkAddress { services, addr })
    }
}

/// The gossiped form carried inside an `addr` message: a leading 4-byte
/// epoch timestamp in front of the same 26-byte body, 30 bytes total.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GossipedAddress {
    pub last_seen: DateTime<Utc>,
    pub address: NetworkAddress,
}

impl WireSerialize for GossipedAddress {
    fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u32::<LittleEndian>(self.last_seen.timestamp() as u32)?;
        self.address.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for GossipedAddress {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let ts = reader.read_u32::<LittleEndian>()?;
        let last_seen = Utc
            .timestamp_opt(ts as i64, 0)
            .single()
            .ok_or(SerializationError::Parse("gossiped address timestamp out of range"))?;
        let address = NetworkAddress::wire_deserialize(&mut reader)?;
        Ok(GossipedAddress { last_seen, address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_address_roundtrip() {
        let addr = NetworkAddress {
            services: PeerServices::NETWORK,
            addr: "203.0.113.7:8333".parse().unwrap(),
        };
        let bytes = addr.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), 26);
        let decoded = NetworkAddress::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn gossiped_address_roundtrip() {
        let gossiped = GossipedAddress {
            last_seen: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            address: NetworkAddress {
                services: PeerServices::NETWORK,
                addr: "198.51.100.20:8333".parse().unwrap(),
            },
        };
        let bytes = gossiped.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), 30);
        let decoded = GossipedAddress::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded, gossiped);
    }
}
