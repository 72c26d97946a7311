//! Serialization traits and the var-int ("compact size") encoding, in the
//! shape of `zebra_chain::serialization`: extension traits on `Read`/`Write`
//! plus a pair of `WireSerialize`/`WireDeserialize` traits that types
//! implement directly.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::SerializationError;

/// A type that can serialize itself into the wire format.
pub trait WireSerialize {
    fn wire_serialize<W: Write>(&self, writer: W) -> Result<(), io::Error>;

    fn wire_serialize_to_vec(&self) -> Result<Vec<u8>, io::Error> {
        let mut buf = Vec::new();
        self.wire_serialize(&mut buf)?;
        Ok(buf)
    }
}

/// A type that can deserialize itself from the wire format.
pub trait WireDeserialize: Sized {
    fn wire_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError>;
}

/// Convenience for `bytes.wire_deserialize_into::<T>()`.
pub trait WireDeserializeInto {
    fn wire_deserialize_into<T: WireDeserialize>(&self) -> Result<T, SerializationError>;
}

impl<A: AsRef<[u8]>> WireDeserializeInto for A {
    fn wire_deserialize_into<T: WireDeserialize>(&self) -> Result<T, SerializationError> {
        T::wire_deserialize(self.as_ref())
    }
}

/// Types that bound the maximum number of elements a length-prefixed
/// collection may preallocate during decode, so an attacker-controlled count
/// field can't drive an unbounded allocation before the bytes themselves
/// have even been checked to exist.
pub trait TrustedPreallocate {
    fn max_allocation() -> u64;
}

/// The maximum size of a single protocol frame's payload.
///
/// Reference implementations reject anything above this; see
/// [`crate::frame::MAX_PROTOCOL_MESSAGE_LEN`].
pub use crate::frame::MAX_PROTOCOL_MESSAGE_LEN;

/// Read/write helpers mirroring `ReadZcashExt`/`WriteZcashExt`: var-ints,
/// fixed-size hashes, and the network's socket-address encoding.
pub trait ReadWireExt: Read {
    /// Reads a var-int ("CompactSize"): §4.1.
    ///
    /// `<0xFD`: that byte. `0xFD`: next 2 LE bytes. `0xFE`: next 4 LE bytes.
    /// `0xFF`: next 8 LE bytes. Non-minimal encodings are accepted.
    fn read_compactsize(&mut self) -> Result<u64, SerializationError> {
        let first = self.read_u8()?;
        let value = match first {
            0xFF => self.read_u64::<LittleEndian>()?,
            0xFE => self.read_u32::<LittleEndian>()? as u64,
            0xFD => self.read_u16::<LittleEndian>()? as u64,
            _ => first as u64,
        };
        Ok(value)
    }

    /// Reads a var-int and bounds it against `T::max_allocation`, for use as
    /// a preallocation hint before reading that many `T`s.
    fn read_compactsize_bounded<T: TrustedPreallocate>(
        &mut self,
    ) -> Result<u64, SerializationError> {
        let count = self.read_compactsize()?;
        if count > T::max_allocation() {
            return Err(SerializationError::Parse(
                "compactsize count exceeds max_allocation for this type",
            ));
        }
        Ok(count)
    }

    /// Reads a var-int-prefixed byte string (a Bitcoin "var_str"/script).
    fn read_var_bytes(&mut self) -> Result<Vec<u8>, SerializationError> {
        let len = self.read_compactsize()?;
        if len > MAX_PROTOCOL_MESSAGE_LEN as u64 {
            return Err(SerializationError::Parse(
                "var_bytes length exceeds the maximum protocol message length",
            ));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a var-int-prefixed UTF-8 string (user-agent fields).
    fn read_var_string(&mut self) -> Result<String, SerializationError> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes)
            .map_err(|_| SerializationError::Parse("var_string was not valid UTF-8"))
    }

    /// Reads a fixed 32-byte hash.
    fn read_32_bytes(&mut self) -> Result<[u8; 32], SerializationError> {
        let mut bytes = [0u8; 32];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads the 16-byte address portion of a network address, returning an
    /// `IpAddr` — IPv4-mapped addresses (`::ffff:a.b.c.d`) collapse to
    /// `IpAddr::V4`, everything else is `IpAddr::V6`, per §4.1.
    fn read_ip_addr(&mut self) -> Result<IpAddr, SerializationError> {
        let mut bytes = [0u8; 16];
        self.read_exact(&mut bytes)?;
        Ok(ip_from_16_bytes(bytes))
    }

    /// Reads a (16-byte address, 2-byte big-endian port) pair.
    fn read_socket_addr(&mut self) -> Result<SocketAddr, SerializationError> {
        let ip = self.read_ip_addr()?;
        let port = self.read_u16::<BigEndian>()?;
        Ok(SocketAddr::new(ip, port))
    }
}

impl<R: Read + ?Sized> ReadWireExt for R {}

pub trait WriteWireExt: Write {
    /// Writes a var-int using the shortest encoding that fits.
    fn write_compactsize(&mut self, value: u64) -> Result<(), io::Error> {
        if value < 0xFD {
            self.write_u8(value as u8)
        } else if value <= 0xFFFF {
            self.write_u8(0xFD)?;
            self.write_u16::<LittleEndian>(value as u16)
        } else if value <= 0xFFFF_FFFF {
            self.write_u8(0xFE)?;
            self.write_u32::<LittleEndian>(value as u32)
        } else {
            self.write_u8(0xFF)?;
            self.write_u64::<LittleEndian>(value)
        }
    }

    fn write_var_bytes(&mut self, bytes: &[u8]) -> Result<(), io::Error> {
        self.write_compactsize(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    fn write_var_string(&mut self, s: &str) -> Result<(), io::Error> {
        self.write_var_bytes(s.as_bytes())
    }

    fn write_32_bytes(&mut self, bytes: &[u8; 32]) -> Result<(), io::Error> {
        self.write_all(bytes)
    }

    fn write_ip_addr(&mut self, addr: IpAddr) -> Result<(), io::Error> {
        self.write_all(&ip_to_16_bytes(addr))
    }

    fn write_socket_addr(&mut self, addr: SocketAddr) -> Result<(), io::Error> {
        self.write_ip_addr(addr.ip())?;
        self.write_u16::<BigEndian>(addr.port())
    }
}

impl<W: Write + ?Sized> WriteWireExt for W {}

/// An address is IPv4 iff bytes 0..10 are zero and bytes 10..12 are
/// `0xff, 0xff` — the IPv4-mapped IPv6 form used on the wire, §4.1.
fn ip_from_16_bytes(bytes: [u8; 16]) -> IpAddr {
    let is_v4_mapped = bytes[0..10].iter().all(|&b| b == 0) && bytes[10] == 0xff && bytes[11] == 0xff;
    if is_v4_mapped {
        IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]))
    } else {
        IpAddr::V6(Ipv6Addr::from(bytes))
    }
}

fn ip_to_16_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => {
            let mut bytes = [0u8; 16];
            bytes[10] = 0xff;
            bytes[11] = 0xff;
            bytes[12..16].copy_from_slice(&v4.octets());
            bytes
        }
        IpAddr::V6(v6) => v6.octets(),
    }
}
