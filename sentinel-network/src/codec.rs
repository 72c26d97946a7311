//! Frame-level `tokio_util::codec::{Decoder, Encoder}` (§4.1), the
//! idiomatic `tokio-util` pattern the teacher depends on (`zebra-network`'s
//! `tokio-util = { features = ["codec"] }`). This codec only frames raw
//! `(command, payload)` pairs; [`crate::message`] layers typed messages on
//! top.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sentinel_chain::{checksum, verify_checksum, FrameHeader, SerializationError, COMMAND_LEN, HEADER_LEN, MAX_PROTOCOL_MESSAGE_LEN};
use tokio_util::codec::{Decoder, Encoder};

/// One decoded frame: its command string and raw payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub command: String,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> RawFrame {
        RawFrame {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

/// A `Decoder`/`Encoder` for the magic/command/length/checksum framing
/// (§4.1). Decoding is two-phase, following `tokio_util`'s documented
/// length-delimited pattern: wait for a full header, inspect the length, then
/// wait for that many payload bytes before emitting one frame.
pub struct FrameCodec {
    magic: u32,
    header: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new(magic: u32) -> FrameCodec {
        FrameCodec { magic, header: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>, FrameCodecError> {
        let header = match self.header {
            Some(header) => header,
            None => {
                if src.len() < HEADER_LEN {
                    src.reserve(HEADER_LEN - src.len());
                    return Ok(None);
                }
                let header_bytes = src.split_to(HEADER_LEN);
                let header = FrameHeader::parse(&header_bytes, self.magic)?;
                if header.length as usize > MAX_PROTOCOL_MESSAGE_LEN {
                    return Err(SerializationError::PayloadTooLarge(header.length as usize).into());
                }
                self.header = Some(header);
                header
            }
        };

        if src.len() < header.length as usize {
            src.reserve(header.length as usize - src.len());
            return Ok(None);
        }

        let payload = src.split_to(header.length as usize).freeze();
        verify_checksum(&header, &payload)?;
        self.header = None;

        let command = header.command_str()?.to_string();
        Ok(Some(RawFrame { command, payload }))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<(), FrameCodecError> {
        if frame.command.len() > COMMAND_LEN {
            return Err(SerializationError::BadCommand.into());
        }
        if frame.payload.len() > MAX_PROTOCOL_MESSAGE_LEN {
            return Err(SerializationError::PayloadTooLarge(frame.payload.len()).into());
        }

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u32_le(self.magic);
        let mut command_bytes = [0u8; COMMAND_LEN];
        command_bytes[..frame.command.len()].copy_from_slice(frame.command.as_bytes());
        dst.put_slice(&command_bytes);
        dst.put_u32_le(frame.payload.len() as u32);
        dst.put_slice(&checksum(&frame.payload));
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAGIC: u32 = 0xD9B4_BEF9;

    #[test]
    fn encodes_then_decodes_one_frame() {
        let mut codec = FrameCodec::new(TEST_MAGIC);
        let mut buf = BytesMut::new();
        let frame = RawFrame::new("verack", Bytes::new());
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_a_complete_header_then_payload() {
        let mut codec = FrameCodec::new(TEST_MAGIC);
        let mut buf = BytesMut::new();
        let frame = RawFrame::new("ping", Bytes::from_static(b"12345678"));
        codec.encode(frame.clone(), &mut buf).unwrap();

        // Feed one byte at a time; only the final byte should yield a frame.
        let all = buf.split().to_vec();
        let mut feed = BytesMut::new();
        let mut result = None;
        for byte in all {
            feed.put_u8(byte);
            result = codec.decode(&mut feed).unwrap();
            if result.is_some() {
                break;
            }
        }
        assert_eq!(result, Some(frame));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut codec = FrameCodec::new(TEST_MAGIC);
        let mut buf = BytesMut::new();
        codec
            .encode(RawFrame::new("tx", Bytes::from_static(b"abc")), &mut buf)
            .unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(codec.decode(&mut buf).is_err());
    }
}
