//! The typed `Message` enum (§4.1/§4.6): every command the session's active
//! loop dispatches on, layered over [`crate::codec::RawFrame`].

use bytes::Bytes;
use sentinel_chain::{
    read_inventory_list, write_inventory_list, Block, InventoryVector, PingMessage, PongMessage, Transaction,
    VerackMessage, VersionMessage, WireDeserialize, WireSerialize,
};

use crate::codec::RawFrame;

#[derive(Clone, Debug)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Inv(Vec<InventoryVector>),
    GetData(Vec<InventoryVector>),
    Tx(Transaction),
    Block(Block),
    Ping(PingMessage),
    Pong(PongMessage),
    /// A recognized command this core has no use for, or an unrecognized
    /// one — dispatched to the "anything else: ignored" rule (§4.6).
    Unknown(String),
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Unknown(command) => command,
        }
    }

    pub fn into_raw_frame(self) -> Result<RawFrame, std::io::Error> {
        let command = self.command().to_string();
        let payload = match &self {
            Message::Version(msg) => msg.wire_serialize_to_vec()?,
            Message::Verack => VerackMessage.wire_serialize_to_vec()?,
            Message::Inv(items) => {
                let mut buf = Vec::new();
                write_inventory_list(&mut buf, items)?;
                buf
            }
            Message::GetData(items) => {
                let mut buf = Vec::new();
                write_inventory_list(&mut buf, items)?;
                buf
            }
            Message::Tx(tx) => tx.wire_serialize_to_vec()?,
            Message::Ping(msg) => msg.wire_serialize_to_vec()?,
            Message::Pong(msg) => msg.wire_serialize_to_vec()?,
            Message::Block(_) | Message::Unknown(_) => {
                // The core never constructs or re-sends these (§1 non-goals:
                // never serves data, never broadcasts).
                Vec::new()
            }
        };
        Ok(RawFrame::new(command, Bytes::from(payload)))
    }

    /// Parses a raw frame into a typed message. Parse failures for `tx` and
    /// `block` payloads are the caller's responsibility to treat as
    /// per-message recoverable errors (§7) — this function returns `Err` so
    /// the session can skip just that one message.
    pub fn from_raw_frame(frame: &RawFrame) -> Result<Message, sentinel_chain::SerializationError> {
        let payload = &frame.payload[..];
        let message = match frame.command.as_str() {
            "version" => Message::Version(VersionMessage::wire_deserialize(payload)?),
            "verack" => Message::Verack,
            "inv" => Message::Inv(read_inventory_list(payload)?),
            "getdata" => Message::GetData(read_inventory_list(payload)?),
            "tx" => Message::Tx(Transaction::wire_deserialize(payload)?),
            "block" => Message::Block(sentinel_chain::block::parse_block_from_slice(payload)?),
            "ping" => Message::Ping(PingMessage::wire_deserialize(payload)?),
            "pong" => Message::Pong(PongMessage::wire_deserialize(payload)?),
            other => Message::Unknown(other.to_string()),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_chain::InventoryVector;

    #[test]
    fn inv_roundtrips_through_a_raw_frame() {
        let items = vec![InventoryVector::transaction([1u8; 32])];
        let message = Message::Inv(items.clone());
        let frame = message.into_raw_frame().unwrap();
        assert_eq!(frame.command, "inv");

        let decoded = Message::from_raw_frame(&frame).unwrap();
        match decoded {
            Message::Inv(decoded_items) => assert_eq!(decoded_items, items),
            other => panic!("expected Inv, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_command_becomes_unknown() {
        let frame = RawFrame::new("notarealcmd", Bytes::new());
        let decoded = Message::from_raw_frame(&frame).unwrap();
        assert!(matches!(decoded, Message::Unknown(cmd) if cmd == "notarealcmd"));
    }
}
