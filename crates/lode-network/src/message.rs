//! Wire messages and framing.
//!
//! A frame is a 12-byte ASCII command name, zero-padded on the right,
//! followed by the bincode encoding of the command's payload record.
//! One frame travels per TCP connection. Never JSON for consensus-adjacent
//! data.

use lode_core::error::NetworkError;

/// Width of the command field at the start of every frame.
pub const COMMAND_LENGTH: usize = 12;

/// Upper bound on an accepted frame (header plus payload).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Inventory item kind carried by `inv` and `getdata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum InvKind {
    Block,
    Tx,
}

/// `version` payload: height comparison and peer introduction.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Version {
    pub version: i32,
    pub best_height: i64,
    pub addr_from: String,
}

/// `addr` payload: peer addresses to merge into the known list.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Addr {
    pub address_list: Vec<String>,
}

/// `getblocks` payload: request for the full hash inventory.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetBlocks {
    pub addr_from: String,
}

/// `inv` payload: announcement of blocks or transactions by id.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Inv {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

/// `getdata` payload: request for one block or transaction by id.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetData {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

/// `block` payload: an encoded block.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockMsg {
    pub addr_from: String,
    pub block: Vec<u8>,
}

/// `tx` payload: an encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxMsg {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// A parsed wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    Addr(Addr),
    GetBlocks(GetBlocks),
    Inv(Inv),
    GetData(GetData),
    Block(BlockMsg),
    Tx(TxMsg),
}

impl Message {
    /// ASCII command name of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Encode as `command[12] ‖ payload`.
    pub fn to_frame(&self) -> Result<Vec<u8>, NetworkError> {
        let payload = match self {
            Message::Version(p) => encode_payload(p),
            Message::Addr(p) => encode_payload(p),
            Message::GetBlocks(p) => encode_payload(p),
            Message::Inv(p) => encode_payload(p),
            Message::GetData(p) => encode_payload(p),
            Message::Block(p) => encode_payload(p),
            Message::Tx(p) => encode_payload(p),
        }?;

        let mut frame = vec![0u8; COMMAND_LENGTH];
        frame[..self.command().len()].copy_from_slice(self.command().as_bytes());
        frame.extend_from_slice(&payload);

        if frame.len() > MAX_FRAME_SIZE {
            return Err(NetworkError::MessageTooLarge { size: frame.len(), max: MAX_FRAME_SIZE });
        }
        Ok(frame)
    }

    /// Decode a frame back into a message.
    pub fn from_frame(data: &[u8]) -> Result<Self, NetworkError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(NetworkError::MessageTooLarge { size: data.len(), max: MAX_FRAME_SIZE });
        }
        if data.len() < COMMAND_LENGTH {
            return Err(NetworkError::Decode(format!("frame too short: {}", data.len())));
        }

        let command_bytes: Vec<u8> = data[..COMMAND_LENGTH]
            .iter()
            .copied()
            .filter(|b| *b != 0)
            .collect();
        let command = String::from_utf8(command_bytes)
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        let payload = &data[COMMAND_LENGTH..];

        match command.as_str() {
            "version" => Ok(Message::Version(decode_payload(payload)?)),
            "addr" => Ok(Message::Addr(decode_payload(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(decode_payload(payload)?)),
            "inv" => Ok(Message::Inv(decode_payload(payload)?)),
            "getdata" => Ok(Message::GetData(decode_payload(payload)?)),
            "block" => Ok(Message::Block(decode_payload(payload)?)),
            "tx" => Ok(Message::Tx(decode_payload(payload)?)),
            other => Err(NetworkError::UnknownCommand(other.to_string())),
        }
    }
}

fn encode_payload<T: bincode::Encode>(payload: &T) -> Result<Vec<u8>, NetworkError> {
    bincode::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| NetworkError::Decode(e.to_string()))
}

fn decode_payload<T: bincode::Decode<()>>(payload: &[u8]) -> Result<T, NetworkError> {
    let (value, _) = bincode::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| NetworkError::Decode(e.to_string()))?;
    Ok(value)
}
