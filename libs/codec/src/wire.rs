//! Wire records.
//!
//! Every frame body is exactly one `WireRecord`, bincode-encoded. The
//! first record on a connection is a `Handshake` declaring the stream's
//! role; data streams then exchange a `Bee` verification pair and carry
//! `Msg` records, control streams carry `Cmd`/`CmdReply` pairs.

use serde::{Deserialize, Serialize};
use types::{AppName, BeeId, HiveId, MsgType};

use crate::error::CodecError;

/// Role a connection declares in its first record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnKind {
    Data,
    Ctrl,
}

/// First record on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub kind: ConnKind,
}

/// A message in flight between hives. The payload stays encoded until the
/// receiving hive decodes it against its own registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMsg {
    pub ty: MsgType,
    pub from: BeeId,
    pub to: BeeId,
    pub payload: Vec<u8>,
}

/// Control commands accepted over the wire. The local-only command
/// (starting a detached handler) has no wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireCmd {
    Ping,
    ListHives,
    CreateHiveId,
    ConsensusMessage(Vec<u8>),
    FindBee(u64),
    CreateBee { app: AppName },
    ReloadBee(u64),
    StopHive,
    StartHive,
}

/// Replies to control commands. Failures travel as strings; the caller is
/// on another process and gets description, not structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireCmdReply {
    Ok,
    Pong,
    Hives(Vec<HiveId>),
    HiveId(HiveId),
    Bee(BeeId),
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireRecord {
    Handshake(Handshake),
    Bee(BeeId),
    Msg(WireMsg),
    Cmd(WireCmd),
    CmdReply(WireCmdReply),
}

impl WireRecord {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::encode("WireRecord", e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(raw).map_err(|e| CodecError::decode("WireRecord", e.to_string()))
    }
}
