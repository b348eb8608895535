//! Control plane commands.
//!
//! Commands reach the dispatcher from two directions: locally through
//! `Hive::ctrl`, and remotely over a ctrl connection as [`WireCmd`]
//! records. Both paths execute on the dispatcher task, serialized with
//! message routing, and answer through a oneshot.

use crate::error::Result;
use crate::handler::DetachedHandler;
use codec::{WireCmd, WireCmdReply};
use tokio::sync::oneshot;
use types::{AppName, BeeId, HiveId};

/// A control command for the dispatcher.
pub enum Cmd {
    /// Drain and stop the hive.
    Stop,
    /// Acknowledged no-op; a started hive is already running.
    Start,
    /// Liveness probe.
    PingHive,
    /// List the hives this hive believes are alive.
    ListLiveHives,
    /// Mint a new hive-scoped unique name.
    CreateHiveId,
    /// Hand an opaque consensus payload to the installed driver.
    ProcessConsensusMessage(Vec<u8>),
    /// Resolve a local bee id to its full identity.
    FindBee(u64),
    /// Force-create an app bee with no mapped cells.
    CreateBee { app: AppName },
    /// Tear a bee down and respawn it with its retained state.
    ReloadBee(u64),
    /// Spawn a detached handler; it only ever sees directed messages.
    StartDetached(Box<dyn DetachedHandler>),
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "Stop"),
            Self::Start => write!(f, "Start"),
            Self::PingHive => write!(f, "PingHive"),
            Self::ListLiveHives => write!(f, "ListLiveHives"),
            Self::CreateHiveId => write!(f, "CreateHiveId"),
            Self::ProcessConsensusMessage(raw) => {
                write!(f, "ProcessConsensusMessage({} bytes)", raw.len())
            }
            Self::FindBee(id) => write!(f, "FindBee({})", id),
            Self::CreateBee { app } => write!(f, "CreateBee({})", app),
            Self::ReloadBee(id) => write!(f, "ReloadBee({})", id),
            Self::StartDetached(_) => write!(f, "StartDetached"),
        }
    }
}

impl Cmd {
    /// Command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::PingHive => "ping_hive",
            Self::ListLiveHives => "list_live_hives",
            Self::CreateHiveId => "create_hive_id",
            Self::ProcessConsensusMessage(_) => "process_consensus_message",
            Self::FindBee(_) => "find_bee",
            Self::CreateBee { .. } => "create_bee",
            Self::ReloadBee(_) => "reload_bee",
            Self::StartDetached(_) => "start_detached",
        }
    }

    /// The serializable commands a remote peer may issue.
    pub fn from_wire(wire: WireCmd) -> Self {
        match wire {
            WireCmd::Ping => Self::PingHive,
            WireCmd::ListHives => Self::ListLiveHives,
            WireCmd::CreateHiveId => Self::CreateHiveId,
            WireCmd::ConsensusMessage(raw) => Self::ProcessConsensusMessage(raw),
            WireCmd::FindBee(id) => Self::FindBee(id),
            WireCmd::CreateBee { app } => Self::CreateBee { app },
            WireCmd::ReloadBee(id) => Self::ReloadBee(id),
            WireCmd::StopHive => Self::Stop,
            WireCmd::StartHive => Self::Start,
        }
    }
}

/// Successful command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdReply {
    Ok,
    Pong,
    Hives(Vec<HiveId>),
    HiveId(HiveId),
    Bee(BeeId),
}

impl CmdReply {
    pub fn to_wire(&self) -> WireCmdReply {
        match self {
            Self::Ok => WireCmdReply::Ok,
            Self::Pong => WireCmdReply::Pong,
            Self::Hives(hives) => WireCmdReply::Hives(hives.clone()),
            Self::HiveId(id) => WireCmdReply::HiveId(id.clone()),
            Self::Bee(bee) => WireCmdReply::Bee(bee.clone()),
        }
    }
}

/// A command paired with its answer channel.
pub(crate) struct CmdEnvelope {
    pub cmd: Cmd,
    pub reply: oneshot::Sender<Result<CmdReply>>,
}

impl CmdEnvelope {
    pub fn new(cmd: Cmd) -> (Self, oneshot::Receiver<Result<CmdReply>>) {
        let (reply, rx) = oneshot::channel();
        (Self { cmd, reply }, rx)
    }
}
