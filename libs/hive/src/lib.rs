//! Partition-aware actor runtime.
//!
//! A [`Hive`] hosts applications whose handlers declare, per message, the
//! dictionary cells they will touch; the dispatcher routes each message to
//! the single bee owning those cells, creating the bee on first touch, so
//! access to a partition is serialized without locks. Bees on other hives
//! are reached through proxy bees speaking the framed wire protocol. A
//! small command set administers the runtime over a control path distinct
//! from the data path.
//!
//! ## Quick start
//!
//! ```no_run
//! use hive::{Handler, Hive, HiveConfig, MapContext, MapSet, MappedCell, Msg, Payload, RecvContext};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add { key: String, delta: u64 }
//!
//! impl Payload for Add {
//!     const TYPE: &'static str = "counter.Add";
//! }
//!
//! struct Counter;
//!
//! #[async_trait::async_trait]
//! impl Handler<Add> for Counter {
//!     fn map(&self, add: &Add, _msg: &Msg, _ctx: &MapContext) -> MapSet {
//!         vec![MappedCell::new("counts", &add.key)]
//!     }
//!
//!     async fn recv(&self, add: &Add, _msg: &Msg, ctx: &mut RecvContext<'_>) -> hive::Result<()> {
//!         let current = ctx
//!             .dict("counts")
//!             .get(&add.key)
//!             .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8])))
//!             .unwrap_or(0);
//!         ctx.dict("counts").put(&add.key, (current + add.delta).to_be_bytes().to_vec());
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> hive::Result<()> {
//! let mut hive = Hive::new(HiveConfig::default())?;
//! hive.app("counter").handle::<Add, _>(Counter)?;
//! hive.start().await?;
//! hive.emit(Add { key: "clicks".into(), delta: 1 }).await?;
//! hive.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod bee;
pub mod cmd;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod sync;
pub mod topology;

pub use cmd::{Cmd, CmdReply};
pub use config::{HiveConfig, ProxyConfig};
pub use error::{HiveError, Result};
pub use handler::{DetachedHandler, Handler, MapContext, RecvContext};
pub use metrics::{HiveMetrics, HiveMetricsSnapshot};
pub use runtime::{App, Hive};
pub use sync::SyncHandle;
pub use topology::{ConsensusDriver, LiveHives, TopologyInstruction};

// Re-export the foundational crates' surface so applications import one
// crate for the common path.
pub use state::{Dict, StateError, TxState, TxStatus};
pub use types::{AppName, BeeId, HiveId, MapSet, MappedCell, Msg, MsgData, MsgType, Payload};
