//! Application handler traits and the contexts they run under.
//!
//! A [`Handler`] is registered for exactly one payload type. Its `map`
//! decides which cells a message touches; `recv` runs on the bee that
//! owns those cells with exclusive access to the app's dictionaries.
//! A [`DetachedHandler`] opts out of mapping and receives only messages
//! directed at its bee.

use crate::dispatch::Outbox;
use crate::error::{HiveError, Result};
use async_trait::async_trait;
use state::{Dict, TxState, TxStatus};
use std::marker::PhantomData;
use std::sync::Arc;
use types::{AppName, BeeId, HiveId, MapSet, Msg, Payload};

/// Context for `map` calls. No state access: mapping must depend only on
/// the message, or bees on different hives would shard differently.
#[derive(Debug, Clone)]
pub struct MapContext {
    hive: HiveId,
    app: AppName,
}

impl MapContext {
    pub(crate) fn new(hive: HiveId, app: AppName) -> Self {
        Self { hive, app }
    }

    pub fn hive(&self) -> &HiveId {
        &self.hive
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }
}

/// Context for `recv` calls, scoped to one bee and one message.
pub struct RecvContext<'a> {
    bee: &'a BeeId,
    state: &'a mut TxState,
    outbox: &'a Outbox,
}

impl<'a> RecvContext<'a> {
    pub(crate) fn new(bee: &'a BeeId, state: &'a mut TxState, outbox: &'a Outbox) -> Self {
        Self { bee, state, outbox }
    }

    /// Identity of the bee running this handler.
    pub fn id(&self) -> &BeeId {
        self.bee
    }

    /// A named dictionary of this bee's state.
    pub fn dict(&mut self, name: &str) -> Dict<'_> {
        self.state.dict(name)
    }

    pub fn begin_tx(&mut self) -> Result<()> {
        self.state.begin_tx().map_err(HiveError::from)
    }

    pub fn commit_tx(&mut self) -> Result<()> {
        self.state.commit_tx().map_err(HiveError::from)
    }

    pub fn abort_tx(&mut self) -> Result<()> {
        self.state.abort_tx().map_err(HiveError::from)
    }

    pub fn tx_status(&self) -> TxStatus {
        self.state.status()
    }

    /// Serialize all committed dictionaries of this bee.
    pub fn save(&self) -> Result<bytes::Bytes> {
        self.state.save().map_err(HiveError::from)
    }

    /// Replace this bee's dictionaries from a prior `save`.
    pub fn restore(&mut self, raw: &[u8]) -> Result<()> {
        self.state.restore(raw).map_err(HiveError::from)
    }

    /// Emit a message into the hive. It is routed through the map
    /// function of the payload's handler, here or on a placed hive.
    pub async fn emit<P: Payload>(&self, payload: P) -> Result<()> {
        let mut msg = Msg::new(payload);
        msg.from = self.bee.clone();
        self.outbox.send(msg).await
    }

    /// Answer the sender of `msg` directly, bypassing mapping.
    pub async fn reply<P: Payload>(&self, msg: &Msg, payload: P) -> Result<()> {
        if msg.from.is_unset() {
            return Err(HiveError::NoReply);
        }
        let mut reply = Msg::directed(payload, msg.from.clone());
        reply.from = self.bee.clone();
        self.outbox.send(reply).await
    }

    /// Send to a specific bee, bypassing mapping.
    pub async fn send_to<P: Payload>(&self, payload: P, to: BeeId) -> Result<()> {
        let mut msg = Msg::directed(payload, to);
        msg.from = self.bee.clone();
        self.outbox.send(msg).await
    }
}

/// A partitioned message handler for one payload type.
#[async_trait]
pub trait Handler<P: Payload>: Send + Sync + 'static {
    /// Name the cells this message touches. Messages whose map sets
    /// share a cell are serialized onto the same bee.
    fn map(&self, payload: &P, msg: &Msg, ctx: &MapContext) -> MapSet;

    /// Process the message on the owning bee.
    async fn recv(&self, payload: &P, msg: &Msg, ctx: &mut RecvContext<'_>) -> Result<()>;
}

/// A handler outside the partitioning scheme. It runs on its own bee,
/// keeps private dictionaries, and receives only directed messages of
/// any payload type.
#[async_trait]
pub trait DetachedHandler: Send + 'static {
    /// Called once when the bee starts, and again after a reload.
    async fn on_start(&mut self, ctx: &mut RecvContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn recv(&mut self, msg: &Msg, ctx: &mut RecvContext<'_>) -> Result<()>;

    /// Called once when the bee stops.
    async fn on_stop(&mut self, ctx: &mut RecvContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Object-safe view of a [`Handler`] keyed by payload type tag.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn map_erased(&self, msg: &Msg, ctx: &MapContext) -> Result<MapSet>;
    async fn recv_erased(&self, msg: &Msg, ctx: &mut RecvContext<'_>) -> Result<()>;
}

pub(crate) struct TypedHandler<P, H> {
    inner: H,
    _payload: PhantomData<fn(P)>,
}

impl<P, H> TypedHandler<P, H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, H> ErasedHandler for TypedHandler<P, H>
where
    P: Payload,
    H: Handler<P>,
{
    fn map_erased(&self, msg: &Msg, ctx: &MapContext) -> Result<MapSet> {
        let payload = typed_payload::<P>(msg)?;
        Ok(self.inner.map(payload.as_ref(), msg, ctx))
    }

    async fn recv_erased(&self, msg: &Msg, ctx: &mut RecvContext<'_>) -> Result<()> {
        let payload = typed_payload::<P>(msg)?;
        self.inner.recv(payload.as_ref(), msg, ctx).await
    }
}

fn typed_payload<P: Payload>(msg: &Msg) -> Result<Arc<P>> {
    msg.payload::<P>().ok_or_else(|| {
        HiveError::internal(format!(
            "message tagged {} does not carry a decoded {} payload",
            msg.ty,
            P::TYPE
        ))
    })
}
