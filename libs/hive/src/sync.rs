//! Request/response bridging for code outside any bee.
//!
//! Handlers reply to the bee a message came from, which works between
//! bees but leaves plain async code with no return address. A
//! [`SyncHandle`] fixes that: it owns a detached collector bee whose id
//! is stamped as the sender on every request, so replies land in the
//! collector and come back to the caller.

use crate::error::{HiveError, Result};
use crate::handler::{DetachedHandler, RecvContext};
use crate::runtime::Hive;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use types::{BeeId, Msg, Payload};

struct Collector {
    tx: mpsc::Sender<Msg>,
}

#[async_trait]
impl DetachedHandler for Collector {
    async fn recv(&mut self, msg: &Msg, _ctx: &mut RecvContext<'_>) -> Result<()> {
        // A dropped handle makes this a no-op.
        let _ = self.tx.send(msg.clone()).await;
        Ok(())
    }
}

/// One outstanding request at a time; concurrent calls queue on an
/// internal lock.
pub struct SyncHandle {
    collector: BeeId,
    outbox: crate::dispatch::Outbox,
    default_timeout: Duration,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Msg>>,
}

impl Hive {
    /// Create a request/response handle. Each handle is its own return
    /// address; create one per concurrent caller.
    pub async fn sync(&self) -> Result<SyncHandle> {
        let (tx, rx) = mpsc::channel(self.config().bee_queue_capacity);
        let collector = self.start_detached(Collector { tx }).await?;
        Ok(SyncHandle {
            collector,
            outbox: self.running()?.outbox.clone(),
            default_timeout: self.config().sync_timeout(),
            inbox: tokio::sync::Mutex::new(rx),
        })
    }
}

impl SyncHandle {
    /// The collector's identity; replies to requests made through this
    /// handle are addressed to it.
    pub fn id(&self) -> &BeeId {
        &self.collector
    }

    /// Emit `request` and wait for the reply, up to the configured
    /// timeout.
    pub async fn process<P: Payload>(&self, request: P) -> Result<Msg> {
        self.roundtrip(Msg::new(request), self.default_timeout).await
    }

    pub async fn process_timeout<P: Payload>(&self, request: P, timeout: Duration) -> Result<Msg> {
        self.roundtrip(Msg::new(request), timeout).await
    }

    /// Like [`process`](Self::process) but addressed to a known bee
    /// instead of routed through map functions.
    pub async fn process_to<P: Payload>(&self, request: P, to: BeeId) -> Result<Msg> {
        self.roundtrip(Msg::directed(request, to), self.default_timeout)
            .await
    }

    async fn roundtrip(&self, mut msg: Msg, timeout: Duration) -> Result<Msg> {
        let mut inbox = self.inbox.lock().await;

        // A reply that arrived after its request timed out belongs to no
        // one; discard before sending.
        while let Ok(stale) = inbox.try_recv() {
            debug!(ty = %stale.ty.as_str(), "discarding stale reply");
        }

        msg.from = self.collector.clone();
        self.outbox.send(msg).await?;

        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(HiveError::queue_closed("sync")),
            Err(_) => Err(HiveError::timeout("sync", timeout.as_millis() as u64)),
        }
    }
}
