//! Bee task runtimes.
//!
//! Each bee is a tokio task consuming a private queue. A single consumer
//! per queue gives per-bee FIFO. Stopping a bee is done by dropping its
//! sender: the bee drains whatever is buffered, then yields its state
//! back to the dispatcher.

use crate::dispatch::{HandlerTable, Outbox};
use crate::handler::{DetachedHandler, RecvContext};
use crate::metrics::HiveMetrics;
use state::{TxState, TxStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::{BeeId, Msg};

/// What a finished bee task hands back for reloads and shutdown.
pub(crate) struct BeeYield {
    pub state: TxState,
    pub detached: Option<Box<dyn DetachedHandler>>,
}

impl BeeYield {
    pub fn empty() -> Self {
        Self {
            state: TxState::new(),
            detached: None,
        }
    }
}

/// Runtime for a mapped (or app-default) bee.
pub(crate) struct BeeRuntime {
    pub id: BeeId,
    pub handlers: Arc<HandlerTable>,
    pub outbox: Outbox,
    pub state: TxState,
    pub data_rx: mpsc::Receiver<Msg>,
    pub metrics: Arc<HiveMetrics>,
}

impl BeeRuntime {
    pub async fn run(mut self) -> BeeYield {
        debug!(bee = %self.id, "bee started");
        while let Some(msg) = self.data_rx.recv().await {
            self.handle(msg).await;
        }
        debug!(bee = %self.id, "bee stopped");
        BeeYield {
            state: self.state,
            detached: None,
        }
    }

    async fn handle(&mut self, msg: Msg) {
        let Some(entry) = self.handlers.get(&msg.ty) else {
            warn!(bee = %self.id, ty = %msg.ty, "delivered message has no handler, dropping");
            self.metrics.record_drop();
            return;
        };
        let handler = entry.handler.clone();

        {
            let mut ctx = RecvContext::new(&self.id, &mut self.state, &self.outbox);
            if let Err(e) = handler.recv_erased(&msg, &mut ctx).await {
                warn!(bee = %self.id, ty = %msg.ty, error = %e, "handler failed");
                self.metrics.record_handler_error();
            }
        }
        self.settle_tx(&msg);
        self.metrics.record_dispatch();
    }

    fn settle_tx(&mut self, msg: &Msg) {
        if self.state.status() == TxStatus::Open {
            warn!(bee = %self.id, ty = %msg.ty, "handler left a transaction open, aborting");
            if let Err(e) = self.state.abort_tx() {
                warn!(bee = %self.id, error = %e, "abort of leftover transaction failed");
            }
        }
    }
}

/// Runtime for a detached bee. Sees only directed messages; no mapping,
/// no type filtering.
pub(crate) struct DetachedRuntime {
    pub id: BeeId,
    pub handler: Box<dyn DetachedHandler>,
    pub outbox: Outbox,
    pub state: TxState,
    pub data_rx: mpsc::Receiver<Msg>,
    pub metrics: Arc<HiveMetrics>,
}

impl DetachedRuntime {
    pub async fn run(mut self) -> BeeYield {
        debug!(bee = %self.id, "detached bee started");
        {
            let mut ctx = RecvContext::new(&self.id, &mut self.state, &self.outbox);
            if let Err(e) = self.handler.on_start(&mut ctx).await {
                warn!(bee = %self.id, error = %e, "detached handler start failed");
                self.metrics.record_handler_error();
            }
        }

        while let Some(msg) = self.data_rx.recv().await {
            {
                let mut ctx = RecvContext::new(&self.id, &mut self.state, &self.outbox);
                if let Err(e) = self.handler.recv(&msg, &mut ctx).await {
                    warn!(bee = %self.id, ty = %msg.ty, error = %e, "detached handler failed");
                    self.metrics.record_handler_error();
                }
            }
            if self.state.status() == TxStatus::Open {
                warn!(bee = %self.id, ty = %msg.ty, "handler left a transaction open, aborting");
                if let Err(e) = self.state.abort_tx() {
                    warn!(bee = %self.id, error = %e, "abort of leftover transaction failed");
                }
            }
            self.metrics.record_dispatch();
        }

        {
            let mut ctx = RecvContext::new(&self.id, &mut self.state, &self.outbox);
            if let Err(e) = self.handler.on_stop(&mut ctx).await {
                warn!(bee = %self.id, error = %e, "detached handler stop failed");
            }
        }
        debug!(bee = %self.id, "detached bee stopped");

        // Handler travels with the state so a reload can respawn it.
        BeeYield {
            state: self.state,
            detached: Some(self.handler),
        }
    }
}
