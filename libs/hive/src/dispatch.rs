//! Message routing and bee lifecycle.
//!
//! One dispatcher task owns all routing state. Map functions run here,
//! cell ownership is resolved here, and bees are spawned here, so no
//! locking is needed around the ownership table. Control commands share
//! the task and are therefore serialized with routing.

use crate::bee::{BeeRuntime, BeeYield, DetachedRuntime};
use crate::cmd::{Cmd, CmdEnvelope, CmdReply};
use crate::config::HiveConfig;
use crate::error::{HiveError, Result};
use crate::handler::{DetachedHandler, ErasedHandler, MapContext};
use crate::metrics::HiveMetrics;
use crate::proxy::{ProxyCtrl, ProxyRuntime};
use crate::topology::{ConsensusDriver, LiveHives, TopologyInstruction};
use codec::PayloadRegistry;
use futures::future::join_all;
use state::TxState;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{AppName, BeeId, HiveId, MapSet, MappedCell, Msg, MsgType};

/// Reserved app name for bees hosting detached handlers.
pub(crate) const DETACHED_APP: &str = "detached";

pub(crate) struct HandlerEntry {
    pub app: AppName,
    pub handler: Arc<dyn ErasedHandler>,
}

/// Immutable handler lookup, frozen when the hive starts.
pub(crate) struct HandlerTable {
    entries: HashMap<MsgType, HandlerEntry>,
}

impl HandlerTable {
    pub fn new(entries: HashMap<MsgType, HandlerEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, ty: &MsgType) -> Option<&HandlerEntry> {
        self.entries.get(ty)
    }

    pub fn contains(&self, ty: &MsgType) -> bool {
        self.entries.contains_key(ty)
    }

    /// The set of apps with at least one handler.
    pub fn apps(&self) -> HashSet<AppName> {
        self.entries.values().map(|e| e.app.clone()).collect()
    }
}

/// Entry point into the dispatch queue, cloned into every bee, the
/// server, and the hive handle.
#[derive(Clone)]
pub(crate) struct Outbox {
    data_tx: mpsc::Sender<Msg>,
    handlers: Arc<HandlerTable>,
    metrics: Arc<HiveMetrics>,
}

impl Outbox {
    pub fn new(
        data_tx: mpsc::Sender<Msg>,
        handlers: Arc<HandlerTable>,
        metrics: Arc<HiveMetrics>,
    ) -> Self {
        Self {
            data_tx,
            handlers,
            metrics,
        }
    }

    /// Queue a message for routing. Undirected messages must have a
    /// local handler; directed ones may be for a remote hive that has
    /// its own.
    pub async fn send(&self, msg: Msg) -> Result<()> {
        if !msg.is_directed() && !self.handlers.contains(&msg.ty) {
            return Err(HiveError::no_handler(msg.ty.as_str()));
        }
        self.data_tx
            .send(msg)
            .await
            .map_err(|_| HiveError::queue_closed("dispatch"))?;
        self.metrics.record_emit();
        Ok(())
    }
}

/// Sorted, deduplicated form of a map set. Two map sets naming the same
/// cells compare equal in this form regardless of order.
pub(crate) fn canonical(mut cells: MapSet) -> MapSet {
    cells.sort();
    cells.dedup();
    cells
}

/// Cell ownership, per app.
#[derive(Default)]
pub(crate) struct CellTable {
    apps: HashMap<AppName, HashMap<MappedCell, u64>>,
}

impl CellTable {
    /// The owning bee of a map set, if any cell in it is owned.
    ///
    /// Panics if the cells resolve to more than one bee. Ownership is
    /// only ever granted to unowned cells, so two owners mean the app's
    /// map function partitioned the same data two ways. That breaks
    /// exclusive state access and cannot be recovered at runtime.
    pub fn resolve(&self, app: &AppName, cells: &[MappedCell]) -> Option<u64> {
        let owners = self.apps.get(app)?;
        let mut owner: Option<u64> = None;
        for cell in cells {
            let Some(&bee) = owners.get(cell) else {
                continue;
            };
            match owner {
                None => owner = Some(bee),
                Some(existing) if existing != bee => {
                    panic!(
                        "map sets for app {} resolve to multiple owning bees \
                         ({} and {}); map functions are inconsistent",
                        app, existing, bee
                    );
                }
                Some(_) => {}
            }
        }
        owner
    }

    /// Grant `bee` every cell in the set that is not yet owned.
    pub fn claim(&mut self, app: &AppName, cells: &[MappedCell], bee: u64) {
        let owners = self.apps.entry(app.clone()).or_default();
        for cell in cells {
            owners.entry(cell.clone()).or_insert(bee);
        }
    }

    pub fn clear(&mut self) {
        self.apps.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BeeKind {
    Local,
    Detached,
    Proxy,
}

struct BeeSlot {
    id: BeeId,
    kind: BeeKind,
    data_tx: mpsc::Sender<Msg>,
    // Proxies take commands on a second queue; local bees stop when
    // their data sender closes.
    ctrl_tx: Option<mpsc::Sender<ProxyCtrl>>,
    task: JoinHandle<BeeYield>,
}

pub(crate) struct Dispatcher {
    hive_id: HiveId,
    config: HiveConfig,
    handlers: Arc<HandlerTable>,
    registry: Arc<PayloadRegistry>,
    live_hives: Arc<LiveHives>,
    consensus: Option<Box<dyn ConsensusDriver>>,
    outbox: Outbox,
    data_rx: mpsc::Receiver<Msg>,
    ctrl_rx: mpsc::Receiver<CmdEnvelope>,
    metrics: Arc<HiveMetrics>,
    cells: CellTable,
    default_bees: HashMap<AppName, u64>,
    bees: HashMap<u64, BeeSlot>,
    proxies: HashMap<BeeId, u64>,
    placements: HashMap<AppName, HiveId>,
    next_bee: u64,
    next_hive_seq: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hive_id: HiveId,
        config: HiveConfig,
        handlers: Arc<HandlerTable>,
        registry: Arc<PayloadRegistry>,
        live_hives: Arc<LiveHives>,
        consensus: Option<Box<dyn ConsensusDriver>>,
        outbox: Outbox,
        data_rx: mpsc::Receiver<Msg>,
        ctrl_rx: mpsc::Receiver<CmdEnvelope>,
        metrics: Arc<HiveMetrics>,
    ) -> Self {
        Self {
            hive_id,
            config,
            handlers,
            registry,
            live_hives,
            consensus,
            outbox,
            data_rx,
            ctrl_rx,
            metrics,
            cells: CellTable::default(),
            default_bees: HashMap::new(),
            bees: HashMap::new(),
            proxies: HashMap::new(),
            placements: HashMap::new(),
            next_bee: 1,
            next_hive_seq: 0,
        }
    }

    pub async fn run(mut self) {
        info!(hive = %self.hive_id, "dispatcher started");
        let mut data_open = true;
        loop {
            if data_open {
                tokio::select! {
                    maybe_cmd = self.ctrl_rx.recv() => {
                        let Some(envelope) = maybe_cmd else {
                            self.shutdown().await;
                            break;
                        };
                        if self.handle_cmd(envelope).await {
                            break;
                        }
                    }
                    maybe_msg = self.data_rx.recv() => {
                        match maybe_msg {
                            Some(msg) => self.route(msg).await,
                            None => data_open = false,
                        }
                    }
                }
            } else {
                let Some(envelope) = self.ctrl_rx.recv().await else {
                    self.shutdown().await;
                    break;
                };
                if self.handle_cmd(envelope).await {
                    break;
                }
            }
        }
        info!(hive = %self.hive_id, "dispatcher stopped");
    }

    /// Returns true when the dispatcher should exit.
    async fn handle_cmd(&mut self, envelope: CmdEnvelope) -> bool {
        self.metrics.record_ctrl_command();
        if matches!(envelope.cmd, Cmd::Stop) {
            info!(hive = %self.hive_id, "stop requested, draining bees");
            self.shutdown().await;
            let _ = envelope.reply.send(Ok(CmdReply::Ok));
            return true;
        }
        debug!(cmd = envelope.cmd.name(), "control command");
        let result = self.execute_cmd(envelope.cmd).await;
        let _ = envelope.reply.send(result);
        false
    }

    async fn execute_cmd(&mut self, cmd: Cmd) -> Result<CmdReply> {
        match cmd {
            // Intercepted by the run loop.
            Cmd::Stop => Ok(CmdReply::Ok),
            // A running hive has nothing to start.
            Cmd::Start => Ok(CmdReply::Ok),
            Cmd::PingHive => Ok(CmdReply::Pong),
            Cmd::ListLiveHives => Ok(CmdReply::Hives(self.live_hives.list())),
            Cmd::CreateHiveId => {
                self.next_hive_seq += 1;
                Ok(CmdReply::HiveId(HiveId::new(format!(
                    "hive-{}",
                    self.next_hive_seq
                ))))
            }
            Cmd::ProcessConsensusMessage(raw) => {
                let Some(driver) = self.consensus.as_mut() else {
                    warn!("consensus message received but no driver is installed");
                    return Ok(CmdReply::Ok);
                };
                let instructions = driver.deliver(&raw)?;
                for instruction in instructions {
                    self.apply_topology(instruction);
                }
                Ok(CmdReply::Ok)
            }
            Cmd::FindBee(id) => match self.bees.get(&id) {
                Some(slot) if slot.kind != BeeKind::Proxy => Ok(CmdReply::Bee(slot.id.clone())),
                _ => Err(HiveError::bee_not_found(id)),
            },
            Cmd::CreateBee { app } => {
                if !self.handlers.apps().contains(&app) {
                    return Err(HiveError::registration(format!(
                        "app {} has no registered handlers",
                        app
                    )));
                }
                let slot = self.spawn_local_bee(&app);
                Ok(CmdReply::Bee(BeeId::new(
                    self.hive_id.clone(),
                    app,
                    slot,
                )))
            }
            Cmd::ReloadBee(id) => self.reload_bee(id).await,
            Cmd::StartDetached(handler) => {
                let bee = self.spawn_detached(handler);
                Ok(CmdReply::Bee(bee))
            }
        }
    }

    fn apply_topology(&mut self, instruction: TopologyInstruction) {
        match instruction {
            TopologyInstruction::HiveJoined(hive) => {
                if self.live_hives.join(hive.clone()) {
                    info!(hive = %hive, "hive joined");
                }
            }
            TopologyInstruction::HiveLeft(hive) => {
                if self.live_hives.leave(&hive) {
                    info!(hive = %hive, "hive left");
                    self.placements.retain(|app, owner| {
                        if *owner == hive {
                            info!(app = %app, hive = %hive, "app placement dropped with its hive");
                            false
                        } else {
                            true
                        }
                    });
                }
            }
            TopologyInstruction::PlaceApp { app, hive } => {
                if hive == self.hive_id {
                    info!(app = %app, "app placed on this hive");
                    self.placements.remove(&app);
                } else {
                    info!(app = %app, hive = %hive, "app placed on remote hive");
                    self.placements.insert(app, hive);
                }
            }
        }
    }

    async fn route(&mut self, msg: Msg) {
        if msg.is_directed() {
            if msg.to.is_on(&self.hive_id) {
                if msg.to.id == 0 {
                    // No specific receiver: dispatch through our own maps.
                    self.route_mapped(msg).await;
                } else {
                    self.deliver_local(msg).await;
                }
            } else {
                self.deliver_remote(msg).await;
            }
        } else {
            self.route_mapped(msg).await;
        }
    }

    async fn route_mapped(&mut self, msg: Msg) {
        let (app, handler) = match self.handlers.get(&msg.ty) {
            Some(entry) => (entry.app.clone(), entry.handler.clone()),
            None => {
                warn!(ty = %msg.ty, "no handler for message, dropping");
                self.metrics.record_drop();
                return;
            }
        };

        // A placed app's mapped traffic belongs to its placement hive.
        if let Some(owner) = self.placements.get(&app) {
            if *owner != self.hive_id {
                let mut msg = msg;
                msg.to = BeeId::app_on(owner.clone(), app);
                self.deliver_remote(msg).await;
                return;
            }
        }

        let ctx = MapContext::new(self.hive_id.clone(), app.clone());
        let cells = match handler.map_erased(&msg, &ctx) {
            Ok(cells) => canonical(cells),
            Err(e) => {
                warn!(ty = %msg.ty, error = %e, "map failed, dropping message");
                self.metrics.record_drop();
                return;
            }
        };

        let slot = match self.cells.resolve(&app, &cells) {
            Some(owner) => {
                self.cells.claim(&app, &cells, owner);
                owner
            }
            None if cells.is_empty() => self.default_bee(&app),
            None => {
                let slot = self.spawn_local_bee(&app);
                self.cells.claim(&app, &cells, slot);
                slot
            }
        };
        self.deliver_to_slot(slot, msg).await;
    }

    /// The app's singleton bee for messages that map to no cells.
    fn default_bee(&mut self, app: &AppName) -> u64 {
        if let Some(&slot) = self.default_bees.get(app) {
            return slot;
        }
        let slot = self.spawn_local_bee(app);
        self.default_bees.insert(app.clone(), slot);
        slot
    }

    async fn deliver_local(&mut self, msg: Msg) {
        let slot = msg.to.id;
        let found = self.bees.get(&slot).is_some_and(|b| b.id == msg.to);
        if !found {
            debug!(to = %msg.to, ty = %msg.ty, "message for unknown local bee, dropping");
            self.metrics.record_drop();
            return;
        }
        self.deliver_to_slot(slot, msg).await;
    }

    async fn deliver_to_slot(&mut self, slot: u64, msg: Msg) {
        let Some(bee) = self.bees.get(&slot) else {
            debug!(slot, ty = %msg.ty, "message for unknown bee slot, dropping");
            self.metrics.record_drop();
            return;
        };
        if bee.data_tx.send(msg).await.is_err() {
            warn!(bee = %bee.id, "bee queue is gone, dropping message");
            self.metrics.record_drop();
        }
    }

    async fn deliver_remote(&mut self, msg: Msg) {
        let remote = msg.to.clone();
        let slot = match self.proxies.get(&remote) {
            Some(&slot) => slot,
            None => self.spawn_proxy(remote.clone()),
        };

        // A dead proxy task gets one replacement before the message is
        // given up on.
        if let Err(msg) = self.try_forward(slot, msg).await {
            debug!(remote = %remote.hive, "proxy task is gone, respawning");
            self.evict_proxy(&remote);
            let slot = self.spawn_proxy(remote.clone());
            if let Err(msg) = self.try_forward(slot, msg).await {
                warn!(remote = %remote.hive, ty = %msg.ty, "proxy unavailable, dropping message");
                self.metrics.record_drop();
            }
        }
    }

    async fn try_forward(&mut self, slot: u64, msg: Msg) -> std::result::Result<(), Msg> {
        let Some(bee) = self.bees.get(&slot) else {
            return Err(msg);
        };
        bee.data_tx.send(msg).await.map_err(|e| e.0)
    }

    fn spawn_local_bee(&mut self, app: &AppName) -> u64 {
        let slot = self.next_bee;
        self.next_bee += 1;
        let id = BeeId::new(self.hive_id.clone(), app.clone(), slot);
        self.spawn_local_with(id, slot, TxState::new());
        slot
    }

    fn spawn_local_with(&mut self, id: BeeId, slot: u64, state: TxState) {
        let (tx, rx) = mpsc::channel(self.config.bee_queue_capacity);
        let runtime = BeeRuntime {
            id: id.clone(),
            handlers: self.handlers.clone(),
            outbox: self.outbox.clone(),
            state,
            data_rx: rx,
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(runtime.run());
        debug!(bee = %id, "bee spawned");
        self.metrics.record_bee_spawn();
        self.bees.insert(
            slot,
            BeeSlot {
                id,
                kind: BeeKind::Local,
                data_tx: tx,
                ctrl_tx: None,
                task,
            },
        );
    }

    fn spawn_detached(&mut self, handler: Box<dyn DetachedHandler>) -> BeeId {
        let slot = self.next_bee;
        self.next_bee += 1;
        let id = BeeId::new(self.hive_id.clone(), DETACHED_APP, slot);
        self.spawn_detached_with(id.clone(), slot, handler, TxState::new());
        id
    }

    fn spawn_detached_with(
        &mut self,
        id: BeeId,
        slot: u64,
        handler: Box<dyn DetachedHandler>,
        state: TxState,
    ) {
        let (tx, rx) = mpsc::channel(self.config.bee_queue_capacity);
        let runtime = DetachedRuntime {
            id: id.clone(),
            handler,
            outbox: self.outbox.clone(),
            state,
            data_rx: rx,
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(runtime.run());
        debug!(bee = %id, "detached bee spawned");
        self.metrics.record_bee_spawn();
        self.bees.insert(
            slot,
            BeeSlot {
                id,
                kind: BeeKind::Detached,
                data_tx: tx,
                ctrl_tx: None,
                task,
            },
        );
    }

    fn spawn_proxy(&mut self, remote: BeeId) -> u64 {
        let slot = self.next_bee;
        self.next_bee += 1;
        let (tx, rx) = mpsc::channel(self.config.bee_queue_capacity);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(1);
        let runtime = ProxyRuntime {
            remote: remote.clone(),
            config: self.config.proxy.clone(),
            max_frame_size: self.config.max_frame_size,
            registry: self.registry.clone(),
            data_rx: rx,
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(runtime.run(ctrl_rx));
        debug!(remote = %remote, "proxy spawned");
        self.metrics.record_proxy_spawn();
        self.proxies.insert(remote.clone(), slot);
        self.bees.insert(
            slot,
            BeeSlot {
                id: remote,
                kind: BeeKind::Proxy,
                data_tx: tx,
                ctrl_tx: Some(ctrl_tx),
                task,
            },
        );
        slot
    }

    fn evict_proxy(&mut self, remote: &BeeId) {
        if let Some(slot) = self.proxies.remove(remote) {
            // Dropping the slot closes both queues, which is the stop
            // signal; the task is already dead on this path anyway.
            self.bees.remove(&slot);
        }
    }

    /// Tear a bee down and respawn it in place with its retained state.
    async fn reload_bee(&mut self, id: u64) -> Result<CmdReply> {
        let slot = self
            .bees
            .remove(&id)
            .ok_or_else(|| HiveError::bee_not_found(id))?;
        let identity = slot.id.clone();
        let kind = slot.kind;
        info!(bee = %identity, "reloading bee");

        if kind == BeeKind::Proxy {
            if let Some(ctrl) = &slot.ctrl_tx {
                let _ = ctrl.try_send(ProxyCtrl::Stop);
            }
            drop(slot.data_tx);
            drop(slot.ctrl_tx);
            let _ = slot.task.await;
            self.proxies.remove(&identity);
            self.spawn_proxy(identity.clone());
            return Ok(CmdReply::Bee(identity));
        }

        drop(slot.data_tx);
        let mut task = slot.task;
        let mut pending = Vec::new();
        let mut data_open = true;
        let yielded = loop {
            if data_open {
                tokio::select! {
                    res = &mut task => break res,
                    maybe = self.data_rx.recv() => {
                        match maybe {
                            // Traffic arriving mid-reload waits for the respawn.
                            Some(m) => pending.push(m),
                            None => data_open = false,
                        }
                    }
                }
            } else {
                break (&mut task).await;
            }
        };

        let yielded = match yielded {
            Ok(y) => y,
            Err(e) => {
                if e.is_panic() {
                    error!(bee = %identity, "bee task panicked during reload");
                }
                BeeYield::empty()
            }
        };

        match kind {
            BeeKind::Local => self.spawn_local_with(identity.clone(), id, yielded.state),
            BeeKind::Detached => match yielded.detached {
                Some(handler) => {
                    self.spawn_detached_with(identity.clone(), id, handler, yielded.state)
                }
                None => return Err(HiveError::internal("detached bee yielded no handler")),
            },
            BeeKind::Proxy => {}
        }

        for msg in pending {
            self.route(msg).await;
        }
        Ok(CmdReply::Bee(identity))
    }

    /// Stop every bee, draining their queues, while absorbing messages
    /// they emit as they wind down.
    async fn shutdown(&mut self) {
        let mut tasks = Vec::new();
        for (_, slot) in self.bees.drain() {
            // Closing the queues is the stop signal for proxies too,
            // even mid-dial.
            drop(slot.data_tx);
            drop(slot.ctrl_tx);
            tasks.push(slot.task);
        }
        self.proxies.clear();
        self.default_bees.clear();
        self.cells.clear();

        let mut join = join_all(tasks);
        let mut data_open = true;
        let results = loop {
            if data_open {
                tokio::select! {
                    results = &mut join => break results,
                    maybe = self.data_rx.recv() => {
                        match maybe {
                            Some(msg) => {
                                debug!(ty = %msg.ty, "dropping message emitted during shutdown");
                                self.metrics.record_drop();
                            }
                            None => data_open = false,
                        }
                    }
                }
            } else {
                break (&mut join).await;
            }
        };

        for result in results {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("bee task panicked during shutdown");
                }
            }
        }
        info!(hive = %self.hive_id, "all bees stopped");
    }
}
