//! Hive lifecycle and the application registration surface.
//!
//! A [`Hive`] is configured while idle: applications bind handlers to
//! payload types, reply-only payloads are registered for decoding, and an
//! optional consensus driver is installed. [`Hive::start`] binds the
//! listener, freezes the handler table, and spawns the dispatcher and
//! server tasks; from then on the hive only accepts messages and control
//! commands until [`Hive::stop`].

use crate::cmd::{Cmd, CmdEnvelope, CmdReply};
use crate::config::HiveConfig;
use crate::dispatch::{Dispatcher, HandlerEntry, HandlerTable, Outbox, DETACHED_APP};
use crate::error::{HiveError, Result};
use crate::handler::{DetachedHandler, Handler, TypedHandler};
use crate::metrics::{HiveMetrics, HiveMetricsSnapshot};
use crate::server::{self, ServerShared};
use crate::topology::{ConsensusDriver, LiveHives};
use codec::PayloadRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use types::{AppName, BeeId, HiveId, Msg, MsgType, Payload};

pub(crate) struct Running {
    pub outbox: Outbox,
    pub ctrl_tx: mpsc::Sender<CmdEnvelope>,
    pub live: Arc<LiveHives>,
    pub done_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

enum HiveState {
    Idle,
    Running(Running),
    Stopped,
}

/// A single process in the cluster.
pub struct Hive {
    config: HiveConfig,
    id: HiveId,
    handler_map: HashMap<MsgType, HandlerEntry>,
    registry: Arc<PayloadRegistry>,
    consensus: Option<Box<dyn ConsensusDriver>>,
    metrics: Arc<HiveMetrics>,
    state: HiveState,
}

impl Hive {
    pub fn new(config: HiveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: HiveId::new(config.addr.clone()),
            config,
            handler_map: HashMap::new(),
            registry: Arc::new(PayloadRegistry::new()),
            consensus: None,
            metrics: Arc::new(HiveMetrics::new()),
            state: HiveState::Idle,
        })
    }

    /// This hive's identity. Before [`start`](Self::start) it is the
    /// configured address; afterwards it is the actually bound one, which
    /// differs when the configuration asked for port 0.
    pub fn id(&self) -> &HiveId {
        &self.id
    }

    /// Open the registration surface for one application.
    pub fn app(&mut self, name: impl Into<AppName>) -> App<'_> {
        App {
            hive: self,
            name: name.into(),
        }
    }

    /// Register a payload type without binding a handler, so inbound
    /// copies of it can be decoded. Use this for types that only ever
    /// travel as replies to other hives' bees.
    pub fn register_payload<P: Payload>(&self) -> Result<()> {
        self.registry.register::<P>()?;
        Ok(())
    }

    /// Install the driver that turns raw consensus payloads into
    /// topology instructions. Replaces any previous driver.
    pub fn set_consensus_driver(&mut self, driver: Box<dyn ConsensusDriver>) {
        self.consensus = Some(driver);
    }

    pub async fn start(&mut self) -> Result<()> {
        if !matches!(self.state, HiveState::Idle) {
            return Err(HiveError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.config.addr.as_str()).await?;
        self.id = HiveId::new(listener.local_addr()?.to_string());

        let handlers = Arc::new(HandlerTable::new(std::mem::take(&mut self.handler_map)));
        let apps = Arc::new(handlers.apps());
        let live = Arc::new(LiveHives::new(self.id.clone()));

        let (data_tx, data_rx) = mpsc::channel(self.config.data_queue_capacity);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(self.config.ctrl_queue_capacity);
        let outbox = Outbox::new(data_tx, handlers.clone(), self.metrics.clone());

        let dispatcher = Dispatcher::new(
            self.id.clone(),
            self.config.clone(),
            handlers,
            self.registry.clone(),
            live.clone(),
            self.consensus.take(),
            outbox.clone(),
            data_rx,
            ctrl_rx,
            self.metrics.clone(),
        );
        let (done_tx, done_rx) = watch::channel(false);
        let dispatch_task = tokio::spawn(async move {
            dispatcher.run().await;
            let _ = done_tx.send(true);
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(ServerShared {
            hive_id: self.id.clone(),
            registry: self.registry.clone(),
            apps: apps.clone(),
            outbox: outbox.clone(),
            ctrl_tx: ctrl_tx.clone(),
            max_frame_size: self.config.max_frame_size,
            metrics: self.metrics.clone(),
        });
        let server_task = tokio::spawn(server::run_listener(listener, shared, shutdown_rx));

        let mut app_names: Vec<String> = apps.iter().map(|a| a.to_string()).collect();
        app_names.sort();
        info!(hive = %self.id, apps = ?app_names, "hive started");

        self.state = HiveState::Running(Running {
            outbox,
            ctrl_tx,
            live,
            done_rx,
            shutdown_tx,
            dispatch_task,
            server_task,
        });
        Ok(())
    }

    /// Emit a message with no particular receiver; routing consults the
    /// handling app's map function.
    pub async fn emit<P: Payload>(&self, payload: P) -> Result<()> {
        self.running()?.outbox.send(Msg::new(payload)).await
    }

    /// Send a message straight to a known bee, local or remote.
    pub async fn send<P: Payload>(&self, payload: P, to: BeeId) -> Result<()> {
        self.running()?.outbox.send(Msg::directed(payload, to)).await
    }

    /// Run one control command on this hive and wait for its reply.
    pub async fn ctrl(&self, cmd: Cmd) -> Result<CmdReply> {
        let running = self.running()?;
        let (envelope, reply) = CmdEnvelope::new(cmd);
        running
            .ctrl_tx
            .send(envelope)
            .await
            .map_err(|_| HiveError::queue_closed("ctrl"))?;
        reply.await.map_err(|_| HiveError::queue_closed("ctrl"))?
    }

    /// Start a detached bee. It takes no mapped traffic; it only sees
    /// messages sent directly to the returned id.
    pub async fn start_detached<H: DetachedHandler>(&self, handler: H) -> Result<BeeId> {
        match self.ctrl(Cmd::StartDetached(Box::new(handler))).await? {
            CmdReply::Bee(bee) => Ok(bee),
            other => Err(HiveError::internal(format!(
                "unexpected start reply {:?}",
                other
            ))),
        }
    }

    /// Drain and stop. Idempotent once stopped; an error only if the hive
    /// never started. A dispatcher that died of a panic re-raises it here.
    pub async fn stop(&mut self) -> Result<()> {
        let running = match std::mem::replace(&mut self.state, HiveState::Stopped) {
            HiveState::Running(running) => running,
            HiveState::Stopped => return Ok(()),
            HiveState::Idle => {
                self.state = HiveState::Idle;
                return Err(HiveError::NotRunning);
            }
        };

        // The dispatcher may already be gone if a remote sent StopHive.
        let (envelope, reply) = CmdEnvelope::new(Cmd::Stop);
        if running.ctrl_tx.send(envelope).await.is_ok() {
            let _ = reply.await;
        }
        match running.dispatch_task.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }

        let _ = running.shutdown_tx.send(true);
        match running.server_task.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }

        info!(hive = %self.id, "hive stopped");
        Ok(())
    }

    /// Resolve once the dispatcher has exited, however that happened.
    pub async fn wait(&self) -> Result<()> {
        let mut done = match &self.state {
            HiveState::Running(running) => running.done_rx.clone(),
            HiveState::Stopped => return Ok(()),
            HiveState::Idle => return Err(HiveError::NotRunning),
        };
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> HiveMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Hives this one believes are alive, itself included. Empty before
    /// start.
    pub fn live_hives(&self) -> Vec<HiveId> {
        match &self.state {
            HiveState::Running(running) => running.live.list(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn running(&self) -> Result<&Running> {
        match &self.state {
            HiveState::Running(running) => Ok(running),
            _ => Err(HiveError::NotRunning),
        }
    }

    pub(crate) fn config(&self) -> &HiveConfig {
        &self.config
    }
}

/// Registration handle for one application's handlers.
pub struct App<'h> {
    hive: &'h mut Hive,
    name: AppName,
}

impl App<'_> {
    /// Bind `handler` to payload type `P`. One handler per payload type
    /// across the whole hive; the binding is frozen at start.
    pub fn handle<P, H>(self, handler: H) -> Result<Self>
    where
        P: Payload,
        H: Handler<P>,
    {
        if !matches!(self.hive.state, HiveState::Idle) {
            return Err(HiveError::registration(
                "handlers must be registered before the hive starts",
            ));
        }
        if self.name.as_str() == DETACHED_APP {
            return Err(HiveError::registration(format!(
                "app name {} is reserved",
                DETACHED_APP
            )));
        }
        let ty = P::msg_type();
        if let Some(existing) = self.hive.handler_map.get(&ty) {
            return Err(HiveError::registration(format!(
                "payload type {} is already handled by app {}",
                ty.as_str(),
                existing.app
            )));
        }

        self.hive.registry.register::<P>()?;
        self.hive.handler_map.insert(
            ty,
            HandlerEntry {
                app: self.name.clone(),
                handler: Arc::new(TypedHandler::<P, _>::new(handler)),
            },
        );
        Ok(self)
    }
}
