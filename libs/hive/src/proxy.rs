//! Outbound connections to remote hives.
//!
//! One proxy task per remote bee identity. The identity is fixed at
//! construction: the proxy handshakes it with the peer once and stamps
//! every forwarded message with it. Dial failures back off with doubling
//! waits up to a cap; when retries run out the task exits and the
//! dispatcher builds a replacement on the next send. A control queue is
//! raced against the connection first-ready, so a stop lands even while
//! the task is mid-dial.

use crate::bee::BeeYield;
use crate::config::ProxyConfig;
use crate::error::{HiveError, Result};
use crate::metrics::HiveMetrics;
use codec::{ConnKind, FramedConn, Handshake, PayloadRegistry, WireMsg, WireRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use types::{BeeId, HiveId, Msg};

/// Doubling wait with a ceiling.
pub(crate) struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { next: initial, cap }
    }

    /// Sleep for the current wait, then double it up to the cap.
    pub async fn advance(&mut self) {
        tokio::time::sleep(self.next).await;
        self.next = (self.next * 2).min(self.cap);
    }
}

/// Dial `remote` with retries. The connector is injected so tests can
/// fail attempts without sockets.
pub(crate) async fn dial_with<C, F, Fut>(
    remote: &HiveId,
    config: &ProxyConfig,
    metrics: &HiveMetrics,
    mut connect: F,
) -> Result<C>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::io::Result<C>>,
{
    let target = remote.as_str().to_string();
    let mut backoff = Backoff::new(config.initial_backoff(), config.max_backoff());
    let mut attempt: u32 = 0;
    loop {
        let outcome = timeout(config.connect_timeout(), connect(target.clone())).await;
        let error_message = match outcome {
            Ok(Ok(conn)) => {
                debug!(remote = %remote, "connected");
                return Ok(conn);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connect attempt timed out after {}ms",
                config.connect_timeout_ms
            ),
        };

        if attempt >= config.max_retries {
            return Err(HiveError::connection_unavailable(
                remote.clone(),
                attempt + 1,
                error_message,
            ));
        }
        attempt += 1;
        warn!(remote = %remote, attempt, error = %error_message, "connect failed, retrying");
        metrics.record_proxy_retry();
        backoff.advance().await;
    }
}

/// Commands a proxy accepts while running. Closure of the command
/// channel carries the same meaning as `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyCtrl {
    Stop,
}

pub(crate) struct ProxyRuntime {
    pub remote: BeeId,
    pub config: ProxyConfig,
    pub max_frame_size: usize,
    pub registry: Arc<PayloadRegistry>,
    pub data_rx: mpsc::Receiver<Msg>,
    pub metrics: Arc<HiveMetrics>,
}

impl ProxyRuntime {
    pub async fn run(mut self, mut ctrl_rx: mpsc::Receiver<ProxyCtrl>) -> BeeYield {
        let remote = self.remote.clone();
        tokio::select! {
            outcome = self.serve() => match outcome {
                Ok(()) => debug!(remote = %remote, "proxy closed"),
                Err(e) => {
                    warn!(remote = %remote, error = %e, category = e.category(), "proxy exited");
                }
            },
            _ = ctrl_rx.recv() => debug!(remote = %remote, "proxy stopped"),
        }
        BeeYield::empty()
    }

    async fn serve(&mut self) -> Result<()> {
        let hive = self.remote.hive.clone();
        let stream = dial_with(&hive, &self.config, &self.metrics, |addr| {
            TcpStream::connect(addr)
        })
        .await?;
        let _ = stream.set_nodelay(true);
        let mut conn = FramedConn::new(stream, self.max_frame_size);

        let result = self.converse(&mut conn).await;
        let _ = conn.shutdown().await;
        result
    }

    async fn converse(&mut self, conn: &mut FramedConn<TcpStream>) -> Result<()> {
        self.handshake(conn).await?;
        self.forward_loop(conn).await;
        Ok(())
    }

    /// Declare a data stream, name the bee it serves, and require the
    /// peer to acknowledge that exact identity.
    async fn handshake(&mut self, conn: &mut FramedConn<TcpStream>) -> Result<()> {
        conn.write_record(&WireRecord::Handshake(Handshake {
            kind: ConnKind::Data,
        }))
        .await?;
        conn.write_record(&WireRecord::Bee(self.remote.clone()))
            .await?;

        match conn.read_record().await? {
            WireRecord::Bee(acked) if acked == self.remote => Ok(()),
            WireRecord::Bee(acked) => {
                self.metrics.record_handshake_failure();
                Err(HiveError::protocol(format!(
                    "peer acknowledged {} instead of {}; peer cannot find the bee",
                    acked, self.remote
                )))
            }
            other => {
                self.metrics.record_handshake_failure();
                Err(HiveError::protocol(format!(
                    "expected bee acknowledgement, got {:?}",
                    other
                )))
            }
        }
    }

    /// Forward until the data queue closes. Per-message failures never
    /// end the loop; the message is dropped and the next one tried.
    async fn forward_loop(&mut self, conn: &mut FramedConn<TcpStream>) {
        while let Some(mut msg) = self.data_rx.recv().await {
            msg.to = self.remote.clone();
            let payload = match self.registry.encode_data(&msg.ty, &msg.data) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(remote = %self.remote, ty = %msg.ty, error = %e,
                          "cannot encode payload, dropping message");
                    self.metrics.record_drop();
                    continue;
                }
            };
            let record = WireRecord::Msg(WireMsg {
                ty: msg.ty.clone(),
                from: msg.from,
                to: msg.to,
                payload,
            });
            if let Err(e) = conn.write_record(&record).await {
                warn!(remote = %self.remote, ty = %msg.ty, error = %e,
                      "cannot write message, dropping it");
                self.metrics.record_drop();
                continue;
            }
            self.metrics.record_proxy_forward();
        }
        // Sender gone: the dispatcher evicted this proxy or is stopping.
    }
}
