//! Inbound connection handling.
//!
//! The listener accepts framed streams and splits them by handshake into
//! data streams (remote proxies pushing messages) and ctrl streams
//! (remote control commands). A data stream must name the bee it serves
//! and have that identity verified before any message is accepted.

use crate::cmd::{Cmd, CmdEnvelope, CmdReply};
use crate::dispatch::Outbox;
use crate::error::{HiveError, Result};
use crate::metrics::HiveMetrics;
use codec::{
    CodecError, ConnKind, FramedConn, Handshake, PayloadRegistry, WireCmd, WireCmdReply, WireMsg,
    WireRecord,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use types::{AppName, BeeId, HiveId, Msg};

/// Everything a connection task needs, shared by reference.
pub(crate) struct ServerShared {
    pub hive_id: HiveId,
    pub registry: Arc<PayloadRegistry>,
    pub apps: Arc<HashSet<AppName>>,
    pub outbox: Outbox,
    pub ctrl_tx: mpsc::Sender<CmdEnvelope>,
    pub max_frame_size: usize,
    pub metrics: Arc<HiveMetrics>,
}

pub(crate) async fn run_listener(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(addr = %shared.hive_id, "listening");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let _ = stream.set_nodelay(true);
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_conn(stream, &shared).await {
                                warn!(%peer, error = %e, category = e.category(), "connection failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
    info!("listener stopped");
}

async fn serve_conn(stream: TcpStream, shared: &ServerShared) -> Result<()> {
    let mut conn = FramedConn::new(stream, shared.max_frame_size);
    let result = converse(&mut conn, shared).await;
    let _ = conn.shutdown().await;
    result
}

async fn converse(conn: &mut FramedConn<TcpStream>, shared: &ServerShared) -> Result<()> {
    let kind = match conn.read_record().await {
        Ok(WireRecord::Handshake(handshake)) => handshake.kind,
        Ok(other) => {
            shared.metrics.record_handshake_failure();
            return Err(HiveError::protocol(format!(
                "expected handshake, got {:?}",
                other
            )));
        }
        // A connect-and-close probe; nothing happened yet.
        Err(e) if e.is_eof() => return Ok(()),
        Err(e) => {
            shared.metrics.record_handshake_failure();
            return Err(e.into());
        }
    };
    match kind {
        ConnKind::Data => serve_data(conn, shared).await,
        ConnKind::Ctrl => serve_ctrl(conn, shared).await,
    }
}

async fn serve_data(conn: &mut FramedConn<TcpStream>, shared: &ServerShared) -> Result<()> {
    let claimed = match conn.read_record().await? {
        WireRecord::Bee(bee) => bee,
        other => {
            shared.metrics.record_handshake_failure();
            return Err(HiveError::protocol(format!(
                "expected bee claim, got {:?}",
                other
            )));
        }
    };

    if let Err(e) = verify_claim(&claimed, shared).await {
        shared.metrics.record_handshake_failure();
        return Err(e);
    }

    // Echo the exact claim back; the peer treats anything else as a
    // failed handshake.
    conn.write_record(&WireRecord::Bee(claimed.clone())).await?;
    debug!(bee = %claimed, "data stream established");

    loop {
        let record = match conn.read_record().await {
            Ok(record) => record,
            Err(e) if e.is_eof() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let wire_msg = match record {
            WireRecord::Msg(msg) => msg,
            other => {
                return Err(HiveError::protocol(format!(
                    "unexpected record on data stream: {:?}",
                    other
                )))
            }
        };
        accept_msg(wire_msg, shared).await?;
    }
}

/// A data stream may claim an app without a receiver (`id == 0`), which
/// only requires the app to exist, or a concrete bee, which must resolve
/// to exactly that identity here.
async fn verify_claim(claimed: &BeeId, shared: &ServerShared) -> Result<()> {
    if !claimed.is_on(&shared.hive_id) {
        return Err(HiveError::protocol(format!(
            "bee {} is not on this hive ({})",
            claimed, shared.hive_id
        )));
    }
    if claimed.id == 0 {
        if !shared.apps.contains(&claimed.app) {
            return Err(HiveError::protocol(format!(
                "no app {} on this hive",
                claimed.app
            )));
        }
        return Ok(());
    }

    let (envelope, reply) = CmdEnvelope::new(Cmd::FindBee(claimed.id));
    shared
        .ctrl_tx
        .send(envelope)
        .await
        .map_err(|_| HiveError::queue_closed("ctrl"))?;
    let found = reply.await.map_err(|_| HiveError::queue_closed("ctrl"))??;
    match found {
        CmdReply::Bee(bee) if bee == *claimed => Ok(()),
        CmdReply::Bee(bee) => Err(HiveError::protocol(format!(
            "bee {} resolves to {} on this hive",
            claimed, bee
        ))),
        other => Err(HiveError::internal(format!(
            "unexpected find reply {:?}",
            other
        ))),
    }
}

/// Decode and queue one inbound message. Unknown payload types are the
/// peer's registration problem, not a stream fault: drop and keep
/// reading. Malformed payloads poison the stream.
async fn accept_msg(wire: WireMsg, shared: &ServerShared) -> Result<()> {
    let data = match shared.registry.decode_data(&wire.ty, &wire.payload) {
        Ok(data) => data,
        Err(CodecError::UnknownType { type_tag }) => {
            warn!(ty = %type_tag, "message of unknown payload type, dropping");
            shared.metrics.record_drop();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let msg = Msg {
        ty: wire.ty,
        from: wire.from,
        to: wire.to,
        data,
    };
    shared.metrics.record_remote_receive();

    match shared.outbox.send(msg).await {
        Ok(()) => Ok(()),
        Err(HiveError::NoHandler { type_tag }) => {
            warn!(ty = %type_tag, "no handler for remote message, dropping");
            shared.metrics.record_drop();
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn serve_ctrl(conn: &mut FramedConn<TcpStream>, shared: &ServerShared) -> Result<()> {
    debug!("ctrl stream established");
    loop {
        let record = match conn.read_record().await {
            Ok(record) => record,
            Err(e) if e.is_eof() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let wire_cmd = match record {
            WireRecord::Cmd(cmd) => cmd,
            other => {
                return Err(HiveError::protocol(format!(
                    "unexpected record on ctrl stream: {:?}",
                    other
                )))
            }
        };
        let reply = execute_remote(wire_cmd, shared).await;
        conn.write_record(&WireRecord::CmdReply(reply)).await?;
    }
}

async fn execute_remote(wire_cmd: WireCmd, shared: &ServerShared) -> WireCmdReply {
    let (envelope, reply) = CmdEnvelope::new(Cmd::from_wire(wire_cmd));
    if shared.ctrl_tx.send(envelope).await.is_err() {
        return WireCmdReply::Err("hive is shutting down".to_string());
    }
    match reply.await {
        Ok(Ok(reply)) => reply.to_wire(),
        Ok(Err(e)) => WireCmdReply::Err(e.to_string()),
        Err(_) => WireCmdReply::Err("hive is shutting down".to_string()),
    }
}

/// One-shot control call against a remote hive.
pub async fn ctrl_client(addr: &HiveId, cmd: WireCmd, max_frame_size: usize) -> Result<WireCmdReply> {
    let stream = TcpStream::connect(addr.as_str()).await?;
    let _ = stream.set_nodelay(true);
    let mut conn = FramedConn::new(stream, max_frame_size);

    let result = async {
        conn.write_record(&WireRecord::Handshake(Handshake {
            kind: ConnKind::Ctrl,
        }))
        .await?;
        conn.write_record(&WireRecord::Cmd(cmd)).await?;
        match conn.read_record().await? {
            WireRecord::CmdReply(reply) => Ok(reply),
            other => Err(HiveError::protocol(format!(
                "expected command reply, got {:?}",
                other
            ))),
        }
    }
    .await;

    let _ = conn.shutdown().await;
    result
}
