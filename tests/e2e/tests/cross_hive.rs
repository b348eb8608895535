//! Two hives on loopback: directed sends cross the wire through a
//! proxy, the receiving hive re-dispatches through its own map
//! functions, and replies ride a proxy back.

use apiary_e2e_tests::{init_logging, test_config, wait_for_metrics};
use async_trait::async_trait;
use codec::{ConnKind, FramedConn, Handshake, WireRecord, DEFAULT_MAX_FRAME_SIZE};
use hive::{
    BeeId, Handler, Hive, HiveId, MapContext, MapSet, MappedCell, Msg, Payload, RecvContext,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Debug, Serialize, Deserialize)]
struct Ask {
    session: String,
}

impl Payload for Ask {
    const TYPE: &'static str = "dialog.Ask";
}

#[derive(Debug, Serialize, Deserialize)]
struct Answer {
    session: String,
    count: u64,
}

impl Payload for Answer {
    const TYPE: &'static str = "dialog.Answer";
}

/// Counts the asks per session and answers with the running total.
struct Responder;

#[async_trait]
impl Handler<Ask> for Responder {
    fn map(&self, ask: &Ask, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("sessions", &ask.session)]
    }

    async fn recv(&self, ask: &Ask, msg: &Msg, ctx: &mut RecvContext<'_>) -> hive::Result<()> {
        let count = ctx
            .dict("sessions")
            .get(&ask.session)
            .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap()))
            .unwrap_or(0)
            + 1;
        ctx.dict("sessions")
            .put(ask.session.clone(), count.to_be_bytes().to_vec());
        ctx.reply(
            msg,
            Answer {
                session: ask.session.clone(),
                count,
            },
        )
        .await
    }
}

/// The asking hive runs no handlers; it registers both payloads so its
/// proxies can encode requests and its server can decode answers.
async fn asking_hive() -> Hive {
    let mut hive = Hive::new(test_config()).unwrap();
    hive.register_payload::<Ask>().unwrap();
    hive.register_payload::<Answer>().unwrap();
    hive.start().await.unwrap();
    hive
}

/// The answering hive handles asks; answers leave over the wire, so the
/// answer type must be registered for encoding as well.
async fn answering_hive() -> Hive {
    let mut hive = Hive::new(test_config()).unwrap();
    hive.app("dialog").handle::<Ask, _>(Responder).unwrap();
    hive.register_payload::<Answer>().unwrap();
    hive.start().await.unwrap();
    hive
}

#[tokio::test]
async fn directed_ask_is_redispatched_remotely_and_answered() {
    init_logging();

    let mut asker = asking_hive().await;
    let mut answerer = answering_hive().await;

    let sync = asker.sync().await.unwrap();
    // No receiver named: the remote routes the ask through its own map
    // function and spawns the session bee on first touch.
    let target = BeeId::app_on(answerer.id().clone(), "dialog");

    let reply = sync
        .process_to(
            Ask {
                session: "s1".into(),
            },
            target.clone(),
        )
        .await
        .unwrap();
    let answer = reply.payload::<Answer>().unwrap();
    assert_eq!(answer.session, "s1");
    assert_eq!(answer.count, 1);

    // Same session lands on the same remote bee.
    let reply = sync
        .process_to(
            Ask {
                session: "s1".into(),
            },
            target.clone(),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload::<Answer>().unwrap().count, 2);

    // A different session is a different partition.
    let reply = sync
        .process_to(
            Ask {
                session: "s2".into(),
            },
            target,
        )
        .await
        .unwrap();
    assert_eq!(reply.payload::<Answer>().unwrap().count, 1);

    let asked = asker.metrics();
    assert_eq!(asked.proxies_spawned, 1);
    assert_eq!(asked.proxy_messages_forwarded, 3);
    assert_eq!(asked.remote_messages_received, 3);

    let answered = answerer.metrics();
    assert_eq!(answered.remote_messages_received, 3);
    assert_eq!(answered.messages_dispatched, 3);
    assert_eq!(answered.proxies_spawned, 1);

    asker.stop().await.unwrap();
    answerer.stop().await.unwrap();
}

/// A server that completes the framed handshake but acknowledges a bee
/// other than the claimed one.
async fn spawn_rogue_server() -> HiveId {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = HiveId::new(listener.local_addr().unwrap().to_string());
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut conn = FramedConn::new(stream, DEFAULT_MAX_FRAME_SIZE);
                loop {
                    match conn.read_record().await {
                        Ok(WireRecord::Handshake(Handshake {
                            kind: ConnKind::Data,
                        })) => {}
                        Ok(WireRecord::Bee(claimed)) => {
                            let imposter =
                                BeeId::new(claimed.hive.clone(), claimed.app.clone(), 4242);
                            if conn
                                .write_record(&WireRecord::Bee(imposter))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        _ => return,
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn wrong_handshake_ack_stops_delivery_without_crashing() {
    init_logging();

    let mut asker = asking_hive().await;
    let rogue = spawn_rogue_server().await;

    asker
        .send(
            Ask {
                session: "lost".into(),
            },
            BeeId::new(rogue, "dialog", 7),
        )
        .await
        .unwrap();

    wait_for_metrics(&asker, |m| m.handshake_failures >= 1).await;
    assert_eq!(asker.metrics().proxy_messages_forwarded, 0);

    // The hive survives and still talks to honest peers.
    let mut answerer = answering_hive().await;
    let sync = asker.sync().await.unwrap();
    let reply = sync
        .process_to(
            Ask {
                session: "alive".into(),
            },
            BeeId::app_on(answerer.id().clone(), "dialog"),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload::<Answer>().unwrap().count, 1);

    asker.stop().await.unwrap();
    answerer.stop().await.unwrap();
}
