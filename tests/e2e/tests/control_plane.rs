//! Control commands through the local handle and over the wire, plus
//! consensus-driven topology changes.

use apiary_e2e_tests::{init_logging, test_config, wait_for_metrics};
use async_trait::async_trait;
use codec::{WireCmd, WireCmdReply, DEFAULT_MAX_FRAME_SIZE};
use hive::server::ctrl_client;
use hive::{
    AppName, Cmd, CmdReply, ConsensusDriver, Handler, Hive, HiveError, HiveId, MapContext, MapSet,
    MappedCell, Msg, Payload, RecvContext, TopologyInstruction,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Click {
    tag: String,
}

impl Payload for Click {
    const TYPE: &'static str = "clicker.Click";
}

#[derive(Debug, Serialize, Deserialize)]
struct CountQuery {
    tag: String,
}

impl Payload for CountQuery {
    const TYPE: &'static str = "clicker.CountQuery";
}

#[derive(Debug, Serialize, Deserialize)]
struct Count {
    tag: String,
    n: u64,
}

impl Payload for Count {
    const TYPE: &'static str = "clicker.Count";
}

fn clicks_of(ctx: &mut RecvContext<'_>, tag: &str) -> u64 {
    ctx.dict("clicks")
        .get(tag)
        .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap()))
        .unwrap_or(0)
}

struct Clicker;

#[async_trait]
impl Handler<Click> for Clicker {
    fn map(&self, click: &Click, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("clicks", &click.tag)]
    }

    async fn recv(&self, click: &Click, _msg: &Msg, ctx: &mut RecvContext<'_>) -> hive::Result<()> {
        let n = clicks_of(ctx, &click.tag) + 1;
        ctx.dict("clicks")
            .put(click.tag.clone(), n.to_be_bytes().to_vec());
        Ok(())
    }
}

#[async_trait]
impl Handler<CountQuery> for Clicker {
    fn map(&self, query: &CountQuery, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("clicks", &query.tag)]
    }

    async fn recv(
        &self,
        query: &CountQuery,
        msg: &Msg,
        ctx: &mut RecvContext<'_>,
    ) -> hive::Result<()> {
        let n = clicks_of(ctx, &query.tag);
        ctx.reply(
            msg,
            Count {
                tag: query.tag.clone(),
                n,
            },
        )
        .await
    }
}

async fn clicker_hive() -> Hive {
    let mut hive = Hive::new(test_config()).unwrap();
    hive.app("clicker")
        .handle::<Click, _>(Clicker)
        .unwrap()
        .handle::<CountQuery, _>(Clicker)
        .unwrap();
    hive.start().await.unwrap();
    hive
}

#[tokio::test]
async fn local_commands_round_trip() {
    init_logging();
    let mut hive = clicker_hive().await;

    assert_eq!(hive.ctrl(Cmd::PingHive).await.unwrap(), CmdReply::Pong);
    assert_eq!(
        hive.ctrl(Cmd::CreateHiveId).await.unwrap(),
        CmdReply::HiveId(HiveId::new("hive-1"))
    );
    assert_eq!(
        hive.ctrl(Cmd::CreateHiveId).await.unwrap(),
        CmdReply::HiveId(HiveId::new("hive-2"))
    );
    assert_eq!(
        hive.ctrl(Cmd::ListLiveHives).await.unwrap(),
        CmdReply::Hives(vec![hive.id().clone()])
    );

    let bee = match hive
        .ctrl(Cmd::CreateBee {
            app: AppName::new("clicker"),
        })
        .await
        .unwrap()
    {
        CmdReply::Bee(bee) => bee,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(bee.app.as_str(), "clicker");
    assert!(bee.is_on(hive.id()));
    assert!(bee.id > 0);

    assert_eq!(
        hive.ctrl(Cmd::FindBee(bee.id)).await.unwrap(),
        CmdReply::Bee(bee.clone())
    );
    assert!(matches!(
        hive.ctrl(Cmd::FindBee(424_242)).await.unwrap_err(),
        HiveError::BeeNotFound { .. }
    ));
    assert!(hive
        .ctrl(Cmd::CreateBee {
            app: AppName::new("no-such-app"),
        })
        .await
        .is_err());

    hive.stop().await.unwrap();
}

#[tokio::test]
async fn reload_preserves_bee_state() {
    init_logging();
    let mut hive = clicker_hive().await;

    let bee = match hive
        .ctrl(Cmd::CreateBee {
            app: AppName::new("clicker"),
        })
        .await
        .unwrap()
    {
        CmdReply::Bee(bee) => bee,
        other => panic!("unexpected {:?}", other),
    };

    for _ in 0..3 {
        hive.send(Click { tag: "r".into() }, bee.clone()).await.unwrap();
    }
    wait_for_metrics(&hive, |m| m.messages_dispatched == 3).await;

    assert_eq!(
        hive.ctrl(Cmd::ReloadBee(bee.id)).await.unwrap(),
        CmdReply::Bee(bee.clone())
    );

    let sync = hive.sync().await.unwrap();
    let reply = sync
        .process_to(CountQuery { tag: "r".into() }, bee.clone())
        .await
        .unwrap();
    assert_eq!(reply.payload::<Count>().unwrap().n, 3);

    hive.send(Click { tag: "r".into() }, bee.clone()).await.unwrap();
    let reply = sync
        .process_to(CountQuery { tag: "r".into() }, bee)
        .await
        .unwrap();
    assert_eq!(reply.payload::<Count>().unwrap().n, 4);

    hive.stop().await.unwrap();
}

#[tokio::test]
async fn remote_commands_over_the_wire() {
    init_logging();
    let mut hive = clicker_hive().await;
    let addr = hive.id().clone();

    assert_eq!(
        ctrl_client(&addr, WireCmd::Ping, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap(),
        WireCmdReply::Pong
    );
    assert_eq!(
        ctrl_client(&addr, WireCmd::ListHives, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap(),
        WireCmdReply::Hives(vec![addr.clone()])
    );

    let bee = match ctrl_client(
        &addr,
        WireCmd::CreateBee {
            app: AppName::new("clicker"),
        },
        DEFAULT_MAX_FRAME_SIZE,
    )
    .await
    .unwrap()
    {
        WireCmdReply::Bee(bee) => bee,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(
        ctrl_client(&addr, WireCmd::FindBee(bee.id), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap(),
        WireCmdReply::Bee(bee)
    );
    assert!(matches!(
        ctrl_client(&addr, WireCmd::FindBee(616_000), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap(),
        WireCmdReply::Err(_)
    ));

    // A remote stop drains the dispatcher; the local owner still runs
    // its own teardown.
    assert_eq!(
        ctrl_client(&addr, WireCmd::StopHive, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap(),
        WireCmdReply::Ok
    );
    hive.wait().await.unwrap();
    hive.stop().await.unwrap();
}

/// Parses whitespace-separated instructions: `join <addr>`,
/// `leave <addr>`, `place <app> <addr>`.
struct ScriptedConsensus;

impl ConsensusDriver for ScriptedConsensus {
    fn deliver(&mut self, raw: &[u8]) -> hive::Result<Vec<TopologyInstruction>> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| HiveError::protocol(format!("bad consensus payload: {e}")))?;
        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("join"), Some(addr), None) => {
                Ok(vec![TopologyInstruction::HiveJoined(HiveId::new(addr))])
            }
            (Some("leave"), Some(addr), None) => {
                Ok(vec![TopologyInstruction::HiveLeft(HiveId::new(addr))])
            }
            (Some("place"), Some(app), Some(addr)) => Ok(vec![TopologyInstruction::PlaceApp {
                app: AppName::new(app),
                hive: HiveId::new(addr),
            }]),
            _ => Err(HiveError::protocol(format!(
                "unparsable consensus payload: {text}"
            ))),
        }
    }
}

#[tokio::test]
async fn consensus_placement_forwards_mapped_traffic() {
    init_logging();

    let mut a = Hive::new(test_config()).unwrap();
    a.app("clicker")
        .handle::<Click, _>(Clicker)
        .unwrap()
        .handle::<CountQuery, _>(Clicker)
        .unwrap();
    a.set_consensus_driver(Box::new(ScriptedConsensus));
    a.start().await.unwrap();

    let mut b = clicker_hive().await;

    let join = format!("join {}", b.id());
    assert_eq!(
        a.ctrl(Cmd::ProcessConsensusMessage(join.into_bytes()))
            .await
            .unwrap(),
        CmdReply::Ok
    );
    let mut expected = vec![a.id().clone(), b.id().clone()];
    expected.sort();
    assert_eq!(a.live_hives(), expected);

    let place = format!("place clicker {}", b.id());
    a.ctrl(Cmd::ProcessConsensusMessage(place.into_bytes()))
        .await
        .unwrap();

    // Mapped traffic for the placed app leaves this hive wholesale.
    a.emit(Click { tag: "t".into() }).await.unwrap();
    wait_for_metrics(&b, |m| m.messages_dispatched == 1).await;
    assert_eq!(a.metrics().bees_spawned, 0);
    assert_eq!(a.metrics().proxy_messages_forwarded, 1);
    assert_eq!(b.metrics().remote_messages_received, 1);

    // The placed hive owns the partition; its own routing finds it.
    let sync = b.sync().await.unwrap();
    let reply = sync.process(CountQuery { tag: "t".into() }).await.unwrap();
    assert_eq!(reply.payload::<Count>().unwrap().n, 1);

    let leave = format!("leave {}", b.id());
    a.ctrl(Cmd::ProcessConsensusMessage(leave.into_bytes()))
        .await
        .unwrap();
    assert_eq!(a.live_hives(), vec![a.id().clone()]);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
