//! Explicit transactions driven from inside a handler: committed writes
//! survive into later messages, aborted ones leave no trace.

use apiary_e2e_tests::{init_logging, test_config};
use async_trait::async_trait;
use hive::{Handler, Hive, MapContext, MapSet, MappedCell, Msg, Payload, RecvContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Credit {
    account: String,
    amount: u64,
    commit: bool,
}

impl Payload for Credit {
    const TYPE: &'static str = "teller.Credit";
}

#[derive(Debug, Serialize, Deserialize)]
struct BalanceQuery {
    account: String,
}

impl Payload for BalanceQuery {
    const TYPE: &'static str = "teller.BalanceQuery";
}

#[derive(Debug, Serialize, Deserialize)]
struct Balance {
    account: String,
    amount: u64,
}

impl Payload for Balance {
    const TYPE: &'static str = "teller.Balance";
}

fn balance_of(ctx: &mut RecvContext<'_>, account: &str) -> u64 {
    ctx.dict("balances")
        .get(account)
        .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap()))
        .unwrap_or(0)
}

struct Teller;

#[async_trait]
impl Handler<Credit> for Teller {
    fn map(&self, credit: &Credit, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("balances", &credit.account)]
    }

    async fn recv(
        &self,
        credit: &Credit,
        _msg: &Msg,
        ctx: &mut RecvContext<'_>,
    ) -> hive::Result<()> {
        ctx.begin_tx()?;
        let next = balance_of(ctx, &credit.account) + credit.amount;
        ctx.dict("balances")
            .put(credit.account.clone(), next.to_be_bytes().to_vec());
        if credit.commit {
            ctx.commit_tx()
        } else {
            ctx.abort_tx()
        }
    }
}

#[async_trait]
impl Handler<BalanceQuery> for Teller {
    fn map(&self, query: &BalanceQuery, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("balances", &query.account)]
    }

    async fn recv(
        &self,
        query: &BalanceQuery,
        msg: &Msg,
        ctx: &mut RecvContext<'_>,
    ) -> hive::Result<()> {
        let amount = balance_of(ctx, &query.account);
        ctx.reply(
            msg,
            Balance {
                account: query.account.clone(),
                amount,
            },
        )
        .await
    }
}

#[tokio::test]
async fn commit_persists_and_abort_discards() {
    init_logging();

    let mut hive = Hive::new(test_config()).unwrap();
    hive.app("teller")
        .handle::<Credit, _>(Teller)
        .unwrap()
        .handle::<BalanceQuery, _>(Teller)
        .unwrap();
    hive.start().await.unwrap();

    let sync = hive.sync().await.unwrap();

    // Queries ride the same partition bee as the credits, so each one
    // observes every credit emitted before it.
    hive.emit(Credit {
        account: "a".into(),
        amount: 50,
        commit: true,
    })
    .await
    .unwrap();
    hive.emit(Credit {
        account: "a".into(),
        amount: 25,
        commit: false,
    })
    .await
    .unwrap();

    let reply = sync
        .process(BalanceQuery {
            account: "a".into(),
        })
        .await
        .unwrap();
    assert_eq!(reply.payload::<Balance>().unwrap().amount, 50);

    hive.emit(Credit {
        account: "a".into(),
        amount: 25,
        commit: true,
    })
    .await
    .unwrap();
    let reply = sync
        .process(BalanceQuery {
            account: "a".into(),
        })
        .await
        .unwrap();
    assert_eq!(reply.payload::<Balance>().unwrap().amount, 75);

    hive.stop().await.unwrap();
}
