//! Partitioned dispatch under load: ten accounts, ten thousand
//! deposits, one bee per account.
//!
//! Handlers check their own invariants as they go: deposits for an
//! account must arrive in emission order and always on the same bee.
//! The audit pass then reads every partition back and checks that the
//! money adds up.

use apiary_e2e_tests::{init_logging, test_config, wait_for_metrics};
use async_trait::async_trait;
use hive::{Handler, Hive, MapContext, MapSet, MappedCell, Msg, Payload, RecvContext};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const ACCOUNTS: usize = 10;
const DEPOSITS_PER_ACCOUNT: u64 = 1_000;

#[derive(Debug, Serialize, Deserialize)]
struct Deposit {
    account: String,
    seq: u64,
    amount: u64,
}

impl Payload for Deposit {
    const TYPE: &'static str = "ledger.Deposit";
}

#[derive(Debug, Serialize, Deserialize)]
struct Audit {
    account: String,
}

impl Payload for Audit {
    const TYPE: &'static str = "ledger.Audit";
}

#[derive(Debug, Serialize, Deserialize)]
struct Report {
    account: String,
    balance: u64,
    deposits: u64,
    bee: u64,
    clean: bool,
}

impl Payload for Report {
    const TYPE: &'static str = "ledger.Report";
}

fn count_key(account: &str) -> String {
    format!("count:{account}")
}

fn owner_key(account: &str) -> String {
    format!("owner:{account}")
}

fn tainted_key(account: &str) -> String {
    format!("tainted:{account}")
}

fn read_u64(ctx: &mut RecvContext<'_>, dict: &str, key: &str) -> u64 {
    ctx.dict(dict)
        .get(key)
        .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap()))
        .unwrap_or(0)
}

struct Ledger;

#[async_trait]
impl Handler<Deposit> for Ledger {
    fn map(&self, deposit: &Deposit, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("accounts", &deposit.account)]
    }

    async fn recv(
        &self,
        deposit: &Deposit,
        _msg: &Msg,
        ctx: &mut RecvContext<'_>,
    ) -> hive::Result<()> {
        let me = ctx.id().id;
        let account = deposit.account.as_str();

        // Order: the nth deposit for an account must carry seq n.
        let seen = read_u64(ctx, "meta", &count_key(account));
        if deposit.seq != seen {
            ctx.dict("meta").put(tainted_key(account), vec![1]);
        }
        ctx.dict("meta")
            .put(count_key(account), (seen + 1).to_be_bytes().to_vec());

        // Affinity: every deposit for an account runs on one bee.
        let owner = ctx.dict("meta").get(&owner_key(account));
        match owner {
            None => ctx
                .dict("meta")
                .put(owner_key(account), me.to_be_bytes().to_vec()),
            Some(raw) if u64::from_be_bytes(raw.as_ref().try_into().unwrap()) == me => {}
            Some(_) => ctx.dict("meta").put(tainted_key(account), vec![1]),
        }

        let balance = read_u64(ctx, "accounts", account);
        ctx.dict("accounts")
            .put(account, (balance + deposit.amount).to_be_bytes().to_vec());
        Ok(())
    }
}

#[async_trait]
impl Handler<Audit> for Ledger {
    fn map(&self, audit: &Audit, _msg: &Msg, _ctx: &MapContext) -> MapSet {
        vec![MappedCell::new("accounts", &audit.account)]
    }

    async fn recv(&self, audit: &Audit, msg: &Msg, ctx: &mut RecvContext<'_>) -> hive::Result<()> {
        let account = audit.account.as_str();
        let balance = read_u64(ctx, "accounts", account);
        let deposits = read_u64(ctx, "meta", &count_key(account));
        let clean = ctx.dict("meta").get(&tainted_key(account)).is_none();
        let report = Report {
            account: audit.account.clone(),
            balance,
            deposits,
            bee: ctx.id().id,
            clean,
        };
        ctx.reply(msg, report).await
    }
}

#[tokio::test]
async fn ten_partitions_ten_thousand_deposits() {
    init_logging();

    let mut hive = Hive::new(test_config()).unwrap();
    hive.app("ledger")
        .handle::<Deposit, _>(Ledger)
        .unwrap()
        .handle::<Audit, _>(Ledger)
        .unwrap();
    hive.start().await.unwrap();

    let accounts: Vec<String> = (0..ACCOUNTS).map(|i| format!("acct-{i}")).collect();
    let mut rng = rand::thread_rng();
    let mut total = 0u64;
    for seq in 0..DEPOSITS_PER_ACCOUNT {
        // Interleave the accounts differently every round; order within
        // one account is what must survive.
        let mut order: Vec<&String> = accounts.iter().collect();
        order.shuffle(&mut rng);
        for account in order {
            let amount = seq % 7 + 1;
            total += amount;
            hive.emit(Deposit {
                account: account.clone(),
                seq,
                amount,
            })
            .await
            .unwrap();
        }
    }

    let expected = ACCOUNTS as u64 * DEPOSITS_PER_ACCOUNT;
    wait_for_metrics(&hive, |m| m.messages_dispatched == expected).await;
    assert_eq!(hive.metrics().messages_emitted, expected);
    assert_eq!(hive.metrics().messages_dropped, 0);

    let sync = hive.sync().await.unwrap();
    let mut grand_total = 0u64;
    let mut owners = HashSet::new();
    for account in &accounts {
        let reply = sync
            .process(Audit {
                account: account.clone(),
            })
            .await
            .unwrap();
        let report = reply.payload::<Report>().unwrap();
        assert_eq!(report.account, *account);
        assert!(report.clean, "account {account} saw disorder or a foreign bee");
        assert_eq!(report.deposits, DEPOSITS_PER_ACCOUNT);
        grand_total += report.balance;
        owners.insert(report.bee);
    }
    assert_eq!(grand_total, total, "money appeared or vanished");
    assert_eq!(owners.len(), ACCOUNTS, "partitions shared a bee");
    // Ten partition bees plus the audit collector.
    assert_eq!(hive.metrics().bees_spawned, ACCOUNTS as u64 + 1);

    hive.stop().await.unwrap();
}
