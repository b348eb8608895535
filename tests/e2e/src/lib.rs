//! Shared fixtures for the end-to-end suite.
//!
//! Every scenario builds real hives on ephemeral loopback ports and
//! drives them through the public API only.

use hive::{Hive, HiveConfig, HiveMetricsSnapshot};
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Install a subscriber once per process; `RUST_LOG` overrides the
/// default filter.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "hive=info,warn".into());
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Configuration for a hive on an ephemeral loopback port.
pub fn test_config() -> HiveConfig {
    HiveConfig {
        addr: "127.0.0.1:0".to_string(),
        ..HiveConfig::default()
    }
}

/// Poll the hive's counters until `check` holds, up to ten seconds.
pub async fn wait_for_metrics(hive: &Hive, check: impl Fn(&HiveMetricsSnapshot) -> bool) {
    for _ in 0..2000 {
        if check(&hive.metrics()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("metrics condition not reached: {:?}", hive.metrics());
}
