//! Runtime counters.
//!
//! Lock-free counters on the hot paths; a snapshot call reads a coherent
//! point-in-time view for logs and the control plane.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared across the dispatcher, bees, proxies, and the server.
#[derive(Debug, Default)]
pub struct HiveMetrics {
    messages_emitted: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_dropped: AtomicU64,
    bees_spawned: AtomicU64,
    proxies_spawned: AtomicU64,
    proxy_retries: AtomicU64,
    proxy_messages_forwarded: AtomicU64,
    remote_messages_received: AtomicU64,
    handshake_failures: AtomicU64,
    ctrl_commands: AtomicU64,
    handler_errors: AtomicU64,
    last_activity: RwLock<Option<Instant>>,
}

/// Point-in-time view of [`HiveMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HiveMetricsSnapshot {
    pub messages_emitted: u64,
    pub messages_dispatched: u64,
    pub messages_dropped: u64,
    pub bees_spawned: u64,
    pub proxies_spawned: u64,
    pub proxy_retries: u64,
    pub proxy_messages_forwarded: u64,
    pub remote_messages_received: u64,
    pub handshake_failures: u64,
    pub ctrl_commands: u64,
    pub handler_errors: u64,
}

impl HiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_emit(&self) {
        self.messages_emitted.fetch_add(1, Ordering::Release);
        self.touch();
    }

    #[inline]
    pub fn record_dispatch(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_bee_spawn(&self) {
        self.bees_spawned.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_proxy_spawn(&self) {
        self.proxies_spawned.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_proxy_retry(&self) {
        self.proxy_retries.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_proxy_forward(&self) {
        self.proxy_messages_forwarded.fetch_add(1, Ordering::Release);
        self.touch();
    }

    #[inline]
    pub fn record_remote_receive(&self) {
        self.remote_messages_received.fetch_add(1, Ordering::Release);
        self.touch();
    }

    #[inline]
    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_ctrl_command(&self) {
        self.ctrl_commands.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Release);
    }

    fn touch(&self) {
        *self.last_activity.write() = Some(Instant::now());
    }

    /// Time since the last message moved through this hive.
    pub fn idle_time(&self) -> Option<std::time::Duration> {
        self.last_activity.read().map(|t| t.elapsed())
    }

    pub fn snapshot(&self) -> HiveMetricsSnapshot {
        HiveMetricsSnapshot {
            messages_emitted: self.messages_emitted.load(Ordering::Acquire),
            messages_dispatched: self.messages_dispatched.load(Ordering::Acquire),
            messages_dropped: self.messages_dropped.load(Ordering::Acquire),
            bees_spawned: self.bees_spawned.load(Ordering::Acquire),
            proxies_spawned: self.proxies_spawned.load(Ordering::Acquire),
            proxy_retries: self.proxy_retries.load(Ordering::Acquire),
            proxy_messages_forwarded: self.proxy_messages_forwarded.load(Ordering::Acquire),
            remote_messages_received: self.remote_messages_received.load(Ordering::Acquire),
            handshake_failures: self.handshake_failures.load(Ordering::Acquire),
            ctrl_commands: self.ctrl_commands.load(Ordering::Acquire),
            handler_errors: self.handler_errors.load(Ordering::Acquire),
        }
    }
}
