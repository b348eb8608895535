//! Cluster membership and app placement.
//!
//! A hive does not run its own membership protocol. An embedding may plug
//! in a [`ConsensusDriver`] and feed it opaque payloads through the
//! control plane; the driver's instructions update the live-hive registry
//! and the app placement table.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use types::{AppName, HiveId};

/// A topology change decided by an external consensus layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyInstruction {
    /// A hive joined the cluster.
    HiveJoined(HiveId),
    /// A hive left the cluster.
    HiveLeft(HiveId),
    /// All mapped traffic for `app` is owned by `hive`.
    PlaceApp { app: AppName, hive: HiveId },
}

/// Pluggable consensus integration.
///
/// `deliver` receives one opaque consensus payload and returns the
/// topology changes it implies, in application order. The driver runs on
/// the dispatcher task; keep it non-blocking.
pub trait ConsensusDriver: Send + 'static {
    fn deliver(&mut self, raw: &[u8]) -> Result<Vec<TopologyInstruction>>;
}

/// The set of hives this hive believes are alive, always including
/// itself.
#[derive(Debug)]
pub struct LiveHives {
    self_id: HiveId,
    hives: RwLock<BTreeSet<HiveId>>,
}

impl LiveHives {
    pub fn new(self_id: HiveId) -> Self {
        let mut hives = BTreeSet::new();
        hives.insert(self_id.clone());
        Self {
            self_id,
            hives: RwLock::new(hives),
        }
    }

    pub fn self_id(&self) -> &HiveId {
        &self.self_id
    }

    /// Sorted list of live hives.
    pub fn list(&self) -> Vec<HiveId> {
        self.hives.read().iter().cloned().collect()
    }

    pub fn contains(&self, hive: &HiveId) -> bool {
        self.hives.read().contains(hive)
    }

    pub fn join(&self, hive: HiveId) -> bool {
        self.hives.write().insert(hive)
    }

    /// Removes a hive. The local hive can never be removed.
    pub fn leave(&self, hive: &HiveId) -> bool {
        if *hive == self.self_id {
            return false;
        }
        self.hives.write().remove(hive)
    }

    pub fn len(&self) -> usize {
        self.hives.read().len()
    }

    /// Never empty: the local hive is always a member.
    pub fn is_empty(&self) -> bool {
        self.hives.read().is_empty()
    }
}
