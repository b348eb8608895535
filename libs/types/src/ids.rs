//! Typed identifiers for hives, applications, and bees.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a hive process, `"host:port"`. The id doubles as the dial
/// target for proxies, so two hives with the same id are the same hive.
///
/// An empty id is "unset" and never matches a live hive.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HiveId(String);

impl HiveId {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HiveId {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for HiveId {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Name of an application registered on a hive. Scopes bee identity: bee
/// ids are only meaningful within `(hive, app)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppName(String);

impl AppName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for AppName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Globally unique identity of one bee.
///
/// `id == 0` addresses no specific receiver: a message so addressed to a
/// remote hive is re-dispatched there through that hive's own map routing.
/// The all-default value is "unset" and marks messages emitted from outside
/// any bee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeeId {
    pub hive: HiveId,
    pub app: AppName,
    pub id: u64,
}

impl BeeId {
    pub fn new(hive: impl Into<HiveId>, app: impl Into<AppName>, id: u64) -> Self {
        Self {
            hive: hive.into(),
            app: app.into(),
            id,
        }
    }

    /// Addresses an app on a hive without naming a receiver. The target
    /// hive resolves the actual bee through its map routing.
    pub fn app_on(hive: impl Into<HiveId>, app: impl Into<AppName>) -> Self {
        Self::new(hive, app, 0)
    }

    pub fn is_unset(&self) -> bool {
        self.hive.is_unset() && self.app.is_unset() && self.id == 0
    }

    pub fn is_on(&self, hive: &HiveId) -> bool {
        &self.hive == hive
    }
}

impl fmt::Display for BeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.app, self.hive, self.id)
    }
}
