//! Dictionary cells and map sets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One addressable cell of the dictionary space: a key in a named
/// dictionary. Ownership of a cell pins every message touching it to a
/// single bee.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MappedCell {
    pub dict: String,
    pub key: String,
}

impl MappedCell {
    pub fn new(dict: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            dict: dict.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for MappedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dict, self.key)
    }
}

/// The cells a handler declares it will touch for one message. Order is
/// irrelevant and duplicates are tolerated; routing canonicalizes before
/// resolving an owner. An empty set routes to the app's unkeyed bee.
pub type MapSet = Vec<MappedCell>;
