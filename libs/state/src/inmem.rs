//! Base in-memory store: named dictionaries of opaque byte values.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// The committed store underneath a [`crate::TxState`]. Dictionaries are
/// created on first write. Values are opaque bytes; the store round-trips
/// arbitrary content through snapshots without interpretation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InMemState {
    dicts: HashMap<String, HashMap<String, Bytes>>,
}

impl InMemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dict: &str, key: &str) -> Option<Bytes> {
        self.dicts.get(dict)?.get(key).cloned()
    }

    pub fn put(&mut self, dict: &str, key: impl Into<String>, value: impl Into<Bytes>) {
        self.dict_mut(dict).insert(key.into(), value.into());
    }

    pub fn del(&mut self, dict: &str, key: &str) {
        if let Some(entries) = self.dicts.get_mut(dict) {
            entries.remove(key);
        }
    }

    pub(crate) fn dict_ref(&self, name: &str) -> Option<&HashMap<String, Bytes>> {
        self.dicts.get(name)
    }

    pub(crate) fn dict_mut(&mut self, name: &str) -> &mut HashMap<String, Bytes> {
        self.dicts.entry(name.to_string()).or_default()
    }

    /// Serialize the whole store. Lossless for arbitrary byte values.
    pub fn save(&self) -> Result<Bytes, StateError> {
        let snap = Snapshot::capture(self);
        let buf = bincode::serialize(&snap).map_err(|e| StateError::snapshot(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Replace all dictionary contents from a snapshot. On decode failure
    /// the store is left unchanged.
    pub fn restore(&mut self, raw: &[u8]) -> Result<(), StateError> {
        let snap: Snapshot =
            bincode::deserialize(raw).map_err(|e| StateError::snapshot(e.to_string()))?;
        self.dicts = snap.release();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dicts: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl Snapshot {
    fn capture(state: &InMemState) -> Self {
        let dicts = state
            .dicts
            .iter()
            .map(|(name, entries)| {
                let entries = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_vec()))
                    .collect();
                (name.clone(), entries)
            })
            .collect();
        Self { dicts }
    }

    fn release(self) -> HashMap<String, HashMap<String, Bytes>> {
        self.dicts
            .into_iter()
            .map(|(name, entries)| {
                let entries = entries
                    .into_iter()
                    .map(|(k, v)| (k, Bytes::from(v)))
                    .collect();
                (name, entries)
            })
            .collect()
    }
}
