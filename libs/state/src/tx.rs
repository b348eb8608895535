//! Transactional overlay over the base store.
//!
//! At most one transaction is open per store. While open, writes stage in
//! an overlay keyed by dictionary and key (`Some` = put, `None` = delete),
//! reads see the overlay first, and snapshot operations are refused. Commit
//! applies the whole overlay to the base store; abort discards it.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::StateError;
use crate::inmem::InMemState;

/// Transaction state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    None,
    Open,
}

#[derive(Debug, Default)]
struct TxStage {
    writes: HashMap<String, HashMap<String, Option<Bytes>>>,
}

/// The store handed to every bee: committed base plus the optional staged
/// transaction.
#[derive(Debug, Default)]
pub struct TxState {
    base: InMemState,
    stage: Option<TxStage>,
}

impl TxState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: InMemState) -> Self {
        Self { base, stage: None }
    }

    pub fn status(&self) -> TxStatus {
        if self.stage.is_some() {
            TxStatus::Open
        } else {
            TxStatus::None
        }
    }

    pub fn begin_tx(&mut self) -> Result<(), StateError> {
        if self.stage.is_some() {
            return Err(StateError::illegal_state(
                "begin_tx",
                "transaction already open",
            ));
        }
        self.stage = Some(TxStage::default());
        Ok(())
    }

    /// Apply every staged operation to the base store. The overlay is
    /// applied in full; partial commits cannot happen.
    pub fn commit_tx(&mut self) -> Result<(), StateError> {
        let stage = self
            .stage
            .take()
            .ok_or_else(|| StateError::illegal_state("commit_tx", "no open transaction"))?;
        for (dict, writes) in stage.writes {
            let entries = self.base.dict_mut(&dict);
            for (key, op) in writes {
                match op {
                    Some(value) => {
                        entries.insert(key, value);
                    }
                    None => {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn abort_tx(&mut self) -> Result<(), StateError> {
        self.stage
            .take()
            .ok_or_else(|| StateError::illegal_state("abort_tx", "no open transaction"))?;
        Ok(())
    }

    /// Serialize the committed base store.
    pub fn save(&self) -> Result<Bytes, StateError> {
        if self.stage.is_some() {
            return Err(StateError::busy("save"));
        }
        self.base.save()
    }

    /// Replace all committed contents from a snapshot.
    pub fn restore(&mut self, raw: &[u8]) -> Result<(), StateError> {
        if self.stage.is_some() {
            return Err(StateError::busy("restore"));
        }
        self.base.restore(raw)
    }

    /// View of one named dictionary. The dictionary comes into existence in
    /// the base store on first committed write.
    pub fn dict(&mut self, name: &str) -> Dict<'_> {
        Dict {
            state: self,
            name: name.to_string(),
        }
    }

    fn staged(&self, dict: &str, key: &str) -> Option<&Option<Bytes>> {
        self.stage.as_ref()?.writes.get(dict)?.get(key)
    }

    fn staged_dict(&self, dict: &str) -> Option<&HashMap<String, Option<Bytes>>> {
        self.stage.as_ref()?.writes.get(dict)
    }
}

/// Borrowed view of one named dictionary through the transaction layer.
///
/// Reads see staged writes first (read-your-writes) and staged deletes hide
/// base entries. Writes stage while a transaction is open and hit the base
/// store directly otherwise.
pub struct Dict<'a> {
    state: &'a mut TxState,
    name: String,
}

impl Dict<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(op) = self.state.staged(&self.name, key) {
            return op.clone();
        }
        self.state.base.get(&self.name, key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        match &mut self.state.stage {
            Some(stage) => {
                stage
                    .writes
                    .entry(self.name.clone())
                    .or_default()
                    .insert(key.into(), Some(value.into()));
            }
            None => self.state.base.put(&self.name, key, value),
        }
    }

    pub fn del(&mut self, key: impl Into<String>) {
        match &mut self.state.stage {
            Some(stage) => {
                stage
                    .writes
                    .entry(self.name.clone())
                    .or_default()
                    .insert(key.into(), None);
            }
            None => self.state.base.del(&self.name, &key.into()),
        }
    }

    /// Visit every live entry of the merged view exactly once. Staged puts
    /// win over base values; staged deletes are skipped.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Bytes)) {
        let staged = self.state.staged_dict(&self.name);
        if let Some(base) = self.state.base.dict_ref(&self.name) {
            for (key, value) in base {
                match staged.and_then(|s| s.get(key)) {
                    Some(Some(newer)) => f(key, newer),
                    Some(None) => {}
                    None => f(key, value),
                }
            }
        }
        if let Some(staged) = staged {
            let base = self.state.base.dict_ref(&self.name);
            for (key, op) in staged {
                let in_base = base.is_some_and(|b| b.contains_key(key));
                if let (Some(value), false) = (op, in_base) {
                    f(key, value);
                }
            }
        }
    }
}
