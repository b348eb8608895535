//! Transactional in-memory dictionary store.
//!
//! Each bee owns its store exclusively, which keeps everything here
//! synchronous and lock-free. [`InMemState`] is the base store (named
//! dictionaries of opaque byte values); [`TxState`] layers an optional
//! staged transaction on top so a handler's effects commit or abort as a
//! unit. Snapshots serialize the committed base only.

pub mod error;
pub mod inmem;
pub mod tx;

pub use error::StateError;
pub use inmem::InMemState;
pub use tx::{Dict, TxState, TxStatus};
