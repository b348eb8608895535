//! Core identity and message types for the apiary runtime.
//!
//! Everything here is deliberately dependency-light so it can be shared by
//! the state, codec, and runtime crates without dragging the async stack
//! along. Identities are newtypes (a `HiveId` is a listen address, a
//! `BeeId` pins one actor on one hive), messages are a small envelope whose
//! body is either a live `Arc` for in-process hops or raw bytes straight
//! off the wire.

pub mod cells;
pub mod ids;
pub mod message;

pub use cells::{MapSet, MappedCell};
pub use ids::{AppName, BeeId, HiveId};
pub use message::{Msg, MsgData, MsgType, Payload};
