//! Wire codec for hive-to-hive transport.
//!
//! Three pieces: a payload registry mapping type tags to encode/decode
//! functions (installed at handler registration, never derived by
//! reflection), the tagged records every connection speaks, and a framed
//! connection wrapper moving records over a byte stream with a length
//! prefix and crc32 integrity check.

pub mod error;
pub mod frame;
pub mod registry;
pub mod wire;

pub use error::CodecError;
pub use frame::{FramedConn, DEFAULT_MAX_FRAME_SIZE};
pub use registry::PayloadRegistry;
pub use wire::{ConnKind, Handshake, WireCmd, WireCmdReply, WireMsg, WireRecord};
