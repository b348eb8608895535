//! Codec-level errors.
//!
//! Frame corruption and oversize conditions poison the connection they
//! occur on; registry errors are per-payload and leave the stream usable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame fails its structural or checksum invariants. The stream can
    /// no longer be trusted.
    #[error("corrupt frame: {message}")]
    Corrupt { message: String },

    #[error("frame of {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("failed to encode {type_tag}: {message}")]
    Encode { type_tag: String, message: String },

    #[error("failed to decode {type_tag}: {message}")]
    Decode { type_tag: String, message: String },

    #[error("no payload codec registered for {type_tag}")]
    UnknownType { type_tag: String },

    #[error("payload codec already registered for {type_tag}")]
    DuplicateType { type_tag: String },
}

impl CodecError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn too_large(size: usize, max: usize) -> Self {
        Self::TooLarge { size, max }
    }

    pub fn encode(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    pub fn decode(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    pub fn unknown_type(type_tag: impl Into<String>) -> Self {
        Self::UnknownType {
            type_tag: type_tag.into(),
        }
    }

    pub fn duplicate_type(type_tag: impl Into<String>) -> Self {
        Self::DuplicateType {
            type_tag: type_tag.into(),
        }
    }

    /// True when the peer simply closed the stream between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }

    /// True when the stream itself can no longer be trusted.
    pub fn poisons_stream(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Corrupt { .. } | Self::TooLarge { .. }
        )
    }
}
