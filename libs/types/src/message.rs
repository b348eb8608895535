//! Message envelope and payload typing.
//!
//! Payload types opt in explicitly via [`Payload`] and its `TYPE` tag; the
//! runtime refuses two registrations under the same tag, and the tag is the
//! wire discriminant. No type names are derived by reflection.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::BeeId;

/// Wire tag identifying a payload type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgType(String);

impl MsgType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MsgType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

/// A value that can travel between bees.
///
/// `TYPE` must be globally unique across the deployment; it is carried on
/// the wire and drives handler lookup on the receiving side.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn msg_type() -> MsgType {
        MsgType::new(Self::TYPE)
    }
}

/// Message body. Local hops share the payload by `Arc`; bodies read off the
/// wire stay encoded until the ingress decodes them against the registry.
#[derive(Clone)]
pub enum MsgData {
    Local(Arc<dyn Any + Send + Sync>),
    Encoded(Bytes),
}

impl MsgData {
    pub fn local<P: Payload>(payload: P) -> Self {
        MsgData::Local(Arc::new(payload))
    }

    /// Typed view of a local body. `None` for encoded bodies or a tag/type
    /// mismatch.
    pub fn downcast<P: Payload>(&self) -> Option<Arc<P>> {
        match self {
            MsgData::Local(any) => Arc::clone(any).downcast::<P>().ok(),
            MsgData::Encoded(_) => None,
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self, MsgData::Encoded(_))
    }
}

impl fmt::Debug for MsgData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgData::Local(_) => f.write_str("Local(..)"),
            MsgData::Encoded(bytes) => write!(f, "Encoded({} bytes)", bytes.len()),
        }
    }
}

/// The envelope every message travels in.
///
/// `from` is unset for messages emitted from outside any bee; `to` is unset
/// until routing resolves an owner (map routing) or the sender directs the
/// message explicitly.
#[derive(Debug, Clone)]
pub struct Msg {
    pub ty: MsgType,
    pub from: BeeId,
    pub to: BeeId,
    pub data: MsgData,
}

impl Msg {
    pub fn new<P: Payload>(payload: P) -> Self {
        Self {
            ty: P::msg_type(),
            from: BeeId::default(),
            to: BeeId::default(),
            data: MsgData::local(payload),
        }
    }

    pub fn directed<P: Payload>(payload: P, to: BeeId) -> Self {
        let mut msg = Self::new(payload);
        msg.to = to;
        msg
    }

    pub fn is_directed(&self) -> bool {
        !self.to.is_unset()
    }

    /// Typed view of a decoded body.
    pub fn payload<P: Payload>(&self) -> Option<Arc<P>> {
        if self.ty.as_str() != P::TYPE {
            return None;
        }
        self.data.downcast::<P>()
    }
}
