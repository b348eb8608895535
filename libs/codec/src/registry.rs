//! Payload codec registry.
//!
//! Every payload type a hive can send or receive is registered here when
//! its handler is bound, pairing the type tag with monomorphized encode
//! and decode functions. Wire ingress uses the decode side to turn raw
//! bytes into live payloads before dispatch; proxies use the encode side
//! on the way out.

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use types::{MsgData, MsgType, Payload};

use crate::error::CodecError;

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError>;
type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError>;

struct PayloadCodec {
    encode: EncodeFn,
    decode: DecodeFn,
}

fn encode_erased<P: Payload>(any: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError> {
    let payload = any
        .downcast_ref::<P>()
        .ok_or_else(|| CodecError::encode(P::TYPE, "payload does not match its tag"))?;
    bincode::serialize(payload).map_err(|e| CodecError::encode(P::TYPE, e.to_string()))
}

fn decode_erased<P: Payload>(raw: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError> {
    let payload: P =
        bincode::deserialize(raw).map_err(|e| CodecError::decode(P::TYPE, e.to_string()))?;
    Ok(Arc::new(payload))
}

/// Tag-to-codec table shared by the dispatcher, server, and proxies.
#[derive(Default)]
pub struct PayloadRegistry {
    codecs: DashMap<MsgType, PayloadCodec>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the codec for `P::TYPE`. One registration per tag; a second
    /// registration under the same tag errors even for the same type,
    /// since handler bindings are established once and frozen.
    pub fn register<P: Payload>(&self) -> Result<(), CodecError> {
        match self.codecs.entry(P::msg_type()) {
            Entry::Occupied(_) => Err(CodecError::duplicate_type(P::TYPE)),
            Entry::Vacant(slot) => {
                slot.insert(PayloadCodec {
                    encode: encode_erased::<P>,
                    decode: decode_erased::<P>,
                });
                Ok(())
            }
        }
    }

    pub fn is_registered(&self, ty: &MsgType) -> bool {
        self.codecs.contains_key(ty)
    }

    /// Encode a message body for the wire. Bodies still carrying their
    /// wire encoding pass through untouched.
    pub fn encode_data(&self, ty: &MsgType, data: &MsgData) -> Result<Vec<u8>, CodecError> {
        match data {
            MsgData::Encoded(raw) => Ok(raw.to_vec()),
            MsgData::Local(any) => {
                let codec = self
                    .codecs
                    .get(ty)
                    .ok_or_else(|| CodecError::unknown_type(ty.as_str()))?;
                (codec.encode)(any.as_ref())
            }
        }
    }

    /// Decode a wire body into a live local payload.
    pub fn decode_data(&self, ty: &MsgType, raw: &[u8]) -> Result<MsgData, CodecError> {
        let codec = self
            .codecs
            .get(ty)
            .ok_or_else(|| CodecError::unknown_type(ty.as_str()))?;
        Ok(MsgData::Local((codec.decode)(raw)?))
    }
}
