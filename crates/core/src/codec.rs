//! Object <-> bytes encoding.
//!
//! Registries treat encoded bytes as opaque: they only ever hand them back to
//! the same codec. The trait is object-safe and works on JSON values so that a
//! single `Arc<dyn Codec>` can serve every kind.

use serde_json::{Map, Value};

use crate::Object;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding {kind}: expected a JSON object")]
    NotAnObject { kind: String },
    #[error("decoding {expected}: found kind {found}")]
    KindMismatch { expected: String, found: String },
}

pub trait Codec: Send + Sync {
    fn encode_value(&self, kind: &str, value: Value) -> Result<Vec<u8>, CodecError>;
    fn decode_value(&self, kind: &str, data: &[u8]) -> Result<Value, CodecError>;
}

/// Encode a typed object with `codec`.
pub fn encode<T: Object>(codec: &dyn Codec, obj: &T) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(obj).map_err(|source| CodecError::Encode { kind: T::KIND.to_string(), source })?;
    codec.encode_value(T::KIND, value)
}

/// Decode bytes produced by [`encode`] back into `T`.
pub fn decode<T: Object>(codec: &dyn Codec, data: &[u8]) -> Result<T, CodecError> {
    let value = codec.decode_value(T::KIND, data)?;
    serde_json::from_value(value).map_err(|source| CodecError::Decode { kind: T::KIND.to_string(), source })
}

/// JSON codec that wraps objects in a `kind`/`apiVersion` envelope.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    api_version: String,
}

impl JsonCodec {
    pub const DEFAULT_API_VERSION: &'static str = "v1beta1";

    pub fn new(api_version: impl Into<String>) -> Self {
        Self { api_version: api_version.into() }
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_API_VERSION)
    }
}

impl Codec for JsonCodec {
    fn encode_value(&self, kind: &str, value: Value) -> Result<Vec<u8>, CodecError> {
        let Value::Object(fields) = value else {
            return Err(CodecError::NotAnObject { kind: kind.to_string() });
        };
        let mut envelope = Map::with_capacity(fields.len() + 2);
        envelope.insert("kind".to_string(), Value::String(kind.to_string()));
        envelope.insert("apiVersion".to_string(), Value::String(self.api_version.clone()));
        envelope.extend(fields);
        serde_json::to_vec(&Value::Object(envelope)).map_err(|source| CodecError::Encode { kind: kind.to_string(), source })
    }

    fn decode_value(&self, kind: &str, data: &[u8]) -> Result<Value, CodecError> {
        let value: Value =
            serde_json::from_slice(data).map_err(|source| CodecError::Decode { kind: kind.to_string(), source })?;
        let Value::Object(mut fields) = value else {
            return Err(CodecError::NotAnObject { kind: kind.to_string() });
        };
        if let Some(found) = fields.remove("kind") {
            let found = found.as_str().unwrap_or_default();
            if !found.is_empty() && found != kind {
                return Err(CodecError::KindMismatch { expected: kind.to_string(), found: found.to_string() });
            }
        }
        fields.remove("apiVersion");
        Ok(Value::Object(fields))
    }
}
