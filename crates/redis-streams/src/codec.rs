//! Pluggable payload encoding.
//!
//! The core never interprets application payloads — it only calls
//! `encode`/`decode` and asks a `TypeNameMapper` for the logical type name
//! to stamp on the wire. Message encoding/decoding is an external
//! collaborator by design (see spec §1); this module defines the seam and
//! ships one reference JSON implementation used by the test suite.

use crate::error::CodecError;

/// Encodes and decodes application payloads to/from the bytes stored in a
/// stream entry's payload field.
pub trait MessageEncoder: Send + Sync {
    /// Encode a payload for the given logical type name.
    fn encode(&self, type_name: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes previously produced by [`MessageEncoder::encode`] back
    /// into application payload bytes.
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Maps between a logical type name and whatever runtime type identifies
/// an application message. The core only ever deals in the string form;
/// this trait exists so callers with a richer type registry (e.g. one
/// keyed by `TypeId` or a generated enum) can plug it in without the core
/// caring.
pub trait TypeNameMapper: Send + Sync {
    fn type_name_for(&self, type_hint: &str) -> String;
}

/// Identity encoder: stores payload bytes unchanged. Useful when callers
/// have already serialized their payload (e.g. to JSON) before handing it
/// to [`crate::sink::StreamSink`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl MessageEncoder for PassthroughEncoder {
    fn encode(&self, _type_name: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(payload.to_vec())
    }

    fn decode(&self, _type_name: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// Reference JSON-based encoder: validates that `payload` is itself valid
/// JSON on encode (round-tripping it to normalize it) and that `bytes`
/// parses as JSON on decode. Used by the integration tests in this crate;
/// application code typically supplies its own encoder tied to a concrete
/// message registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl MessageEncoder for JsonEncoder {
    fn encode(&self, type_name: &str, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| CodecError::Encode {
                type_name: type_name.to_string(),
                source: e.into(),
            })?;
        serde_json::to_vec(&value).map_err(|e| CodecError::Encode {
            type_name: type_name.to_string(),
            source: e.into(),
        })
    }

    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
                type_name: type_name.to_string(),
                source: e.into(),
            })?;
        serde_json::to_vec(&value).map_err(|e| CodecError::Decode {
            type_name: type_name.to_string(),
            source: e.into(),
        })
    }
}
