//! Pluggable value encoding
//!
//! Primitives move opaque bytes over the wire; typed handles encode user
//! values with a [`Serializer`]. MessagePack is the default because it is
//! compact and self-describing.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Value encoding used by typed primitive handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    /// MessagePack via `rmp-serde`
    #[default]
    MsgPack,
    /// JSON via `serde_json`
    Json,
}

impl Serializer {
    /// Encode a value
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::MsgPack => Ok(rmp_serde::to_vec(value)?),
            Serializer::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode a value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Serializer::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Serializer::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
