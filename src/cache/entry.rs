//! The stored unit and its wire format.
//!
//! Entries are JSON objects with `Status`, `Headers`, `Body` and `Created`
//! fields. The body travels as standard base64 so binary payloads survive,
//! and a `null` body or header map reads back as empty. This is the same
//! layout earlier deployments wrote, so existing stores stay readable.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Headers, Response, StatusCode};

/// Errors produced while encoding or decoding a [`CachedResponse`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode cache entry: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A captured upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    #[serde(rename = "Status")]
    pub status: u16,

    #[serde(rename = "Headers", default, deserialize_with = "nullable_headers")]
    pub headers: Headers,

    #[serde(rename = "Body", default, with = "body_base64")]
    pub body: Bytes,

    /// Unix timestamp (seconds) of the write.
    #[serde(rename = "Created", default)]
    pub created_at: u64,
}

impl CachedResponse {
    /// Captures a response stamped with the current time.
    pub fn capture(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        let created_at = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self {
            status: status.as_u16(),
            headers,
            body,
            created_at,
        }
    }

    /// Serializes the entry into its stored form.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Parses a stored payload.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decode`] if the payload is not a valid entry.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::Decode)
    }

    /// Only `200` entries are ever replayed; anything else found in the store
    /// is treated as a miss.
    pub fn is_replayable(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }

    /// Converts the entry into a response for replay.
    ///
    /// Returns `None` if the stored status is not a valid HTTP status code.
    pub fn into_response(self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        Some(Response::from_parts(status, self.headers, self.body))
    }
}

fn nullable_headers<'de, D>(deserializer: D) -> Result<Headers, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Headers>::deserialize(deserializer)?.unwrap_or_default())
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Bytes::from)
                .map_err(D::Error::custom),
            None => Ok(Bytes::new()),
        }
    }
}
