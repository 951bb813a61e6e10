//! Protocol decoding errors.

use thiserror::Error;

/// Reasons an inbound frame could not be turned into a [`crate::ServerEvent`].
///
/// Every variant is recoverable: the frame is dropped and the session goes on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not JSON, or has no string `type` field.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    /// The frame names a known kind but its payload does not match that kind.
    #[error("malformed `{kind}` payload: {source}")]
    MalformedPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// The message kind involved, when the envelope itself was readable.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ProtocolError::InvalidFrame(_) => None,
            ProtocolError::MalformedPayload { kind, .. } => Some(kind),
        }
    }
}
