//! Client-side error type.

use thiserror::Error;

/// Failures reported synchronously to callers of the client API.
///
/// Transport trouble never shows up here: it is absorbed into connection
/// state transitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// An outbound application message was attempted while not `Connected`.
    #[error("not connected")]
    NotConnected,

    /// The connection task has stopped; the handle is no longer usable.
    #[error("client has shut down")]
    Shutdown,

    #[error("invalid bid amount: {0}")]
    InvalidAmount(f64),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
