//! Error taxonomy shared by every module of the crate.

/// Errors produced by the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport handshake or a send on the connection failed, or the
    /// session is not connected.
    #[error("connection error: {0}")]
    Connection(String),

    /// A subscription request that can never match anything.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// A subscription with this id is already open on the session.
    #[error("subscription `{0}` is already open")]
    DuplicateSubscription(String),

    /// Shareable (bech32) text could not be decoded or encoded.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// The event id or signature does not match the event's content.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// An inbound relay frame does not have the structure its tag claims.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Key material is not a valid secp256k1 scalar or point.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// JSON serialization or parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<bech32::Error> for Error {
    fn from(err: bech32::Error) -> Self {
        Error::MalformedEncoding(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
