//! Error types shared across the crate.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the relay client, collector, and file codec.
#[derive(Debug, Error)]
pub enum Error {
    /// A relay frame failed to parse; carries the raw JSON for diagnostics.
    #[error("malformed relay message: {reason} (raw: {raw})")]
    Decode { reason: String, raw: String },

    /// Send attempted before the WebSocket reached the open state.
    #[error("connection is not open")]
    ConnectionNotOpen,

    /// The connection closed while an operation was still pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send on a closed internal channel.
    #[error("channel closed")]
    ChannelClosed,

    /// The relay refused an EVENT; carries the relay's message verbatim.
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// A subscription ended without the message the protocol requires.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// File upload requested without a MIME type.
    #[error("missing MIME type")]
    MissingMimeType,

    /// An event cannot fit within the configured message size.
    #[error("message size exceeded: {0}")]
    MessageSize(String),

    /// Key handling or signing failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] secp256k1::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}
