//! Client-side hub errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("hub connection is not started")]
    NotConnected,

    #[error("hub connection closed")]
    Disconnected,

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("invocation of '{method}' failed: {error}")]
    Invocation { method: String, error: String },
}
