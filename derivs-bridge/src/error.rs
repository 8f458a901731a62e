use thiserror::Error;

/// All errors generated in `derivs-bridge`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("invalid mark price for nearest cluster query: {0}")]
    InvalidMarkPrice(f64),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("failed to deserialise payload: {error}, payload: {payload}")]
    Deserialise { error: String, payload: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream rejected request with code {code}: {msg}")]
    Upstream { code: String, msg: String },
}

impl DataError {
    /// Determine if an error requires a [`StreamConnection`](crate::streams::connection::StreamConnection)
    /// to tear down the current session and reconnect.
    ///
    /// A single malformed frame is not terminal, it is skipped and the session continues.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::Socket(_) => true,
            _ => false,
        }
    }

    /// Construct a [`DataError::Deserialise`] from a serde error and the offending payload.
    ///
    /// Payloads are truncated so a garbage frame cannot flood the logs.
    pub fn deserialise(error: impl std::fmt::Display, payload: &str) -> Self {
        const MAX_PAYLOAD_CHARS: usize = 256;
        Self::Deserialise {
            error: error.to_string(),
            payload: payload.chars().take(MAX_PAYLOAD_CHARS).collect(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}
