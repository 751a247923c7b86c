use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-2xx response; `detail` is the backend's `detail`/`message` field
    /// or the raw body.
    #[error("backend error {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ClientError::InvalidRequest(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ClientError::Decode(msg.into())
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Pulls the human readable message out of an error body.
pub(crate) fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("detail")
            .or_else(|| value.get("message"))
            .map(|detail| match detail.as_str() {
                Some(s) => s.to_string(),
                None => detail.to_string(),
            })
            .unwrap_or_else(|| value.to_string()),
        Err(_) => body.trim().to_string(),
    }
}
