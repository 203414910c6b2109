use std::fmt;

/// Structured Redfish client errors, so the Executor can match on variants
/// directly instead of sniffing `Display` strings.
#[derive(Debug, Clone)]
pub enum RedfishError {
    Transport(String),
    Http { status: u16, body: String },
    Decode(String),
    Config(String),
}

impl fmt::Display for RedfishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedfishError::Transport(s) => write!(f, "redfish transport error: {s}"),
            RedfishError::Http { status, body } => {
                write!(f, "redfish http error: status={status} body={body}")
            }
            RedfishError::Decode(s) => write!(f, "redfish response decode error: {s}"),
            RedfishError::Config(s) => write!(f, "redfish config error: {s}"),
        }
    }
}

impl std::error::Error for RedfishError {}

impl RedfishError {
    /// Classifies whether the error is worth retrying: timeouts,
    /// 408/429/5xx, connection reset/refused, and DNS failures are
    /// retryable; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RedfishError::Http { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            RedfishError::Transport(msg) => {
                let m = msg.to_lowercase();
                m.contains("timed out")
                    || m.contains("timeout")
                    || m.contains("connection reset")
                    || m.contains("connection refused")
                    || m.contains("dns")
                    || m.contains("failed to lookup address")
            }
            RedfishError::Decode(_) | RedfishError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for RedfishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RedfishError::Transport(format!("timed out: {e}"))
        } else if e.is_connect() {
            RedfishError::Transport(format!("connection error: {e}"))
        } else if e.is_decode() {
            RedfishError::Decode(e.to_string())
        } else {
            RedfishError::Transport(e.to_string())
        }
    }
}
