use std::fmt;

#[derive(Debug, Clone)]
pub enum InventoryError {
    Transport(String),
    Http { status: u16, body: String },
    Decode(String),
    UnsupportedState(String),
}

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryError::Transport(s) => write!(f, "inventory transport error: {s}"),
            InventoryError::Http { status, body } => {
                write!(f, "inventory http error: status={status} body={body}")
            }
            InventoryError::Decode(s) => write!(f, "inventory response decode error: {s}"),
            InventoryError::UnsupportedState(s) => write!(f, "unsupported inventory state: {s}"),
        }
    }
}

impl std::error::Error for InventoryError {}

impl From<reqwest::Error> for InventoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            InventoryError::Transport(e.to_string())
        } else if e.is_decode() {
            InventoryError::Decode(e.to_string())
        } else {
            InventoryError::Transport(e.to_string())
        }
    }
}

/// Maps a verified power state to the inventory service's logical state:
/// `"on" -> "Ready"`, `"off" -> "Off"`. Anything else fails fast.
pub fn map_power_state_to_inventory_state(power_state: &str) -> Result<&'static str, InventoryError> {
    match power_state.to_ascii_lowercase().as_str() {
        "on" => Ok("Ready"),
        "off" => Ok("Off"),
        other => Err(InventoryError::UnsupportedState(other.to_string())),
    }
}
