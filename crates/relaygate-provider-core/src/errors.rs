use std::error::Error;
use std::fmt;

use relaygate_protocol::RelayMode;

pub type AdaptorResult<T> = Result<T, AdaptorError>;

#[derive(Debug, Clone)]
pub enum AdaptorError {
    UnsupportedMode(RelayMode),
    InvalidConfig(String),
    Encode(String),
    Other(String),
}

impl fmt::Display for AdaptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptorError::UnsupportedMode(mode) => write!(f, "unsupported relay mode: {mode}"),
            AdaptorError::InvalidConfig(msg) => write!(f, "invalid channel config: {msg}"),
            AdaptorError::Encode(msg) => write!(f, "encode request failed: {msg}"),
            AdaptorError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for AdaptorError {}

impl From<serde_json::Error> for AdaptorError {
    fn from(value: serde_json::Error) -> Self {
        AdaptorError::Encode(value.to_string())
    }
}
