use std::path::PathBuf;

/// Failure of a single request to the agent.
///
/// `Display` yields the message shown to the user, unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The agent answered with a non-2xx status. `message` is the response
    /// body, or the status phrase when the body was empty.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The request never produced a response.
    #[error("{0}")]
    Network(String),
    /// A 2xx response whose body was not the expected JSON.
    #[error("invalid response from agent: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Invalid or unreadable client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("agent_origin {origin:?} is not a valid http(s) URL")]
    InvalidOrigin { origin: String },
    #[error("{0}")]
    Invalid(String),
}
