use std::time::Duration;

use thiserror::Error;

use crate::registry::RegistryError;

/// Broad classes of attach failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachErrorKind {
    /// The agent could not be found or reached.
    Connectivity,
    /// The agent answered but the exchange failed.
    Protocol,
    /// A bounded step ran out of time.
    Timeout,
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to resolve {service}: {source}")]
    Resolve {
        service: String,
        #[source]
        source: RegistryError,
    },

    #[error("no online addresses for {0}")]
    NoAddresses(String),

    #[error("failed to connect to attach agent at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode attach request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send attach request: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to read attach status: {0}")]
    Read(#[source] std::io::Error),

    #[error("attach agent error: {0}")]
    Agent(String),

    #[error("attach stream failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("timed out after {after:?} {stage}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("attach session cancelled")]
    Cancelled,

    #[error("attach session result already taken")]
    AlreadyAwaited,
}

impl AttachError {
    pub fn kind(&self) -> AttachErrorKind {
        match self {
            Self::Resolve { .. } | Self::NoAddresses(_) | Self::Connect { .. } => {
                AttachErrorKind::Connectivity
            }
            Self::Timeout { .. } => AttachErrorKind::Timeout,
            _ => AttachErrorKind::Protocol,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == AttachErrorKind::Timeout
    }
}
