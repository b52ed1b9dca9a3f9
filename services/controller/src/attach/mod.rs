//! Interactive attach to running jobs.
//!
//! Every host runs an attach agent, registered in the service registry as
//! `{service}.{host}`. The [`AttachClient`] performs the handshake with it and
//! hands back an [`AttachSession`]; the [`StreamBridge`] then couples that
//! session to a hijacked HTTP connection.

mod bridge;
mod client;
mod error;
pub mod protocol;

pub use bridge::{BridgeOutcome, StreamBridge};
pub use client::{AttachClient, AttachConfig, AttachSession};
pub use error::{AttachError, AttachErrorKind};
pub use protocol::{AttachFlags, AttachRequest, AttachStatus};
