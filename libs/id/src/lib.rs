//! # shoal-id
//!
//! Job identity encoding and validated name types for the shoal controller.
//!
//! ## Job Identifier Format
//!
//! Every job scheduled by the controller is named `{app}-{token}.{suffix}`:
//!
//! - `app` is the owning application ID
//! - `token` is either a formation type (`web`, `worker`) or the literal `run`
//!   for one-shot jobs
//! - `suffix` is 16 random bytes, URL-safe base64 without padding (22 chars)
//!
//! Examples:
//! - `blog-web.3q2-7wEjR1uXK0bFZ7yQ8A`
//! - `blog-run.Zp0kW9c1Vb2gHh3N4m5Q6w`
//!
//! The string form is the only association between a job and its formation
//! that other services see. Inside the controller the identifier is always
//! handled as a structured [`JobId`] and only rendered at the boundary.

mod error;
mod job;
mod macros;
mod random;
mod types;

pub use error::IdError;
pub use job::{JobId, JobKind, RUN_TOKEN};
pub use random::{random_suffix, SUFFIX_BYTES, SUFFIX_LEN};
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
