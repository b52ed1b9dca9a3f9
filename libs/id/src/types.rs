//! Validated name types used across the controller.
//!
//! App IDs, formation types and host IDs are user or cluster supplied labels.
//! They are validated on construction so that a job identifier built from them
//! can always be decoded again without ambiguity.

use crate::define_name;
use crate::job::RUN_TOKEN;
use crate::IdError;

fn reject_empty(what: &'static str, value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { what });
    }
    Ok(())
}

fn reject_chars(what: &'static str, value: &str, reserved: &[char]) -> Result<(), IdError> {
    if let Some(found) = value.chars().find(|c| reserved.contains(c)) {
        return Err(IdError::ReservedCharacter {
            what,
            value: value.to_string(),
            found,
        });
    }
    Ok(())
}

/// An app ID may contain `-` (the type token never does) but not `.`,
/// which starts the random suffix.
fn validate_app_id(what: &'static str, value: &str) -> Result<(), IdError> {
    reject_empty(what, value)?;
    reject_chars(what, value, &['.', '/'])
}

fn validate_formation_type(what: &'static str, value: &str) -> Result<(), IdError> {
    reject_empty(what, value)?;
    reject_chars(what, value, &['-', '.', '/'])?;
    if value == RUN_TOKEN {
        return Err(IdError::Reserved {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn validate_host_id(what: &'static str, value: &str) -> Result<(), IdError> {
    reject_empty(what, value)?;
    if let Some(found) = value.chars().find(|c| c.is_whitespace() || *c == '/') {
        return Err(IdError::ReservedCharacter {
            what,
            value: value.to_string(),
            found,
        });
    }
    Ok(())
}

define_name!(AppId, "app ID", validate_app_id);
define_name!(FormationType, "formation type", validate_formation_type);
define_name!(HostId, "host ID", validate_host_id);

// =============================================================================
// Request IDs
// =============================================================================

/// Correlation ID for a single API request, formatted `req_{ulid}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(ulid::Ulid);

impl RequestId {
    /// The prefix for request IDs.
    pub const PREFIX: &'static str = "req";

    /// Creates a new request ID with a fresh ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parses a request ID in the form `req_{ulid}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let Some(ulid_str) = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            return Err(IdError::InvalidRequestId(s.to_string()));
        };

        ulid_str
            .parse::<ulid::Ulid>()
            .map(Self)
            .map_err(|e| IdError::InvalidRequestId(e.to_string()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
