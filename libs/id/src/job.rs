//! Structured job identifiers.

use crate::random::random_suffix;
use crate::{AppId, FormationType, IdError};

/// Type token used for one-shot jobs.
pub const RUN_TOKEN: &str = "run";

/// What kind of job an identifier names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobKind {
    /// A replica managed by a formation of the given type.
    Formation(FormationType),
    /// A one-shot job started through the run endpoint.
    Run,
}

impl JobKind {
    /// The token written between the app ID and the random suffix.
    pub fn token(&self) -> &str {
        match self {
            JobKind::Formation(t) => t.as_str(),
            JobKind::Run => RUN_TOKEN,
        }
    }
}

/// A job identifier: `{app}-{token}.{suffix}`.
///
/// App IDs and type tokens never contain `.`, so the first `.` ends the
/// `{app}-{token}.` prefix. Everything after it is the suffix. Generated
/// suffixes are 22 URL-safe base64 characters, but parsing accepts any
/// non-empty suffix without whitespace or `/`, so every job carrying a
/// formation's prefix is recognised as part of that formation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId {
    app: AppId,
    kind: JobKind,
    suffix: String,
}

impl JobId {
    /// Creates a fresh identifier for a formation replica.
    #[must_use]
    pub fn formation(app: AppId, formation_type: FormationType) -> Self {
        Self {
            app,
            kind: JobKind::Formation(formation_type),
            suffix: random_suffix(),
        }
    }

    /// Creates a fresh identifier for a one-shot job.
    #[must_use]
    pub fn run(app: AppId) -> Self {
        Self {
            app,
            kind: JobKind::Run,
            suffix: random_suffix(),
        }
    }

    pub fn app(&self) -> &AppId {
        &self.app
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns true if this job belongs to `app` and is of `kind`.
    pub fn belongs_to(&self, app: &AppId, kind: &JobKind) -> bool {
        &self.app == app && &self.kind == kind
    }

    /// The `{app}-{token}.` prefix shared by every job of this app and kind.
    pub fn prefix(app: &AppId, kind: &JobKind) -> String {
        format!("{}-{}.", app, kind.token())
    }

    /// Parses an identifier from its string form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let Some((prefix, suffix)) = s.split_once('.') else {
            return Err(IdError::MissingSuffix(s.to_string()));
        };

        if suffix.is_empty() || suffix.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(IdError::InvalidSuffix(s.to_string()));
        }

        // Type tokens never contain '-', so the last one separates app from type.
        let Some((app, token)) = prefix.rsplit_once('-') else {
            return Err(IdError::MissingSeparator(s.to_string()));
        };

        let app = AppId::new(app)?;
        let kind = if token == RUN_TOKEN {
            JobKind::Run
        } else {
            JobKind::Formation(FormationType::new(token)?)
        };

        Ok(Self {
            app,
            kind,
            suffix: suffix.to_string(),
        })
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}.{}", self.app, self.kind.token(), self.suffix)
    }
}

impl std::str::FromStr for JobId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
