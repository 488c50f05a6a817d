//! Per-server error records.
//!
//! Exactly one record is kept per server (latest-only). Whether a new record
//! may replace the current one depends on how specific each classification
//! is; see [`ErrorKind::replaceable_by`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a server-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Missing or rejected credentials (401/403, "API key", ...).
    Auth,
    /// Network-level failure (refused, timeout, socket).
    Connection,
    /// Resource exhaustion (OOM kill, exit 137).
    Resource,
    /// Missing package/module/import.
    Dependency,
    /// Invalid or missing configuration.
    Config,
    /// Unexpected runtime failure.
    Runtime,
    /// Derived from a failed health probe.
    Health,
    /// Could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Whether a record of this kind may be replaced by a record of `new`.
    ///
    /// Generic kinds (`health`, `runtime`, `unknown`) yield to anything.
    /// `auth` is only replaced by another `auth`. The remaining kinds are
    /// specific enough that a generic probe failure must not clobber them.
    #[must_use]
    pub fn replaceable_by(self, new: Self) -> bool {
        match self {
            Self::Health | Self::Runtime | Self::Unknown => true,
            Self::Auth => new == Self::Auth,
            Self::Connection | Self::Resource | Self::Dependency | Self::Config => {
                !matches!(new, Self::Health | Self::Runtime | Self::Unknown)
            }
        }
    }
}

/// Latest recorded error for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Human-readable message, already stripped of log prefixes.
    pub last_error: String,
    /// Classification.
    pub error_type: ErrorKind,
    /// When the error was observed.
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            last_error: message.into(),
            error_type: kind,
            at: Utc::now(),
        }
    }

    /// Apply the replacement policy: returns true if `new` should be stored
    /// over `current`.
    #[must_use]
    pub fn should_replace(current: Option<&Self>, new_kind: ErrorKind) -> bool {
        current.is_none_or(|record| record.error_type.replaceable_by(new_kind))
    }
}
