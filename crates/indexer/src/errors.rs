//! Error and warning types for the resolution & indexing engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{AsRefStr, Display};
use thiserror::Error;
use tracing::warn;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal errors. Any of these aborts the run before output is written.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration is malformed or contradictory
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An internal invariant failed; names the offending key or path
    #[error("integrity violation at `{key}`: {message}")]
    IntegrityViolation { key: String, message: String },

    /// The run was cancelled cooperatively
    #[error("operation cancelled {stage}")]
    Cancelled { stage: String },

    /// IO operations failed
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl EngineError {
    pub fn integrity(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors, raised before any analysis starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("invalid scope hierarchy at `{scope}`: {reason}")]
    ScopeTree { scope: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors a single collector can report for its whole run
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("collector cancelled")]
    Cancelled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WarningKind {
    /// A unit (or a whole collector) was excluded from the fact set
    FactCollection,
    /// Evidence or an index entry was truncated to its configured ceiling
    ResourceLimitExceeded,
    /// A fact referenced a scope missing from the configured hierarchy
    UnknownScope,
    /// A module declared a dependency on a module nobody declares
    UnknownModuleDependency,
    /// Two different declarations claimed the same symbol id
    DuplicateSymbol,
    /// Two different entry points share kind and identifier
    DuplicateEntryPoint,
}

/// Recoverable problem, reported in the warnings document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    /// Identity of the unit, key or entity concerned
    pub subject: String,
    pub message: String,
}

/// Append-only warning collector shared by the phases of one run
#[derive(Debug, Default, Clone)]
pub struct WarningLog {
    warnings: Vec<Warning>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) {
        let warning = Warning {
            kind,
            subject: subject.into(),
            message: message.into(),
        };
        warn!("{}: {} ({})", warning.kind, warning.message, warning.subject);
        self.warnings.push(warning);
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    /// Sorted, de-duplicated warnings
    pub fn into_sorted(mut self) -> Vec<Warning> {
        self.warnings.sort();
        self.warnings.dedup();
        self.warnings
    }
}
