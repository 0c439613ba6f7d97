use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OrthoError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid organism: {0}")]
    InvalidOrganism(String),

    #[error("invalid source database: {0}")]
    InvalidSource(String),

    #[error("invalid release: {0}")]
    InvalidRelease(String),

    #[error("missing config file ortholist.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{path}:{line}: {message}")]
    TableParse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("lookup failed transiently: {0}")]
    LookupTransient(String),

    #[error("lookup provider unavailable: {0}")]
    #[diagnostic(help("the mapping service cannot be reached at all; the run was aborted"))]
    ProviderUnavailable(String),

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("lifecycle cycle detected starting at {start}: {revisited} visited twice")]
    #[diagnostic(help("the lifecycle change table contains a merge/split loop"))]
    LifecycleCycle { start: String, revisited: String },

    #[error("lifecycle chain starting at {start} exceeds {bound} hops")]
    LifecycleDepthExceeded { start: String, bound: usize },

    #[error("malformed group {group_id}: {reason}")]
    MalformedGroup { group_id: String, reason: String },

    #[error("run aborted after a fatal error in another source")]
    Aborted,
}

impl OrthoError {
    /// Failures worth another attempt against the same provider.
    pub fn is_transient(&self) -> bool {
        match self {
            OrthoError::LookupTransient(_) | OrthoError::UniprotHttp(_) => true,
            OrthoError::UniprotStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Systemic failures that abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrthoError::ProviderUnavailable(_) | OrthoError::Aborted
        )
    }

    pub fn is_lifecycle_corruption(&self) -> bool {
        matches!(
            self,
            OrthoError::LifecycleCycle { .. } | OrthoError::LifecycleDepthExceeded { .. }
        )
    }
}
