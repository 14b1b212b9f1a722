use std::fmt;

use thiserror::Error;

use crate::condition::ErrorCode;

/// Whether a failed fetch is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    /// Timeouts, connection resets, throttling and server-side errors.
    Transient,
    /// Authentication failures, missing artifacts and other client errors.
    Permanent,
}

impl fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailureKind::Transient => write!(f, "transient"),
            FetchFailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Canopy error types
#[derive(Error, Debug)]
pub enum CanopyError {
    /// Referenced installation, secret or artifact does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Malformed component name, version or repository location
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// No backend registered for the requested repository type
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Network or authentication failure while talking to a registry
    #[error("Fetch failed ({kind}): {reference} - {message}")]
    FetchFailed {
        reference: String,
        kind: FetchFailureKind,
        /// HTTP status reported by the registry, if any
        status: Option<u16>,
        message: String,
    },

    /// An artifact was found but could not be decoded
    #[error("Malformed artifact: {reference} - {message}")]
    Malformed { reference: String, message: String },

    /// The caller cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Failure while processing a specific installation
    #[error("Installation {installation}: {source}")]
    Installation {
        installation: String,
        #[source]
        source: Box<CanopyError>,
    },

    /// Artifact cache error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CanopyError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CanopyError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Attach the name of the installation being processed.
    pub fn within_installation(self, installation: impl Into<String>) -> Self {
        CanopyError::Installation {
            installation: installation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping installation wrappers.
    pub fn root_cause(&self) -> &CanopyError {
        let mut current = self;
        while let CanopyError::Installation { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), CanopyError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), CanopyError::Cancelled(_))
    }

    /// Whether a driver should retry the failed operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root_cause(),
            CanopyError::FetchFailed {
                kind: FetchFailureKind::Transient,
                ..
            } | CanopyError::Cancelled(_)
        )
    }

    /// Error code surfaced on installation conditions for terminal failures.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.root_cause() {
            CanopyError::FetchFailed {
                status: Some(401 | 403),
                ..
            } => Some(ErrorCode::Unauthorized),
            CanopyError::InvalidReference(_)
            | CanopyError::UnsupportedBackend(_)
            | CanopyError::Malformed { .. }
            | CanopyError::ConfigError(_) => Some(ErrorCode::ConfigurationProblem),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(err: serde_json::Error) -> Self {
        CanopyError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CanopyError {
    fn from(err: serde_yaml::Error) -> Self {
        CanopyError::SerializationError(err.to_string())
    }
}

/// Result type alias for Canopy operations
pub type Result<T> = std::result::Result<T, CanopyError>;
