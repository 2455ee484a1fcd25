//! Error types for the modbox runtime

use std::fmt;
use thiserror::Error;

/// Main error type for modbox
#[derive(Error, Debug)]
pub enum Error {
    /// File or project missing
    #[error("NotFound: {0}")]
    NotFound(String),

    /// Duplicate project name
    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    /// Registry returned 404 for a package
    #[error("PackageNotFound: '{0}' does not exist in the registry")]
    PackageNotFound(String),

    /// No published version satisfies the requested range
    #[error("NoMatchingVersion: no version of '{name}' satisfies '{range}'")]
    NoMatchingVersion { name: String, range: String },

    /// Transient fetch failure; retryable
    #[error("NetworkError: {0}")]
    NetworkError(String),

    /// Tarball decompression or parse failed
    #[error("CorruptTarball: {0}")]
    CorruptTarball(String),

    /// The resolver found no candidate for a required specifier
    #[error("ModuleNotFound: cannot resolve '{specifier}' from '{requester}'")]
    ModuleNotFound { specifier: String, requester: String },

    /// The transpiler reported a syntax or transform failure
    #[error("TranspileError: {file}: {message}")]
    TranspileError { file: String, message: String },

    /// A transpile request exceeded its deadline
    #[error("TranspileTimeout: {file}: worker exceeded {deadline_ms}ms")]
    TranspileTimeout { file: String, deadline_ms: u64 },

    /// User code threw during evaluation
    #[error("EvaluationError: {file}: {message}")]
    EvaluationError { file: String, message: String },

    /// Malformed manifest or other invalid input
    #[error("InvalidManifest: {0}")]
    InvalidManifest(String),

    /// IO error from the host filesystem (CLI mirroring only)
    #[error("IOError: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// Internal invariant violation
    #[error("InternalError: {0}")]
    InternalError(String),
}

/// Coarse classification used for user-facing install/run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PackageNotFound,
    NoMatchingVersion,
    NetworkError,
    CorruptTarball,
    ModuleNotFound,
    TranspileError,
    TranspileTimeout,
    EvaluationError,
    InvalidManifest,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::AlreadyExists => write!(f, "AlreadyExists"),
            ErrorKind::PackageNotFound => write!(f, "PackageNotFound"),
            ErrorKind::NoMatchingVersion => write!(f, "NoMatchingVersion"),
            ErrorKind::NetworkError => write!(f, "NetworkError"),
            ErrorKind::CorruptTarball => write!(f, "CorruptTarball"),
            ErrorKind::ModuleNotFound => write!(f, "ModuleNotFound"),
            ErrorKind::TranspileError => write!(f, "TranspileError"),
            ErrorKind::TranspileTimeout => write!(f, "TranspileTimeout"),
            ErrorKind::EvaluationError => write!(f, "EvaluationError"),
            ErrorKind::InvalidManifest => write!(f, "InvalidManifest"),
            ErrorKind::Io => write!(f, "IOError"),
            ErrorKind::Internal => write!(f, "InternalError"),
        }
    }
}

impl Error {
    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create an AlreadyExists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Error::AlreadyExists(what.into())
    }

    /// Create a NetworkError
    pub fn network(message: impl Into<String>) -> Self {
        Error::NetworkError(message.into())
    }

    /// Create a CorruptTarball error
    pub fn corrupt_tarball(message: impl Into<String>) -> Self {
        Error::CorruptTarball(message.into())
    }

    /// Create a ModuleNotFound error
    pub fn module_not_found(specifier: impl Into<String>, requester: impl Into<String>) -> Self {
        Error::ModuleNotFound {
            specifier: specifier.into(),
            requester: requester.into(),
        }
    }

    /// Create a TranspileError for a file
    pub fn transpile(file: impl Into<String>, message: impl Into<String>) -> Self {
        Error::TranspileError {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an EvaluationError for a file
    pub fn evaluation(file: impl Into<String>, message: impl Into<String>) -> Self {
        Error::EvaluationError {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidManifest error
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Error::InvalidManifest(message.into())
    }

    /// Create an InternalError
    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalError(message.into())
    }

    /// Coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::PackageNotFound(_) => ErrorKind::PackageNotFound,
            Error::NoMatchingVersion { .. } => ErrorKind::NoMatchingVersion,
            Error::NetworkError(_) => ErrorKind::NetworkError,
            Error::CorruptTarball(_) => ErrorKind::CorruptTarball,
            Error::ModuleNotFound { .. } => ErrorKind::ModuleNotFound,
            Error::TranspileError { .. } => ErrorKind::TranspileError,
            Error::TranspileTimeout { .. } => ErrorKind::TranspileTimeout,
            Error::EvaluationError { .. } => ErrorKind::EvaluationError,
            Error::InvalidManifest(_) => ErrorKind::InvalidManifest,
            Error::IoError { .. } => ErrorKind::Io,
            Error::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether a failed operation may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkError(_))
    }
}

/// Result type alias for modbox
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::module_not_found("lodash", "/index.js").kind(),
            ErrorKind::ModuleNotFound
        );
        assert_eq!(
            Error::NoMatchingVersion {
                name: "kleur".to_string(),
                range: "^99.0.0".to_string()
            }
            .kind(),
            ErrorKind::NoMatchingVersion
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::network("connection reset").is_retryable());
        assert!(!Error::PackageNotFound("nope".to_string()).is_retryable());
        assert!(!Error::corrupt_tarball("bad gzip magic").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::module_not_found("./missing", "/src/app.js");
        let msg = format!("{}", err);
        assert!(msg.contains("./missing"));
        assert!(msg.contains("/src/app.js"));
    }
}
