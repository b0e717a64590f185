//! Error types for resource loading, content conversion, parameters, the
//! resource cache and the integration engine.
//!
//! Severity follows the processing model: [`ConversionError`], [`LoadError`]
//! and [`CacheError`] are fatal for the resource being processed,
//! [`ParameterError`] is mostly a recoverable validation warning (see
//! [`ParameterError::severity`]), and [`EngineError`] aborts a whole
//! prefetch run.

use thiserror::Error;

use crate::params::{NamespaceKey, ValueType};
use crate::resources::{Charset, RepresentationKind};

/// Boxed error used for collaborator failures (loaders, suppliers, stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A representation could not be converted into another one.
///
/// # Examples
///
/// ```
/// use respipe::error::ConversionError;
/// use respipe::resources::{Charset, RepresentationKind};
///
/// let err = ConversionError::new(
///     RepresentationKind::Bytes,
///     RepresentationKind::Text,
///     Charset::UsAscii,
///     "byte 0xc3 at offset 4 is not ASCII",
/// );
/// assert!(err.to_string().contains("bytes"));
/// assert!(err.to_string().contains("us-ascii"));
/// ```
#[derive(Debug, Error)]
#[error("cannot convert content from {from} to {to} (charset {charset}): {reason}")]
pub struct ConversionError {
    /// Representation the conversion started from.
    pub from: RepresentationKind,
    /// Representation that was requested.
    pub to: RepresentationKind,
    /// Charset in effect when the conversion failed.
    pub charset: Charset,
    /// Human-readable failure description.
    pub reason: String,
}

impl ConversionError {
    /// Creates a conversion error.
    pub fn new(
        from: RepresentationKind,
        to: RepresentationKind,
        charset: Charset,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            charset,
            reason: reason.into(),
        }
    }
}

/// Loading a resource failed.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The loader has nothing for this URI.
    #[error("resource not found: {uri}")]
    NotFound {
        /// The requested URI.
        uri: String,
    },

    /// A URI or relative reference could not be parsed or resolved.
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI or reference.
        uri: String,
        /// Parser message.
        reason: String,
    },

    /// The underlying fetch failed.
    #[error("failed to load resource {uri}: {source}")]
    Fetch {
        /// The requested URI.
        uri: String,
        /// The collaborator's error.
        #[source]
        source: BoxError,
    },
}

/// Severity of a diagnostic reported to a pipeline context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable; processing continues with a default or a no-op.
    Warning,
    /// Not recoverable for the operation that reported it.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Validation failures of the parameter store.
///
/// # Examples
///
/// ```
/// use respipe::error::{ParameterError, Severity};
/// use respipe::params::{NamespaceKey, ValueType};
///
/// let err = ParameterError::TypeConflict {
///     key: NamespaceKey::new("download", "timeout"),
///     declared: ValueType::Integer,
///     requested: ValueType::String,
/// };
/// assert_eq!(err.severity(), Severity::Error);
/// assert!(err.to_string().contains("download:timeout"));
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    /// A value does not match the expected or declared type.
    #[error("type mismatch for {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        /// The affected key.
        key: NamespaceKey,
        /// The expected (declared or requested) type.
        expected: ValueType,
        /// The runtime type of the value.
        actual: ValueType,
    },

    /// The store is sealed and the key did not exist at seal time.
    #[error("parameter store is sealed, cannot create {key}")]
    Sealed {
        /// The rejected key.
        key: NamespaceKey,
    },

    /// A different type has already been declared for the key.
    #[error("cannot declare {key} as {requested}, already declared as {declared}")]
    TypeConflict {
        /// The affected key.
        key: NamespaceKey,
        /// The existing declaration.
        declared: ValueType,
        /// The rejected declaration.
        requested: ValueType,
    },
}

impl ParameterError {
    /// Returns how the owning context should report this error.
    ///
    /// Type mismatches and sealed-store writes are warnings; conflicting
    /// type declarations are errors.
    pub fn severity(&self) -> Severity {
        match self {
            Self::TypeMismatch { .. } | Self::Sealed { .. } => Severity::Warning,
            Self::TypeConflict { .. } => Severity::Error,
        }
    }
}

/// Raw failure of a [`PersistentStore`](crate::cache::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No node exists at the path.
    #[error("node not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// A node already exists at the path.
    #[error("node already exists: {path}")]
    AlreadyExists {
        /// The occupied path.
        path: String,
    },

    /// A conditional update found the node at another revision.
    #[error("revision conflict on {path}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// The node path.
        path: String,
        /// Revision the caller read.
        expected: u64,
        /// Revision currently stored.
        actual: u64,
    },

    /// The path is malformed (relative, empty segment, ...).
    #[error("invalid store path '{path}': {reason}")]
    InvalidPath {
        /// The malformed path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Backend-specific failure.
    #[error("store backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },
}

/// Failures of the resource cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache is in a state the caller contract does not allow
    /// (no free entry name, missing root for refresh or promote).
    #[error("cache consistency error: {0}")]
    Consistency(String),

    /// A URI cannot be mapped to a cache path.
    #[error("cannot derive cache path for {uri}: {reason}")]
    InvalidPath {
        /// The URI being mapped.
        uri: String,
        /// Why the mapping failed.
        reason: String,
    },

    /// A stored entry is unreadable.
    #[error("corrupt cache entry {path}: {reason}")]
    Corrupt {
        /// Path of the entry node.
        path: String,
        /// What is missing or malformed.
        reason: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The record's content could not be serialized for storage.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The cache configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Processing of a single resource failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Loading failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Content conversion failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Reading or writing the cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A task reported a fatal failure.
    #[error("task '{task}' failed: {message}")]
    Task {
        /// Name of the failing task.
        task: String,
        /// Failure description.
        message: String,
    },
}

/// A prefetch run could not complete.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another holder owns a live lease on the cache root.
    #[error("cache root {root} is locked by another holder")]
    LeaseUnavailable {
        /// The cache root path.
        root: String,
    },

    /// The lease expired and was taken over during the run.
    #[error("lease {holder} on {root} was lost during the run")]
    LeaseLost {
        /// The cache root path.
        root: String,
        /// The holder id that lost the lease.
        holder: String,
    },

    /// A cache operation of the run itself failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Configuration could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid TOML for [`EngineConfig`](crate::config::EngineConfig).
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_error_severity() {
        let key = NamespaceKey::new("ns", "k");
        assert_eq!(
            ParameterError::Sealed { key: key.clone() }.severity(),
            Severity::Warning
        );
        assert_eq!(
            ParameterError::TypeMismatch {
                key: key.clone(),
                expected: ValueType::String,
                actual: ValueType::Integer,
            }
            .severity(),
            Severity::Warning
        );
        assert_eq!(
            ParameterError::TypeConflict {
                key,
                declared: ValueType::Integer,
                requested: ValueType::Bool,
            }
            .severity(),
            Severity::Error
        );
    }

    #[test]
    fn load_error_display_names_uri() {
        let err = LoadError::Fetch {
            uri: "https://ex/a.js".to_string(),
            source: "connection reset".into(),
        };
        assert!(err.to_string().contains("https://ex/a.js"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cache_error_wraps_store_error() {
        let err: CacheError = StoreError::NotFound {
            path: "/var/x".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "node not found: /var/x");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Error.to_string(), "error");
    }
}
