//! Error types for the storage gateway core library.
//!
//! Every backend-native failure is mapped into [`Error`] at the driver
//! boundary, so code above the drivers only ever branches on [`ErrorKind`].

use std::fmt;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the storage gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Identifier could not be parsed into scheme, host and path
    #[error("Malformed identifier {identifier}: {message}")]
    MalformedIdentifier { identifier: String, message: String },

    /// No registered backend prefix matches the identifier
    #[error("No backend handles {0}")]
    NotHandled(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Permission denied by the backend
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Caller supplied an invalid argument (bad key, bad header, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Precondition-style failure, e.g. a create-only write hitting an existing object
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unexpected backend fault
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration or registration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A multi-step mutation failed and its rollback ran
    #[error("{source}{}", CleanupSuffix(.cleanup))]
    Rollback {
        source: Box<Error>,
        cleanup: Vec<Error>,
    },
}

/// Error taxonomy used for branching and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedIdentifier,
    NotHandled,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Conflict,
    Internal,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedIdentifier => "malformed_identifier",
            ErrorKind::NotHandled => "not_handled",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Taxonomy kind of this error. A rollback reports the kind of its trigger.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedIdentifier { .. } => ErrorKind::MalformedIdentifier,
            Error::NotHandled(_) => ErrorKind::NotHandled,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Rollback { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Join a triggering error with the failures of its cleanup.
    ///
    /// With no cleanup failures the original error is returned unchanged.
    pub fn with_cleanup(self, cleanup: Vec<Error>) -> Error {
        if cleanup.is_empty() {
            return self;
        }
        Error::Rollback {
            source: Box::new(self),
            cleanup,
        }
    }
}

struct CleanupSuffix<'a>(&'a [Error]);

impl fmt::Display for CleanupSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, " (rollback also failed: ")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, ")")
    }
}

/// Map a filesystem error for `key` into the gateway taxonomy.
pub fn map_io_error(key: &str, err: std::io::Error) -> Error {
    use std::io::ErrorKind as Io;
    match err.kind() {
        Io::NotFound | Io::NotADirectory => Error::NotFound(key.to_string()),
        Io::PermissionDenied => Error::PermissionDenied(format!("{}: {}", key, err)),
        Io::AlreadyExists => Error::Conflict(format!("{} already exists", key)),
        Io::IsADirectory | Io::DirectoryNotEmpty => {
            Error::Conflict(format!("{}: {}", key, err))
        }
        Io::InvalidInput | Io::InvalidData => Error::InvalidArgument(format!("{}: {}", key, err)),
        _ => Error::Internal(format!("{}: {}", key, err)),
    }
}

/// Map an `object_store` error for `key` into the gateway taxonomy.
pub fn map_object_store_error(key: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            Error::Conflict(format!("{} already exists", key))
        }
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
            Error::PermissionDenied(format!("{}: {}", key, err))
        }
        object_store::Error::InvalidPath { .. } => {
            Error::InvalidArgument(format!("{}: {}", key, err))
        }
        other => Error::Internal(format!("{}: {}", key, other)),
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("Serialization error: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}
