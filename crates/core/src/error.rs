//! Error types for the Triad triple store
//!
//! A single error enum is shared by every layer of the workspace. Variants
//! are grouped by kind rather than by origin so that callers can react to
//! the category (`resource`, `not_found`, `io`, …) without matching every
//! variant.
//!
//! ## Error Kinds
//!
//! - **Parse**: malformed term or algebra input surfaced from a parser seam
//! - **InvalidInput**: out-of-range options, bad paths, oversized queries
//! - **Resource**: deadline exceeded, iteration bound hit, memory budget hit
//! - **NotFound**: missing file, database, snapshot or dictionary id
//! - **Closed**: operation on a closed store or released snapshot
//! - **Io / Corrupted**: backend failure or integrity violation
//! - **Internal**: invariant violation — a bug, reported loudly

use std::io;
use thiserror::Error;

/// Result type alias for Triad operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed textual input (term lexical forms, algebra shapes)
    Parse,
    /// Invalid options, paths or query shapes
    InvalidInput,
    /// A resource bound was exceeded (deadline, iterations, memory)
    Resource,
    /// Something referenced does not exist
    NotFound,
    /// The store or a handle has been closed
    Closed,
    /// Backend I/O failure
    Io,
    /// Data integrity violation
    Corrupted,
    /// Invariant violation — a bug
    Internal,
}

/// Error type shared by the Triad workspace
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed term or algebra input
    #[error("parse error: {message}")]
    Parse {
        /// What failed to parse
        message: String,
    },

    /// Invalid option value, path or query shape
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
    },

    /// A path escapes the configured root directory
    #[error("path escapes the configured root: {path}")]
    Traversal {
        /// The offending path
        path: String,
    },

    /// The query deadline was exceeded
    #[error("deadline exceeded after {elapsed_ms} ms")]
    Timeout {
        /// Milliseconds elapsed when the deadline fired
        elapsed_ms: u64,
    },

    /// The leapfrog iteration bound was exceeded
    #[error("iteration bound exceeded: {limit}")]
    MaxIterationsExceeded {
        /// The configured bound
        limit: u64,
    },

    /// A memory budget was exceeded
    #[error("memory limit exceeded: {message}")]
    MemoryLimit {
        /// What ran out of budget
        message: String,
    },

    /// Something referenced does not exist
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing entity
        what: String,
    },

    /// Operation on a closed store or released handle
    #[error("store or handle is closed")]
    Closed,

    /// The planner rejected the algebra tree
    #[error("invalid plan: {message}")]
    InvalidPlan {
        /// Why the plan is invalid
        message: String,
    },

    /// Backend I/O failure
    #[error("I/O error: {message}")]
    Io {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Data integrity violation detected
    #[error("corruption detected: {message}")]
    Corrupted {
        /// Description of the corruption
        message: String,
    },

    /// Backup or restore verification failed
    #[error("verification failed: {message}")]
    VerificationFailed {
        /// What failed to verify
        message: String,
    },

    /// Invariant violation — a bug
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a Parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a Traversal error
    pub fn traversal(path: impl Into<String>) -> Self {
        Error::Traversal { path: path.into() }
    }

    /// Create a Timeout error
    pub fn timeout(elapsed_ms: u64) -> Self {
        Error::Timeout { elapsed_ms }
    }

    /// Create a MaxIterationsExceeded error
    pub fn max_iterations(limit: u64) -> Self {
        Error::MaxIterationsExceeded { limit }
    }

    /// Create a MemoryLimit error
    pub fn memory_limit(message: impl Into<String>) -> Self {
        Error::MemoryLimit {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    /// Create an InvalidPlan error
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Error::InvalidPlan {
            message: message.into(),
        }
    }

    /// Create an Io error without a source
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an Io error wrapping an underlying error
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Corrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Error::Corrupted {
            message: message.into(),
        }
    }

    /// Create a VerificationFailed error
    pub fn verification_failed(message: impl Into<String>) -> Self {
        Error::VerificationFailed {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::InvalidInput { .. } | Error::Traversal { .. } | Error::InvalidPlan { .. } => {
                ErrorKind::InvalidInput
            }
            Error::Timeout { .. }
            | Error::MaxIterationsExceeded { .. }
            | Error::MemoryLimit { .. } => ErrorKind::Resource,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Closed => ErrorKind::Closed,
            Error::Io { .. } => ErrorKind::Io,
            Error::Corrupted { .. } | Error::VerificationFailed { .. } => ErrorKind::Corrupted,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Short stable code for the variant, usable in logs and wire surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "parse",
            Error::InvalidInput { .. } => "invalid_input",
            Error::Traversal { .. } => "traversal",
            Error::Timeout { .. } => "timeout",
            Error::MaxIterationsExceeded { .. } => "max_iterations_exceeded",
            Error::MemoryLimit { .. } => "memory_limit",
            Error::NotFound { .. } => "not_found",
            Error::Closed => "closed",
            Error::InvalidPlan { .. } => "invalid_plan",
            Error::Io { .. } => "io",
            Error::Corrupted { .. } => "corrupted",
            Error::VerificationFailed { .. } => "verification_failed",
            Error::Internal { .. } => "internal",
        }
    }

    /// A message safe to surface to end users.
    ///
    /// Backend and internal errors keep their detail out of user-facing
    /// surfaces; the full `Display` form is what goes to logs.
    pub fn safe_message(&self) -> String {
        match self {
            Error::Io { .. } => "storage backend failure".to_string(),
            Error::Corrupted { .. } => "data integrity violation".to_string(),
            Error::Internal { .. } => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// True when the error is a resource bound (timeout, iterations, memory).
    pub fn is_resource(&self) -> bool {
        self.kind() == ErrorKind::Resource
    }

    /// True when the error is a missing-entity error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True for corruption-class errors that warrant operator attention.
    pub fn is_serious(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corrupted | ErrorKind::Internal)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound {
                what: e.to_string(),
            }
        } else {
            Error::Io {
                message: e.to_string(),
                source: Some(Box::new(e)),
            }
        }
    }
}
