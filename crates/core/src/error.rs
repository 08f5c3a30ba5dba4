//! Error types for osc-core
//!
//! Remote failures carry a status [`Code`] so the retry executor can tell
//! transient conditions from permanent rejections. Every error can also be
//! projected onto a CLI exit code or a kernel errno.

use std::fmt;

use thiserror::Error;

/// Result type alias for osc-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status code reported by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Whether a failure with this code is worth another attempt
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Code::DeadlineExceeded | Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Code::Cancelled => "cancelled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid argument",
            Code::DeadlineExceeded => "deadline exceeded",
            Code::NotFound => "not found",
            Code::AlreadyExists => "already exists",
            Code::PermissionDenied => "permission denied",
            Code::ResourceExhausted => "resource exhausted",
            Code::FailedPrecondition => "failed precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out of range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for osc-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The remote service rejected or failed a call
    #[error("{message} ({code})")]
    Remote { code: Code, message: String },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid logical path or key
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Directory still has children
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// A directory operation was aimed at a file
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// A file operation was aimed at a directory
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// A bulk delete confirmed fewer keys than requested
    #[error("Some objects failed to delete: {deleted} of {requested} confirmed")]
    PartialDelete { requested: usize, deleted: usize },

    /// Payload could not be compressed or decompressed
    #[error("Compression error: {0}")]
    Compression(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Invalid URL in configuration
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    pub fn remote(code: Code, message: impl Into<String>) -> Self {
        Error::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::remote(Code::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::remote(Code::Unavailable, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::remote(Code::InvalidArgument, message)
    }

    /// Prefix the message of a remote error while keeping its status code
    pub fn context(self, context: &str) -> Self {
        match self {
            Error::Remote { code, message } => Error::Remote {
                code,
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }

    /// Status code this error is classified under
    pub fn code(&self) -> Code {
        match self {
            Error::Remote { code, .. } => *code,
            Error::Cancelled => Code::Cancelled,
            Error::InvalidPath(_) | Error::Config(_) | Error::InvalidUrl(_) => {
                Code::InvalidArgument
            }
            Error::TomlParse(_) | Error::TomlSerialize(_) => Code::InvalidArgument,
            Error::NotEmpty(_) | Error::NotADirectory(_) | Error::IsADirectory(_) => {
                Code::FailedPrecondition
            }
            Error::Compression(_) => Code::DataLoss,
            Error::PartialDelete { .. } | Error::Io(_) => Code::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Code::NotFound
    }

    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::Config(_) | Error::InvalidUrl(_) => 2,
            Error::TomlParse(_) | Error::TomlSerialize(_) => 2,
            Error::NotEmpty(_) | Error::NotADirectory(_) | Error::IsADirectory(_) => 6,
            Error::Cancelled => 130,
            Error::Remote { code, .. } => match code {
                c if c.is_retryable() => 3,
                Code::PermissionDenied | Code::Unauthenticated => 4,
                Code::NotFound => 5,
                Code::AlreadyExists | Code::FailedPrecondition => 6,
                Code::Unimplemented => 7,
                Code::InvalidArgument => 2,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Kernel error number reported to the filesystem bridge
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotEmpty(_) => return libc::ENOTEMPTY,
            Error::NotADirectory(_) => return libc::ENOTDIR,
            Error::IsADirectory(_) => return libc::EISDIR,
            _ => {}
        }
        match self.code() {
            Code::NotFound => libc::ENOENT,
            Code::PermissionDenied | Code::Unauthenticated => libc::EACCES,
            Code::AlreadyExists => libc::EEXIST,
            Code::InvalidArgument | Code::OutOfRange => libc::EINVAL,
            Code::Cancelled => libc::EINTR,
            Code::DeadlineExceeded => libc::ETIMEDOUT,
            Code::Unimplemented => libc::ENOSYS,
            _ => libc::EIO,
        }
    }
}
