use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result code returned by the driver for a rejected command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    NotFound,
    Exists,
    Busy,
    NoSpace,
    Permission,
    Io,
    Invalid,
    NoMemory,
    BadDescriptor,
    Unsupported,
}

impl ResultCode {
    /// The errno value the driver uses for this code.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::Busy => libc::EBUSY,
            Self::NoSpace => libc::ENOSPC,
            Self::Permission => libc::EPERM,
            Self::Io => libc::EIO,
            Self::Invalid => libc::EINVAL,
            Self::NoMemory => libc::ENOMEM,
            Self::BadDescriptor => libc::EBADF,
            Self::Unsupported => libc::ENOTTY,
        }
    }

    /// Classify a raw errno. Unknown values are generic I/O failures.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => Self::NotFound,
            libc::EEXIST => Self::Exists,
            libc::EBUSY => Self::Busy,
            libc::ENOSPC => Self::NoSpace,
            libc::EPERM | libc::EACCES => Self::Permission,
            libc::EINVAL => Self::Invalid,
            libc::ENOMEM => Self::NoMemory,
            libc::EBADF | libc::EBADFD => Self::BadDescriptor,
            libc::ENOTTY | libc::EOPNOTSUPP => Self::Unsupported,
            _ => Self::Io,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "not found",
            Self::Exists => "already exists",
            Self::Busy => "busy",
            Self::NoSpace => "out of space",
            Self::Permission => "permission denied",
            Self::Io => "I/O failure",
            Self::Invalid => "invalid argument",
            Self::NoMemory => "out of memory",
            Self::BadDescriptor => "bad descriptor",
            Self::Unsupported => "unsupported",
        };
        f.write_str(text)
    }
}

/// Errors from a command exchange.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The driver rejected the command.
    #[error("{command} rejected: {code}")]
    Rejected {
        command: &'static str,
        code: ResultCode,
    },

    /// The exchange itself failed before the driver answered.
    #[error("{command} exchange failed: {source}")]
    Io {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The driver answered with a reply of the wrong shape.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: &'static str,
    },
}

impl ChannelError {
    pub fn rejected(command: &'static str, code: ResultCode) -> Self {
        Self::Rejected { command, code }
    }

    /// The result code this error corresponds to.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Rejected { code, .. } => *code,
            Self::Io { source, .. } => source
                .raw_os_error()
                .map(ResultCode::from_errno)
                .unwrap_or(ResultCode::Io),
            Self::UnexpectedReply { .. } => ResultCode::Io,
        }
    }

    /// Name of the command that failed.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Rejected { command, .. }
            | Self::Io { command, .. }
            | Self::UnexpectedReply { command, .. } => command,
        }
    }
}

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
