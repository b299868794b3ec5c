use mpool_ioctl::{ChannelError, ResultCode};
use thiserror::Error;

/// Errors from pool, mlog, mblock and mcache operations.
#[derive(Debug, Error)]
pub enum MpoolError {
    /// A null or malformed identifier, or an argument out of its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle or pool was invalidated (closed) before the operation.
    #[error("bad descriptor")]
    BadDescriptor,

    /// Write-path operation on a pool opened read-only.
    #[error("permission denied: pool is not writable")]
    PermissionDenied,

    /// The object or pool still has live handles.
    #[error("resource busy")]
    Busy,

    /// The handle registry has no free slot.
    #[error("too many open mlogs (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// No such durable object.
    #[error("object not found")]
    NotFound,

    #[error("out of memory")]
    OutOfMemory,

    /// Bucket index past the end of an mcache map.
    #[error("index {index} out of range (limit {limit})")]
    OutOfRange { index: usize, limit: usize },

    /// The caller's buffer is shorter than the next record.
    #[error("buffer too small: record needs {needed} bytes")]
    BufferTooSmall { needed: usize },

    /// A mapping or advisory syscall failed.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The command channel failed with a code that has no dedicated kind.
    #[error(transparent)]
    Channel(ChannelError),
}

impl MpoolError {
    /// Capture `errno` after a failed syscall.
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        Self::Io {
            op,
            source: std::io::Error::last_os_error(),
        }
    }
}

impl From<ChannelError> for MpoolError {
    fn from(err: ChannelError) -> Self {
        match err.code() {
            ResultCode::NotFound => Self::NotFound,
            ResultCode::Busy => Self::Busy,
            ResultCode::Permission => Self::PermissionDenied,
            ResultCode::NoMemory => Self::OutOfMemory,
            ResultCode::BadDescriptor => Self::BadDescriptor,
            ResultCode::Invalid => Self::InvalidArgument(err.to_string()),
            _ => Self::Channel(err),
        }
    }
}

/// Result alias for mpool operations.
pub type MpoolResult<T> = Result<T, MpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_codes_map_to_kinds() {
        let map = |code| MpoolError::from(ChannelError::rejected("MlogFind", code));
        assert!(matches!(map(ResultCode::NotFound), MpoolError::NotFound));
        assert!(matches!(map(ResultCode::Busy), MpoolError::Busy));
        assert!(matches!(map(ResultCode::Permission), MpoolError::PermissionDenied));
        assert!(matches!(map(ResultCode::NoMemory), MpoolError::OutOfMemory));
        assert!(matches!(map(ResultCode::Invalid), MpoolError::InvalidArgument(_)));
    }

    #[test]
    fn io_codes_keep_the_originating_command() {
        let err = MpoolError::from(ChannelError::rejected("MlogAppend", ResultCode::NoSpace));
        match err {
            MpoolError::Channel(inner) => {
                assert_eq!(inner.command(), "MlogAppend");
                assert_eq!(inner.code(), ResultCode::NoSpace);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
