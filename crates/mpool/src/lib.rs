//! Userspace control plane for mpool.
//!
//! A pool's durable state lives behind a driver reached only through a
//! [`CommandChannel`](mpool_ioctl::CommandChannel). This crate layers the
//! in-process state on top of it:
//!
//! - [`Pool`] -- one session on a pool, with its access mode and the
//!   registry of open mlogs
//! - [`Mlog`] -- a caller's reference to an open mlog; every open of the
//!   same mlog in a session shares one handle and one set of descriptors
//! - [`McacheMap`] -- committed mblocks mapped read-only as consecutive
//!   buckets, with page addressing, paging advice and residency counts
//!
//! # Rules
//!
//! 1. At most one handle per mlog per session, at most
//!    [`MAX_OPEN_MLOGS`] handles per session.
//! 2. The storage object is closed exactly once, by the last reference.
//! 3. The pool mutex and a handle lock are never held together, and the
//!    pool mutex is never held across a command exchange.
//! 4. Write-path operations on a read-only session fail with
//!    [`MpoolError::PermissionDenied`].
//! 5. A closed session rejects every operation with
//!    [`MpoolError::BadDescriptor`].

pub mod config;
mod descriptor;
pub mod error;
mod lockorder;
pub mod mblock;
pub mod mcache;
pub mod mlog;
pub mod pool;
pub mod registry;

pub use config::{validate_pool_name, PoolConfig, POOL_NAME_MAX};
pub use error::{MpoolError, MpoolResult};
pub use mcache::{count_resident, McacheMap, MemoryAdvice, Residency, MCACHE_TO_END};
pub use mlog::Mlog;
pub use pool::{Pool, MAX_OPEN_MLOGS};
pub use registry::{HandleRegistry, RegistryError};

pub use mpool_types::{
    MblockId, MblockProps, MclassProps, MediaClass, MlogCapacity, MlogId, MlogOpenFlags,
    MlogProps, MlogPropsEx, ObjectState, OpenMode, PoolUsage, VmaAdvice,
};
