//! Foundation types for the mpool control plane.
//!
//! Every other mpool crate depends on `mpool-types`. The types here are plain
//! data: they carry no descriptors and perform no I/O.
//!
//! # Key Types
//!
//! - [`MlogId`] / [`MblockId`] -- stable numeric keys of durable objects
//! - [`OpenMode`] -- how a pool session was opened (read-only, read-write, ...)
//! - [`MlogOpenFlags`] -- per-handle open flags (`SKIP_SER`, `COMPACT_SEM`)
//! - [`MediaClass`] -- which media class an object is allocated from
//! - [`MlogProps`] / [`MblockProps`] -- driver-reported object properties
//! - [`VmaAdvice`] -- driver-side residency hint for mcache maps

pub mod advice;
pub mod error;
pub mod flags;
pub mod ids;
pub mod props;

pub use advice::VmaAdvice;
pub use error::TypeError;
pub use flags::{MlogOpenFlags, OpenMode};
pub use ids::{MblockId, MlogId};
pub use props::{
    MclassProps, MblockProps, MediaClass, MlogCapacity, MlogProps, MlogPropsEx, ObjectState,
    PoolUsage,
};
