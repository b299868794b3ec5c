//! Command channel boundary for the mpool control plane.
//!
//! Every mutation or query of durable pool state is a fixed-shape
//! [`Command`] exchanged over a [`CommandChannel`] bound to one pool
//! descriptor. The channel answers either with a typed [`Reply`] or with a
//! [`ChannelError`] carrying a [`ResultCode`].
//!
//! # Channels
//!
//! - [`CommandChannel`] -- the trait the control plane is written against
//! - [`InMemoryDriver`] -- in-process driver for tests and embedding; mblock
//!   contents are staged in a temporary file so mcache maps are real
//!   `mmap(2)` mappings
//!
//! # Rules
//!
//! 1. Exchanges are synchronous: the calling thread blocks until a reply.
//! 2. Object creation and deletion are atomic on the driver side.
//! 3. The control plane never depends on the channel's transport.

pub mod command;
pub mod error;
pub mod memory;
pub mod traits;

pub use command::{Command, Record, RecordKind, Reply, VmaGeometry};
pub use error::{ChannelError, ChannelResult, ResultCode};
pub use memory::{DriverConfig, InMemoryDriver};
pub use traits::CommandChannel;

/// Size of an OS memory page in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}
