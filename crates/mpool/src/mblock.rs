//! Mblock operations on a pool session.
//!
//! Mblocks are write-once: data is written while allocated, then the block
//! is committed and becomes readable and mappable through an mcache.

use mpool_ioctl::Command;
use mpool_types::{MblockId, MblockProps, MediaClass};
use tracing::debug;

use crate::error::{MpoolError, MpoolResult};
use crate::pool::Pool;

fn not_null(id: MblockId) -> MpoolResult<()> {
    if id.is_null() {
        Err(MpoolError::InvalidArgument("null mblock id".into()))
    } else {
        Ok(())
    }
}

impl Pool {
    pub fn mblock_alloc(&self, mclass: MediaClass, spare: bool) -> MpoolResult<MblockProps> {
        self.write_path()?;
        let props = self
            .exchange(Command::MblockAlloc { mclass, spare })?
            .into_mblock("MblockAlloc")?;
        debug!(pool = self.name(), mblock = %props.id, "mblock allocated");
        Ok(props)
    }

    pub fn mblock_find(&self, id: MblockId) -> MpoolResult<MblockProps> {
        not_null(id)?;
        Ok(self
            .exchange(Command::MblockFind { id })?
            .into_mblock("MblockFind")?)
    }

    pub fn mblock_props(&self, id: MblockId) -> MpoolResult<MblockProps> {
        self.mblock_find(id)
    }

    pub fn mblock_commit(&self, id: MblockId) -> MpoolResult<()> {
        self.write_path()?;
        not_null(id)?;
        Ok(self
            .exchange(Command::MblockCommit { id })?
            .into_done("MblockCommit")?)
    }

    pub fn mblock_abort(&self, id: MblockId) -> MpoolResult<()> {
        self.write_path()?;
        not_null(id)?;
        Ok(self
            .exchange(Command::MblockAbort { id })?
            .into_done("MblockAbort")?)
    }

    /// Delete a committed mblock. Fails with [`MpoolError::Busy`] while an
    /// mcache map covers it.
    pub fn mblock_delete(&self, id: MblockId) -> MpoolResult<()> {
        self.write_path()?;
        not_null(id)?;
        Ok(self
            .exchange(Command::MblockDelete { id })?
            .into_done("MblockDelete")?)
    }

    /// Append the concatenation of `iov` to an allocated mblock.
    pub fn mblock_write(&self, id: MblockId, iov: &[&[u8]]) -> MpoolResult<()> {
        self.write_path()?;
        not_null(id)?;
        if iov.is_empty() {
            return Err(MpoolError::InvalidArgument("empty write vector".into()));
        }
        Ok(self
            .exchange(Command::MblockWrite {
                id,
                data: iov.concat(),
            })?
            .into_done("MblockWrite")?)
    }

    /// Fill `iov` in order from the mblock starting at byte `offset`.
    pub fn mblock_read(&self, id: MblockId, iov: &mut [&mut [u8]], offset: u64) -> MpoolResult<()> {
        not_null(id)?;
        let len: usize = iov.iter().map(|b| b.len()).sum();
        let data = self
            .exchange(Command::MblockRead { id, offset, len })?
            .into_data("MblockRead")?;
        if data.len() != len {
            return Err(MpoolError::InvalidArgument(format!(
                "short mblock read: {} of {len} bytes",
                data.len()
            )));
        }
        let mut rest = data.as_slice();
        for buf in iov.iter_mut() {
            let (head, tail) = rest.split_at(buf.len());
            buf.copy_from_slice(head);
            rest = tail;
        }
        Ok(())
    }
}
