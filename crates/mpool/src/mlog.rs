//! Reference-counted mlog handles.
//!
//! Every open of the same mlog within one pool session shares a single
//! [`MlogObject`], registered in the pool's handle registry. The caller
//! owns an [`Mlog`] token: one reference, released by [`Mlog::close`] or on
//! drop. The last release invalidates the object and closes the storage
//! object on the driver.
//!
//! Operations on a handle are serialized by its lock unless the handle was
//! opened with [`MlogOpenFlags::SKIP_SER`], in which case appends and reads
//! run unlocked and the caller provides the serialization.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mpool_ioctl::{Command, RecordKind};
use mpool_types::{MlogId, MlogOpenFlags, MlogProps, MlogPropsEx};
use tracing::{debug, trace, warn};

use crate::descriptor::{LogDescriptor, PoolDescriptor};
use crate::error::{MpoolError, MpoolResult};
use crate::lockorder::{Held, Level};
use crate::pool::PoolShared;

struct Descriptors {
    pool: PoolDescriptor,
    log: LogDescriptor,
}

/// Shared handle for one open mlog in one pool session.
pub(crate) struct MlogObject {
    id: MlogId,
    flags: AtomicU8,
    valid: AtomicBool,
    lock: Mutex<()>,
    descriptors: UnsafeCell<Option<Descriptors>>,
    pool: Arc<PoolShared>,
}

// SAFETY: `descriptors` is only reached through `Access`, which holds
// `lock` unless the handle opted out of serialization; `mlog_open_unserialized`
// makes the caller responsible for exclusive access in that case.
unsafe impl Sync for MlogObject {}

/// Exclusive access to a handle's descriptors for one operation.
struct Access<'a> {
    object: &'a MlogObject,
    _guard: Option<MutexGuard<'a, ()>>,
    _held: Option<Held>,
}

impl Access<'_> {
    fn descriptors(&mut self) -> MpoolResult<&mut Descriptors> {
        // SAFETY: see `MlogObject`'s Sync impl.
        unsafe { (*self.object.descriptors.get()).as_mut() }.ok_or(MpoolError::BadDescriptor)
    }
}

impl MlogObject {
    pub(crate) fn new(pool: Arc<PoolShared>, props: &MlogPropsEx) -> Self {
        let descriptors = Descriptors {
            pool: PoolDescriptor::new(pool.name_arc(), pool.channel()),
            log: LogDescriptor::new(props),
        };
        Self {
            id: props.props.id,
            flags: AtomicU8::new(MlogOpenFlags::NONE.bits()),
            valid: AtomicBool::new(true),
            lock: Mutex::new(()),
            descriptors: UnsafeCell::new(Some(descriptors)),
            pool,
        }
    }

    pub(crate) fn id(&self) -> MlogId {
        self.id
    }

    fn flags(&self) -> MlogOpenFlags {
        MlogOpenFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: MlogOpenFlags) {
        self.flags.store(flags.masked().bits(), Ordering::Release);
    }

    /// Still live and not invalidated by a final close.
    pub(crate) fn validate(&self) -> MpoolResult<()> {
        if self.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MpoolError::BadDescriptor)
        }
    }

    /// Begin an operation. `rw` marks the append and read paths, the only
    /// ones that honour `SKIP_SER`.
    fn acquire(&self, rw: bool) -> MpoolResult<Access<'_>> {
        self.validate()?;
        let access = if rw && self.flags().contains(MlogOpenFlags::SKIP_SER) {
            Access {
                object: self,
                _guard: None,
                _held: None,
            }
        } else {
            let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            Access {
                object: self,
                _guard: Some(guard),
                _held: Some(Held::acquire(Level::Handle)),
            }
        };
        // Re-check under the lock: a final close may have raced us here.
        self.validate()?;
        self.pool.check_live()?;
        Ok(access)
    }

    pub(crate) fn open_descriptor(&self, flags: MlogOpenFlags) -> MpoolResult<u64> {
        let mut access = self.acquire(false)?;
        let d = access.descriptors()?;
        d.log.open(&d.pool, flags.masked())
    }

    /// Tear the object down after its last reference was released.
    ///
    /// Returns the result of closing the storage object.
    pub(crate) fn finish(&self) -> MpoolResult<()> {
        self.valid.store(false, Ordering::Release);
        let detached = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            let _held = Held::acquire(Level::Handle);
            // SAFETY: the lock is held and the object is no longer reachable
            // through the registry.
            unsafe { (*self.descriptors.get()).take() }
        };
        match detached {
            Some(mut d) => {
                debug!(pool = d.pool.pool_name(), mlog = %self.id, "mlog handle freed");
                d.log.close(&d.pool)
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MlogObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MlogObject")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// One caller's reference to an open mlog.
///
/// Obtained from [`Pool::mlog_open`](crate::Pool::mlog_open). Dropping it
/// releases the reference like [`Mlog::close`], logging any close failure.
pub struct Mlog {
    object: Arc<MlogObject>,
    slot: usize,
    released: bool,
}

impl Mlog {
    pub(crate) fn new(object: Arc<MlogObject>, slot: usize) -> Self {
        Self {
            object,
            slot,
            released: false,
        }
    }

    pub fn id(&self) -> MlogId {
        self.object.id
    }

    /// Release this reference.
    ///
    /// The last reference closes the storage object; its failure is
    /// returned here, while the handle is freed regardless.
    pub fn close(mut self) -> MpoolResult<()> {
        self.released = true;
        self.object.pool.release_mlog(&self.object, self.slot)
    }

    #[cfg(test)]
    pub(crate) fn shares_handle_with(&self, other: &Mlog) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }

    fn write_path(&self) -> MpoolResult<()> {
        if self.object.pool.is_writable() {
            Ok(())
        } else {
            Err(MpoolError::PermissionDenied)
        }
    }

    /// Append one record gathered from `iov`. With `sync`, the call returns
    /// once the record is durable.
    pub fn append(&self, iov: &[&[u8]], sync: bool) -> MpoolResult<()> {
        self.write_path()?;
        let mut access = self.object.acquire(true)?;
        let d = access.descriptors()?;
        let bytes: usize = iov.iter().map(|b| b.len()).sum();
        trace!(mlog = %self.object.id, bytes, "append");
        d.log.append(&d.pool, iov, sync)
    }

    /// Mark the start of a compaction run.
    pub fn append_cstart(&self) -> MpoolResult<()> {
        self.append_marker(RecordKind::CompactStart)
    }

    /// Mark the end of a compaction run.
    pub fn append_cend(&self) -> MpoolResult<()> {
        self.append_marker(RecordKind::CompactEnd)
    }

    fn append_marker(&self, kind: RecordKind) -> MpoolResult<()> {
        self.write_path()?;
        let mut access = self.object.acquire(false)?;
        let d = access.descriptors()?;
        d.log.append_marker(&d.pool, kind)
    }

    /// Reset the read cursor to the first record.
    pub fn rewind(&self) -> MpoolResult<()> {
        let mut access = self.object.acquire(false)?;
        access.descriptors()?.log.rewind();
        Ok(())
    }

    /// Read the next record into `buf` and return its length; `Ok(0)` once
    /// the log is exhausted.
    ///
    /// A buffer shorter than the record fails with
    /// [`MpoolError::BufferTooSmall`] and leaves the cursor in place.
    pub fn read(&self, buf: &mut [u8]) -> MpoolResult<usize> {
        let mut access = self.object.acquire(true)?;
        let d = access.descriptors()?;
        d.log.read_next(&d.pool, buf)
    }

    /// Skip `skip` bytes of records, then read the next one.
    pub fn seek_read(&self, skip: u64, buf: &mut [u8]) -> MpoolResult<usize> {
        let mut access = self.object.acquire(true)?;
        let d = access.descriptors()?;
        d.log.seek_read(&d.pool, skip, buf)
    }

    pub fn flush(&self) -> MpoolResult<()> {
        self.write_path()?;
        let mut access = self.object.acquire(false)?;
        let d = access.descriptors()?;
        d.log.flush(&d.pool)
    }

    /// Bytes of record data in the log.
    pub fn len(&self) -> MpoolResult<u64> {
        let mut access = self.object.acquire(false)?;
        Ok(access.descriptors()?.log.len())
    }

    pub fn is_empty(&self) -> MpoolResult<bool> {
        let mut access = self.object.acquire(false)?;
        Ok(access.descriptors()?.log.is_empty())
    }

    pub fn gen(&self) -> MpoolResult<u64> {
        let mut access = self.object.acquire(false)?;
        Ok(access.descriptors()?.log.gen())
    }

    pub fn props(&self) -> MpoolResult<MlogProps> {
        Ok(self.xprops()?.props)
    }

    /// Properties including record count and data length.
    pub fn xprops(&self) -> MpoolResult<MlogPropsEx> {
        let mut access = self.object.acquire(false)?;
        let d = access.descriptors()?;
        Ok(d.pool
            .exchange(Command::MlogProps {
                id: self.object.id,
            })?
            .into_mlog_ex("MlogProps")?)
    }

    /// Erase all records, moving the generation to at least `min_gen`.
    ///
    /// Returns the new generation.
    pub fn erase(&self, min_gen: u64) -> MpoolResult<u64> {
        self.write_path()?;
        let mut access = self.object.acquire(false)?;
        let d = access.descriptors()?;
        let gen = d
            .pool
            .exchange(Command::MlogErase {
                id: self.object.id,
                min_gen,
            })?
            .into_erased("MlogErase")?;
        d.log.stat_reinit();
        d.log.set_gen(gen);
        debug!(mlog = %self.object.id, gen, "mlog erased");
        Ok(gen)
    }
}

impl Drop for Mlog {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.object.pool.release_mlog(&self.object, self.slot) {
            warn!(mlog = %self.object.id, error = %e, "implicit mlog close failed");
        }
    }
}

impl fmt::Debug for Mlog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mlog")
            .field("id", &self.object.id)
            .field("slot", &self.slot)
            .finish()
    }
}
