//! Pool sessions.
//!
//! A [`Pool`] is one open session on a named pool. It owns the command
//! channel, the session's access mode and the handle registry through which
//! all opens of the same mlog share one handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mpool_ioctl::{Command, CommandChannel, Reply};
use mpool_types::{
    MclassProps, MediaClass, MlogCapacity, MlogId, MlogOpenFlags, MlogProps, MlogPropsEx,
    OpenMode, PoolUsage,
};
use tracing::debug;

use crate::config::{validate_pool_name, PoolConfig};
use crate::error::{MpoolError, MpoolResult};
use crate::lockorder::{Held, Level};
use crate::mlog::{Mlog, MlogObject};
use crate::registry::{HandleRegistry, RegistryError};

/// Most mlogs one pool session can hold open at a time.
pub const MAX_OPEN_MLOGS: usize = 256;

pub(crate) struct Session {
    registry: HandleRegistry<MlogId, Arc<MlogObject>, MAX_OPEN_MLOGS>,
}

/// Pool mutex guard paired with its lock-order marker.
struct SessionGuard<'a> {
    guard: MutexGuard<'a, Session>,
    _held: Held,
}

impl std::ops::Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl std::ops::DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

pub(crate) struct PoolShared {
    name: Arc<str>,
    config: PoolConfig,
    channel: Arc<dyn CommandChannel>,
    live: AtomicBool,
    session: Mutex<Session>,
}

impl PoolShared {
    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn channel(&self) -> Arc<dyn CommandChannel> {
        Arc::clone(&self.channel)
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.config.mode.is_writable()
    }

    pub(crate) fn check_live(&self) -> MpoolResult<()> {
        if self.live.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MpoolError::BadDescriptor)
        }
    }

    fn lock_session(&self) -> MpoolResult<SessionGuard<'_>> {
        let guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let held = Held::acquire(Level::Pool);
        self.check_live()?;
        Ok(SessionGuard { guard, _held: held })
    }

    pub(crate) fn exchange(&self, command: Command) -> MpoolResult<Reply> {
        self.check_live()?;
        self.channel.exchange(command).map_err(MpoolError::from)
    }

    /// Drop one reference on `object`, tearing it down if it was the last.
    pub(crate) fn release_mlog(&self, object: &Arc<MlogObject>, slot: usize) -> MpoolResult<()> {
        object.validate()?;
        let last = {
            let mut session = self.lock_session()?;
            session.registry.release(slot, object.id())
        };
        match last {
            Some(handle) => handle.finish(),
            None => Ok(()),
        }
    }
}

/// An open pool session.
///
/// `Pool` is `Send + Sync`; share it by reference or behind an `Arc`.
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Open a session on `name` with the default configuration and `mode`.
    pub fn open(name: &str, mode: OpenMode, channel: Arc<dyn CommandChannel>) -> MpoolResult<Self> {
        Self::open_with_config(
            name,
            PoolConfig {
                mode,
                ..PoolConfig::default()
            },
            channel,
        )
    }

    pub fn open_with_config(
        name: &str,
        config: PoolConfig,
        channel: Arc<dyn CommandChannel>,
    ) -> MpoolResult<Self> {
        validate_pool_name(name)?;
        debug!(pool = name, mode = %config.mode, "pool opened");
        Ok(Self {
            shared: Arc::new(PoolShared {
                name: Arc::from(name),
                config,
                channel,
                live: AtomicBool::new(true),
                session: Mutex::new(Session {
                    registry: HandleRegistry::new(),
                }),
            }),
        })
    }

    /// End the session.
    ///
    /// Fails with [`MpoolError::Busy`] while any mlog is open. Afterwards
    /// every operation on the pool fails with [`MpoolError::BadDescriptor`].
    /// Live mcache maps stay readable until destroyed.
    pub fn close(&self) -> MpoolResult<()> {
        let session = self.shared.lock_session()?;
        if !session.registry.is_empty() {
            return Err(MpoolError::Busy);
        }
        self.shared.live.store(false, Ordering::Release);
        drop(session);
        debug!(pool = %self.shared.name, "pool closed");
        Ok(())
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn mode(&self) -> OpenMode {
        self.shared.config.mode
    }

    pub fn is_writable(&self) -> bool {
        self.shared.is_writable()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub(crate) fn write_path(&self) -> MpoolResult<()> {
        self.shared.check_live()?;
        if self.is_writable() {
            Ok(())
        } else {
            Err(MpoolError::PermissionDenied)
        }
    }

    pub(crate) fn exchange(&self, command: Command) -> MpoolResult<Reply> {
        self.shared.exchange(command)
    }

    pub fn usage(&self) -> MpoolResult<PoolUsage> {
        Ok(self.exchange(Command::PoolUsage)?.into_usage("PoolUsage")?)
    }

    pub fn mclass_props(&self, mclass: MediaClass) -> MpoolResult<MclassProps> {
        Ok(self
            .exchange(Command::MclassGet { mclass })?
            .into_mclass("MclassGet")?)
    }

    /// Number of distinct mlogs currently open.
    pub fn open_mlogs(&self) -> MpoolResult<usize> {
        Ok(self.shared.lock_session()?.registry.len())
    }

    /// References held on `id` in this session.
    pub fn mlog_refs(&self, id: MlogId) -> MpoolResult<u32> {
        Ok(self.shared.lock_session()?.registry.refs(id))
    }

    fn not_null(id: MlogId) -> MpoolResult<()> {
        if id.is_null() {
            Err(MpoolError::InvalidArgument("null mlog id".into()))
        } else {
            Ok(())
        }
    }

    /// Allocate a new mlog; it must be committed before it can be opened.
    pub fn mlog_alloc(&self, mclass: MediaClass, capacity: MlogCapacity) -> MpoolResult<MlogProps> {
        self.write_path()?;
        let props = self
            .exchange(Command::MlogAlloc { mclass, capacity })?
            .into_mlog("MlogAlloc")?;
        debug!(pool = %self.shared.name, mlog = %props.id, "mlog allocated");
        Ok(props)
    }

    pub fn mlog_commit(&self, id: MlogId) -> MpoolResult<()> {
        self.write_path()?;
        Self::not_null(id)?;
        Ok(self.exchange(Command::MlogCommit { id })?.into_done("MlogCommit")?)
    }

    /// Abort an allocated mlog. Fails with [`MpoolError::Busy`] while open.
    pub fn mlog_abort(&self, id: MlogId) -> MpoolResult<()> {
        self.write_path()?;
        Self::not_null(id)?;
        self.ensure_closed(id)?;
        Ok(self.exchange(Command::MlogAbort { id })?.into_done("MlogAbort")?)
    }

    /// Delete a committed mlog. Fails with [`MpoolError::Busy`] while open.
    pub fn mlog_delete(&self, id: MlogId) -> MpoolResult<()> {
        self.write_path()?;
        Self::not_null(id)?;
        self.ensure_closed(id)?;
        Ok(self.exchange(Command::MlogDelete { id })?.into_done("MlogDelete")?)
    }

    /// Erase a closed mlog by id and return its new generation, at least
    /// `min_gen`. Fails with [`MpoolError::Busy`] while open; erase through
    /// [`Mlog::erase`] instead.
    pub fn mlog_erase_by_id(&self, id: MlogId, min_gen: u64) -> MpoolResult<u64> {
        self.write_path()?;
        Self::not_null(id)?;
        self.ensure_closed(id)?;
        Ok(self
            .exchange(Command::MlogErase { id, min_gen })?
            .into_erased("MlogErase")?)
    }

    fn ensure_closed(&self, id: MlogId) -> MpoolResult<()> {
        if self.shared.lock_session()?.registry.contains(id) {
            Err(MpoolError::Busy)
        } else {
            Ok(())
        }
    }

    pub fn mlog_find(&self, id: MlogId) -> MpoolResult<MlogPropsEx> {
        Self::not_null(id)?;
        Ok(self.exchange(Command::MlogFind { id })?.into_mlog_ex("MlogFind")?)
    }

    /// Open `id`, or take another reference on it if already open.
    ///
    /// Returns the handle reference and the log's generation.
    /// [`MlogOpenFlags::SKIP_SER`] is ignored here; see
    /// [`Pool::mlog_open_unserialized`].
    pub fn mlog_open(&self, id: MlogId, flags: MlogOpenFlags) -> MpoolResult<(Mlog, u64)> {
        self.open_mlog(id, flags.without(MlogOpenFlags::SKIP_SER))
    }

    /// Open `id` with appends and reads left unserialized.
    ///
    /// # Safety
    ///
    /// While the returned reference is alive, the caller must ensure no two
    /// operations on this mlog run concurrently from any reference in this
    /// session. The handle lock that would otherwise enforce this is skipped
    /// on the append and read paths.
    pub unsafe fn mlog_open_unserialized(
        &self,
        id: MlogId,
        flags: MlogOpenFlags,
    ) -> MpoolResult<(Mlog, u64)> {
        self.open_mlog(id, flags | MlogOpenFlags::SKIP_SER)
    }

    fn open_mlog(&self, id: MlogId, flags: MlogOpenFlags) -> MpoolResult<(Mlog, u64)> {
        Self::not_null(id)?;
        let props = self.mlog_find(id)?;

        let (object, slot) = loop {
            if let Some((slot, object)) = self.shared.lock_session()?.registry.find_ref(id) {
                break (Arc::clone(object), slot);
            }

            let candidate = Arc::new(MlogObject::new(Arc::clone(&self.shared), &props));
            let inserted = self
                .shared
                .lock_session()?
                .registry
                .insert(id, Arc::clone(&candidate));
            match inserted {
                Ok(slot) => {
                    debug!(pool = %self.shared.name, mlog = %id, slot, "mlog handle registered");
                    break (candidate, slot);
                }
                // Lost the race to another opener; discard and look again.
                Err((RegistryError::Duplicate, _)) => continue,
                Err((RegistryError::CapacityExceeded { capacity }, _)) => {
                    return Err(MpoolError::CapacityExceeded { capacity });
                }
            }
        };

        object.set_flags(flags);
        let mlog = Mlog::new(Arc::clone(&object), slot);
        match object.open_descriptor(flags) {
            Ok(gen) => Ok((mlog, gen)),
            Err(e) => {
                // Give the reference back; the open error wins over any close error.
                let _ = mlog.close();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.shared.name)
            .field("mode", &self.shared.config.mode)
            .field("live", &self.shared.live.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use mpool_ioctl::{InMemoryDriver, ResultCode};
    use proptest::prelude::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn pool_with(mode: OpenMode) -> (Pool, Arc<InMemoryDriver>) {
        init_tracing();
        let driver = Arc::new(InMemoryDriver::new().unwrap());
        let pool = Pool::open("mp1", mode, driver.clone()).unwrap();
        (pool, driver)
    }

    fn committed_mlog(pool: &Pool) -> MlogId {
        let props = pool
            .mlog_alloc(MediaClass::Capacity, MlogCapacity::bytes(1 << 16))
            .unwrap();
        pool.mlog_commit(props.id).unwrap();
        props.id
    }

    #[test]
    fn reopen_shares_one_handle_and_closes_once() {
        let (pool, driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);

        let (first, gen) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        let (second, gen2) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        assert_eq!(gen, gen2);
        assert!(first.shares_handle_with(&second));
        assert_eq!(pool.mlog_refs(id).unwrap(), 2);
        assert_eq!(driver.count("MlogOpen"), 1);

        first.close().unwrap();
        assert_eq!(driver.count("MlogClose"), 0);
        assert_eq!(pool.open_mlogs().unwrap(), 1);

        second.close().unwrap();
        assert_eq!(driver.count("MlogClose"), 1);
        assert_eq!(pool.open_mlogs().unwrap(), 0);
    }

    #[test]
    fn drop_releases_the_reference() {
        let (pool, driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        {
            let (_mlog, _) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
            assert_eq!(pool.mlog_refs(id).unwrap(), 1);
        }
        assert_eq!(pool.mlog_refs(id).unwrap(), 0);
        assert_eq!(driver.count("MlogClose"), 1);
    }

    #[test]
    fn null_and_missing_ids_are_rejected() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let err = pool.mlog_open(MlogId::null(), MlogOpenFlags::NONE).unwrap_err();
        assert!(matches!(err, MpoolError::InvalidArgument(_)));
        let err = pool.mlog_open(MlogId::new(0xdead), MlogOpenFlags::NONE).unwrap_err();
        assert!(matches!(err, MpoolError::NotFound));
        assert_eq!(pool.open_mlogs().unwrap(), 0);
    }

    #[test]
    fn failed_driver_open_leaves_no_registration() {
        let (pool, driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        driver.fail_next("MlogOpen", ResultCode::Io);
        assert!(pool.mlog_open(id, MlogOpenFlags::NONE).is_err());
        assert_eq!(pool.mlog_refs(id).unwrap(), 0);

        let (mlog, _) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        mlog.close().unwrap();
    }

    #[test]
    fn registry_capacity_surfaces_as_error() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let mut open = Vec::new();
        for _ in 0..MAX_OPEN_MLOGS {
            let id = committed_mlog(&pool);
            open.push(pool.mlog_open(id, MlogOpenFlags::NONE).unwrap().0);
        }
        let extra = committed_mlog(&pool);
        let err = pool.mlog_open(extra, MlogOpenFlags::NONE).unwrap_err();
        assert!(matches!(
            err,
            MpoolError::CapacityExceeded { capacity: MAX_OPEN_MLOGS }
        ));

        open.pop().unwrap().close().unwrap();
        let (mlog, _) = pool.mlog_open(extra, MlogOpenFlags::NONE).unwrap();
        mlog.close().unwrap();
        for mlog in open {
            mlog.close().unwrap();
        }
    }

    #[test]
    fn read_only_session_refuses_writes() {
        let driver = Arc::new(InMemoryDriver::new().unwrap());
        let rw = Pool::open("mp1", OpenMode::ReadWrite, driver.clone()).unwrap();
        let id = committed_mlog(&rw);

        let ro = Pool::open("mp1", OpenMode::ReadOnly, driver).unwrap();
        let err = ro
            .mlog_alloc(MediaClass::Capacity, MlogCapacity::bytes(4096))
            .unwrap_err();
        assert!(matches!(err, MpoolError::PermissionDenied));

        let (mlog, _) = ro.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        assert!(matches!(
            mlog.append(&[b"x"], false),
            Err(MpoolError::PermissionDenied)
        ));
        let mut buf = [0u8; 4];
        assert_eq!(mlog.read(&mut buf).unwrap(), 0);
        mlog.close().unwrap();
    }

    #[test]
    fn open_mlog_blocks_delete_and_pool_close() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        let (mlog, _) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();

        assert!(matches!(pool.mlog_delete(id), Err(MpoolError::Busy)));
        assert!(matches!(pool.close(), Err(MpoolError::Busy)));

        mlog.close().unwrap();
        pool.mlog_delete(id).unwrap();
        pool.close().unwrap();
        assert!(matches!(pool.usage(), Err(MpoolError::BadDescriptor)));
        assert!(matches!(pool.close(), Err(MpoolError::BadDescriptor)));
    }

    #[test]
    fn erase_by_id_requires_a_closed_mlog() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        let (mlog, gen) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        assert!(matches!(pool.mlog_erase_by_id(id, 0), Err(MpoolError::Busy)));
        mlog.close().unwrap();

        let next = pool.mlog_erase_by_id(id, 0).unwrap();
        assert_eq!(next, gen + 1);
        assert_eq!(pool.mlog_find(id).unwrap().props.gen, next);
    }

    #[test]
    fn erase_bumps_generation_and_empties_log() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        let (mlog, gen) = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap();
        mlog.append(&[b"abc"], true).unwrap();
        assert_eq!(mlog.len().unwrap(), 3);

        let next = mlog.erase(gen + 5).unwrap();
        assert_eq!(next, gen + 5);
        assert_eq!(mlog.gen().unwrap(), next);
        assert!(mlog.is_empty().unwrap());
        assert_eq!(mlog.xprops().unwrap().record_count, 0);
        mlog.close().unwrap();
    }

    #[test]
    fn unserialized_handle_still_reads_and_writes() {
        let (pool, _driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        // SAFETY: this test is the only user of the mlog.
        let (mlog, _) = unsafe { pool.mlog_open_unserialized(id, MlogOpenFlags::NONE) }.unwrap();
        mlog.append(&[b"one"], false).unwrap();
        mlog.rewind().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(mlog.read(&mut buf).unwrap(), 3);
        mlog.close().unwrap();
    }

    #[test]
    fn concurrent_opens_share_one_handle() {
        const THREADS: usize = 8;
        let (pool, driver) = pool_with(OpenMode::ReadWrite);
        let id = committed_mlog(&pool);
        let barrier = Barrier::new(THREADS);

        let mlogs: Vec<Mlog> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let mlog = pool.mlog_open(id, MlogOpenFlags::NONE).unwrap().0;
                        #[cfg(debug_assertions)]
                        assert_eq!(crate::lockorder::violations(), 0);
                        mlog
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(mlogs.iter().all(|m| m.shares_handle_with(&mlogs[0])));
        assert_eq!(pool.mlog_refs(id).unwrap(), THREADS as u32);
        assert_eq!(driver.count("MlogOpen"), 1);

        std::thread::scope(|s| {
            for mlog in mlogs {
                s.spawn(move || mlog.close().unwrap());
            }
        });
        assert_eq!(pool.open_mlogs().unwrap(), 0);
        assert_eq!(driver.count("MlogClose"), 1);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Open(usize),
        Close(usize),
        Append(usize),
        Read(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..3).prop_map(Step::Open),
            (0usize..3).prop_map(Step::Close),
            (0usize..3).prop_map(Step::Append),
            (0usize..3).prop_map(Step::Read),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn concurrent_sessions_keep_refcounts_and_lock_order(
            scripts in proptest::collection::vec(proptest::collection::vec(step(), 1..40), 2..4)
        ) {
            let (pool, driver) = pool_with(OpenMode::ReadWrite);
            let ids: Vec<MlogId> = (0..3).map(|_| committed_mlog(&pool)).collect();

            std::thread::scope(|s| {
                for script in &scripts {
                    let (pool, ids) = (&pool, &ids);
                    s.spawn(move || {
                        let mut held: Vec<Vec<Mlog>> = vec![Vec::new(), Vec::new(), Vec::new()];
                        let mut buf = vec![0u8; 64];
                        for step in script {
                            match *step {
                                Step::Open(i) => {
                                    let (mlog, _) = pool.mlog_open(ids[i], MlogOpenFlags::NONE).unwrap();
                                    held[i].push(mlog);
                                }
                                Step::Close(i) => {
                                    if let Some(mlog) = held[i].pop() {
                                        mlog.close().unwrap();
                                    }
                                }
                                Step::Append(i) => {
                                    if let Some(mlog) = held[i].last() {
                                        mlog.append(&[b"rec"], false).unwrap();
                                    }
                                }
                                Step::Read(i) => {
                                    if let Some(mlog) = held[i].last() {
                                        mlog.read(&mut buf).unwrap();
                                    }
                                }
                            }
                        }
                        drop(held);
                        #[cfg(debug_assertions)]
                        assert_eq!(crate::lockorder::violations(), 0);
                    });
                }
            });

            prop_assert_eq!(pool.open_mlogs().unwrap(), 0);
            prop_assert_eq!(driver.count("MlogOpen"), driver.count("MlogClose"));
        }
    }
}
