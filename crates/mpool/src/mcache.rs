//! Memory-mapped mcache regions.
//!
//! An [`McacheMap`] maps a set of committed mblocks read-only into the
//! address space, one bucket per mblock. Bucket `i` starts at
//! `base + i * bucket_size` and holds the contents of the `i`-th mblock
//! given at creation.

use std::fmt;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::Arc;

use mpool_ioctl::{page_size, Command, VmaGeometry};
use mpool_types::{MblockId, VmaAdvice};
use tracing::{debug, trace, warn};

use crate::error::{MpoolError, MpoolResult};
use crate::pool::{Pool, PoolShared};

/// Length passed to [`McacheMap::advise`] to cover everything from the
/// offset to the end of the map.
pub const MCACHE_TO_END: usize = usize::MAX;

/// Kernel paging advice for a range of an mcache map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryAdvice {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
}

impl MemoryAdvice {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Normal => libc::MADV_NORMAL,
            Self::Random => libc::MADV_RANDOM,
            Self::Sequential => libc::MADV_SEQUENTIAL,
            Self::WillNeed => libc::MADV_WILLNEED,
            Self::DontNeed => libc::MADV_DONTNEED,
        }
    }
}

/// Resident and virtual size of an mcache map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Residency {
    /// Pages currently in memory.
    pub resident_pages: usize,
    /// Bytes of address space the map covers.
    pub virtual_bytes: usize,
}

/// Count the resident pages in a `mincore(2)` vector.
///
/// Only bit 0 of each byte carries residency; the other bits are reserved.
pub fn count_resident(vec: &[u8]) -> usize {
    const LOW_BITS: u64 = 0x0101_0101_0101_0101;

    let mut chunks = vec.chunks_exact(8);
    let mut resident = 0;
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        resident += (u64::from_ne_bytes(word) & LOW_BITS).count_ones() as usize;
    }
    resident
        + chunks
            .remainder()
            .iter()
            .filter(|b| **b & 1 != 0)
            .count()
}

/// A read-only mapping of committed mblocks.
pub struct McacheMap {
    pool: Arc<PoolShared>,
    base: *mut u8,
    offset: u64,
    len: usize,
    bucket_size: usize,
    bucket_count: usize,
    page_size: usize,
}

// SAFETY: the mapping is read-only and `base` is never written through.
unsafe impl Send for McacheMap {}
unsafe impl Sync for McacheMap {}

impl Pool {
    /// Map `ids` as consecutive buckets using the session's default advice.
    pub fn mcache_create_default(&self, ids: &[MblockId]) -> MpoolResult<McacheMap> {
        self.mcache_create(ids, self.config().default_advice)
    }

    /// Map `ids` as consecutive buckets.
    ///
    /// Every id must name a committed mblock. A failed mapping releases the
    /// driver-side region before returning.
    pub fn mcache_create(&self, ids: &[MblockId], advice: VmaAdvice) -> MpoolResult<McacheMap> {
        if ids.is_empty() {
            return Err(MpoolError::InvalidArgument("no mblocks to map".into()));
        }
        if ids.iter().any(MblockId::is_null) {
            return Err(MpoolError::InvalidArgument("null mblock id".into()));
        }

        let geometry = self
            .exchange(Command::VmaCreate {
                ids: ids.to_vec(),
                advice,
            })?
            .into_vma("VmaCreate")?;
        let pool = Arc::clone(self.shared());
        let page_size = page_size();
        if let Err(e) = check_geometry(&geometry, page_size) {
            release_region(&pool, geometry.offset);
            return Err(e);
        }
        let fd: RawFd = pool.channel().map_fd();

        // SAFETY: a fresh shared read-only mapping; nothing aliases it yet.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                geometry.len,
                libc::PROT_READ,
                libc::MAP_SHARED | libc::MAP_NORESERVE,
                fd,
                geometry.offset as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            let err = MpoolError::last_os_error("mmap");
            release_region(&pool, geometry.offset);
            return Err(err);
        }

        debug!(
            pool = self.name(),
            offset = geometry.offset,
            buckets = geometry.bucket_count,
            bucket_size = geometry.bucket_size,
            "mcache mapped"
        );
        Ok(McacheMap {
            pool,
            base: base.cast(),
            offset: geometry.offset,
            len: geometry.len,
            bucket_size: geometry.bucket_size,
            bucket_count: geometry.bucket_count,
            page_size,
        })
    }
}

/// Buckets must be whole pages and fit inside the region.
fn check_geometry(geometry: &VmaGeometry, page_size: usize) -> MpoolResult<()> {
    let VmaGeometry {
        bucket_size,
        bucket_count,
        len,
        ..
    } = *geometry;
    let fits = bucket_size
        .checked_mul(bucket_count)
        .is_some_and(|span| span <= len);
    if bucket_count == 0 || bucket_size == 0 || bucket_size % page_size != 0 || !fits {
        return Err(MpoolError::InvalidArgument(format!(
            "driver geometry {bucket_count} x {bucket_size} in {len} bytes"
        )));
    }
    Ok(())
}

/// Tell the driver a region is gone. Runs after the session may have closed.
fn release_region(pool: &PoolShared, offset: u64) {
    match pool.channel().exchange(Command::VmaDestroy { offset }) {
        Ok(_) => trace!(offset, "vma released"),
        Err(e) => warn!(offset, error = %e, "vma release failed"),
    }
}

impl McacheMap {
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Bytes of address space mapped.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base(&self) -> *const u8 {
        self.base
    }

    /// Byte offset of page `page` of bucket `bucket` from the map base.
    ///
    /// Page numbers are not bounded by the bucket: pages past its end
    /// address the buckets that follow.
    pub fn page_offset(&self, bucket: usize, page: usize) -> MpoolResult<usize> {
        if bucket >= self.bucket_count {
            return Err(MpoolError::OutOfRange {
                index: bucket,
                limit: self.bucket_count,
            });
        }
        page
            .checked_mul(self.page_size)
            .and_then(|p| p.checked_add(bucket * self.bucket_size))
            .ok_or(MpoolError::OutOfRange {
                index: page,
                limit: usize::MAX / self.page_size,
            })
    }

    /// Address of page `page` of bucket `bucket`. The address is not
    /// guaranteed to lie inside the map; [`McacheMap::page`] checks.
    pub fn page_addr(&self, bucket: usize, page: usize) -> MpoolResult<*const u8> {
        let offset = self.page_offset(bucket, page)?;
        Ok(self.base.cast_const().wrapping_add(offset))
    }

    /// Contents of bucket `bucket`.
    pub fn bucket(&self, bucket: usize) -> MpoolResult<&[u8]> {
        let start = self.page_offset(bucket, 0)?;
        Ok(self.slice(start, self.bucket_size))
    }

    /// Contents of one page, counted from the start of `bucket`.
    pub fn page(&self, bucket: usize, page: usize) -> MpoolResult<&[u8]> {
        let start = self.page_offset(bucket, page)?;
        if start >= self.len {
            return Err(MpoolError::OutOfRange {
                index: page,
                limit: self.len.saturating_sub(bucket * self.bucket_size) / self.page_size,
            });
        }
        Ok(self.slice(start, self.page_size))
    }

    /// Resolve one page of `bucket` per entry in `pages` into `out`.
    ///
    /// `out` is left untouched unless every page resolves.
    pub fn pages<'a>(
        &'a self,
        bucket: usize,
        pages: &[usize],
        out: &mut [&'a [u8]],
    ) -> MpoolResult<()> {
        if out.len() < pages.len() {
            return Err(MpoolError::InvalidArgument(format!(
                "{} pages requested into {} slots",
                pages.len(),
                out.len()
            )));
        }
        let resolved = pages
            .iter()
            .map(|page| self.page(bucket, *page))
            .collect::<MpoolResult<Vec<_>>>()?;
        for (slot, page) in out.iter_mut().zip(resolved) {
            *slot = page;
        }
        Ok(())
    }

    fn slice(&self, start: usize, len: usize) -> &[u8] {
        let len = len.min(self.len.saturating_sub(start));
        // SAFETY: callers pass a start inside the mapping; it stays mapped
        // and read-only for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.base.add(start), len) }
    }

    /// Advise the kernel about `length` bytes of bucket `bucket` starting
    /// at byte `offset` within it.
    ///
    /// With [`MCACHE_TO_END`] the range runs to the end of the map and may
    /// span later buckets; otherwise it must stay inside the bucket.
    pub fn advise(
        &self,
        bucket: usize,
        offset: usize,
        length: usize,
        advice: MemoryAdvice,
    ) -> MpoolResult<()> {
        if bucket >= self.bucket_count {
            return Err(MpoolError::InvalidArgument(format!(
                "bucket {bucket} of {}",
                self.bucket_count
            )));
        }
        if length != MCACHE_TO_END && offset > self.bucket_size {
            return Err(MpoolError::InvalidArgument(format!(
                "offset {offset} exceeds bucket size {}",
                self.bucket_size
            )));
        }
        let total = self.bucket_size * self.bucket_count;
        let start = (bucket * self.bucket_size)
            .checked_add(offset)
            .ok_or_else(|| MpoolError::InvalidArgument(format!("offset {offset} overflows")))?;

        let length = if length == MCACHE_TO_END {
            if start > total {
                return Err(MpoolError::InvalidArgument(format!(
                    "offset {offset} past the end of the map"
                )));
            }
            total - start
        } else {
            match offset.checked_add(length) {
                Some(end) if end <= self.bucket_size => length,
                _ => {
                    return Err(MpoolError::InvalidArgument(format!(
                        "range {offset}+{length} exceeds bucket size {}",
                        self.bucket_size
                    )))
                }
            }
        };

        trace!(bucket, offset, length, ?advice, "mcache advise");
        // SAFETY: the range lies within the mapping; advice changes no
        // memory contents of a read-only shared mapping.
        let rc = unsafe { libc::madvise(self.base.add(start).cast(), length, advice.as_raw()) };
        if rc != 0 {
            return Err(MpoolError::last_os_error("madvise"));
        }
        Ok(())
    }

    /// Resident pages and virtual size of the map.
    ///
    /// Asks the driver first. If it cannot answer and the session allows it,
    /// residency is counted locally with `mincore(2)`.
    pub fn residency(&self) -> MpoolResult<Residency> {
        let reported = self
            .pool
            .exchange(Command::VmaVrss {
                offset: self.offset,
            })
            .and_then(|reply| reply.into_vrss("VmaVrss").map_err(MpoolError::from));

        match reported {
            Ok((rss_pages, vss_bytes)) => Ok(Residency {
                resident_pages: rss_pages as usize,
                virtual_bytes: vss_bytes as usize,
            }),
            Err(e) if self.pool.config().residency_fallback => {
                trace!(error = %e, "driver residency unavailable, scanning locally");
                self.scan_residency()
            }
            Err(e) => Err(e),
        }
    }

    fn scan_residency(&self) -> MpoolResult<Residency> {
        let span = (self.bucket_size * self.bucket_count).min(self.len);
        let mut vec = vec![0u8; span.div_ceil(self.page_size)];
        // SAFETY: `vec` has one byte per page of the span.
        let rc = unsafe { libc::mincore(self.base.cast(), span, vec.as_mut_ptr().cast()) };
        if rc != 0 {
            return Err(MpoolError::last_os_error("mincore"));
        }
        Ok(Residency {
            resident_pages: count_resident(&vec),
            virtual_bytes: span,
        })
    }

    /// Ask the driver to drop the map's cached pages.
    pub fn purge(&self) -> MpoolResult<()> {
        Ok(self
            .pool
            .exchange(Command::VmaPurge {
                offset: self.offset,
            })?
            .into_done("VmaPurge")?)
    }

    /// Unmap the region and release it on the driver.
    ///
    /// If `munmap(2)` fails the map is handed back, still mapped, with the
    /// error. A failed driver release is only logged.
    pub fn destroy(mut self) -> Result<(), (Self, MpoolError)> {
        match self.unmap() {
            Ok(()) => Ok(()),
            Err(e) => Err((self, e)),
        }
    }

    fn unmap(&mut self) -> MpoolResult<()> {
        if self.base.is_null() {
            return Ok(());
        }
        // SAFETY: `base` and `len` describe a mapping created by `mmap`, and
        // no borrow of it can outlive `self`.
        let rc = unsafe { libc::munmap(self.base.cast(), self.len) };
        if rc != 0 {
            return Err(MpoolError::last_os_error("munmap"));
        }
        self.base = ptr::null_mut();
        debug!(offset = self.offset, "mcache unmapped");
        release_region(&self.pool, self.offset);
        Ok(())
    }
}

impl Drop for McacheMap {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            warn!(offset = self.offset, error = %e, "mcache unmap on drop failed");
        }
    }
}

impl fmt::Debug for McacheMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McacheMap")
            .field("base", &self.base)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("bucket_size", &self.bucket_size)
            .field("bucket_count", &self.bucket_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpool_ioctl::{ChannelResult, CommandChannel, DriverConfig, InMemoryDriver, Reply};
    use mpool_types::MediaClass;

    use crate::config::PoolConfig;

    fn setup(config: DriverConfig, pool_config: PoolConfig) -> (Pool, Arc<InMemoryDriver>) {
        let driver = Arc::new(InMemoryDriver::with_config(config).unwrap());
        let pool = Pool::open_with_config("mp1", pool_config, driver.clone()).unwrap();
        (pool, driver)
    }

    fn one_page_buckets() -> DriverConfig {
        DriverConfig {
            mblock_capacity: page_size() as u64,
            ..DriverConfig::default()
        }
    }

    fn committed(pool: &Pool, fill: u8, len: usize) -> MblockId {
        let mb = pool.mblock_alloc(MediaClass::Capacity, false).unwrap();
        pool.mblock_write(mb.id, &[vec![fill; len].as_slice()]).unwrap();
        pool.mblock_commit(mb.id).unwrap();
        mb.id
    }

    #[test]
    fn resident_bits_are_counted() {
        let mut vec = [0u8; 16];
        for i in [0, 1, 2, 4, 7, 8, 9, 11, 13, 15] {
            vec[i] = 1;
        }
        // Reserved bits must be ignored.
        vec[3] = 0xfe;
        assert_eq!(count_resident(&vec), 10);
        assert_eq!(count_resident(&[1, 0, 1]), 2);
        assert_eq!(count_resident(&[]), 0);
    }

    #[test]
    fn buckets_hold_mblock_contents() {
        let (pool, _driver) = setup(DriverConfig::default(), PoolConfig::default());
        let a = committed(&pool, b'a', 100);
        let b = committed(&pool, b'b', 5000);
        let map = pool.mcache_create(&[a, b], VmaAdvice::Warm).unwrap();

        assert_eq!(map.bucket_count(), 2);
        assert_eq!(map.bucket_size() % page_size(), 0);
        assert_eq!(&map.bucket(0).unwrap()[..100], &[b'a'; 100][..]);
        assert_eq!(map.bucket(0).unwrap()[100], 0);
        assert_eq!(&map.bucket(1).unwrap()[..5000], &vec![b'b'; 5000][..]);
        map.destroy().map_err(|(_, e)| e).unwrap();
    }

    #[test]
    fn page_addresses_follow_bucket_geometry() {
        let (pool, _driver) = setup(one_page_buckets(), PoolConfig::default());
        let ids: Vec<_> = (0..8).map(|i| committed(&pool, i, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Hot).unwrap();
        let ps = page_size();

        assert_eq!(map.bucket_size(), ps);
        assert_eq!(map.page_addr(3, 0).unwrap(), map.base().wrapping_add(3 * ps));
        assert_eq!(
            map.page_addr(3, 2).unwrap(),
            map.base().wrapping_add(3 * ps + 2 * ps)
        );
        assert_eq!(map.page(5, 0).unwrap()[0], 5);
        assert_eq!(map.page(3, 2).unwrap()[0], 5);
        assert!(matches!(
            map.page_offset(8, 0),
            Err(MpoolError::OutOfRange { index: 8, limit: 8 })
        ));
        assert!(matches!(
            map.page(7, 1),
            Err(MpoolError::OutOfRange { index: 1, limit: 1 })
        ));

        let mut out: [&[u8]; 2] = [&[], &[]];
        map.pages(2, &[0, 0], &mut out).unwrap();
        assert_eq!(out[0][0], 2);
        assert!(map.pages(2, &[0, 0], &mut out[..1]).is_err());
    }

    #[test]
    fn multi_page_buckets_address_pages() {
        let ps = page_size();
        let config = DriverConfig {
            mblock_capacity: 4 * ps as u64,
            ..DriverConfig::default()
        };
        let (pool, _driver) = setup(config, PoolConfig::default());
        let ids: Vec<_> = (0..4).map(|i| committed(&pool, i, 4 * ps)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();

        assert_eq!(map.page_offset(3, 2).unwrap(), 3 * 4 * ps + 2 * ps);
        assert_eq!(
            map.page_addr(3, 2).unwrap(),
            map.base().wrapping_add(3 * 4 * ps + 2 * ps)
        );
        assert_eq!(map.page(3, 2).unwrap().len(), ps);
        assert!(matches!(
            map.page(3, 4),
            Err(MpoolError::OutOfRange { index: 4, limit: 4 })
        ));
    }

    #[test]
    fn failed_page_lookup_leaves_output_untouched() {
        let (pool, _driver) = setup(one_page_buckets(), PoolConfig::default());
        let ids: Vec<_> = (0..2).map(|i| committed(&pool, i + 1, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();

        let mut out: [&[u8]; 2] = [&[], &[]];
        assert!(matches!(
            map.pages(0, &[0, 5], &mut out),
            Err(MpoolError::OutOfRange { index: 5, .. })
        ));
        assert!(out.iter().all(|page| page.is_empty()));

        map.pages(0, &[0, 1], &mut out).unwrap();
        assert_eq!(out[0][0], 1);
        assert_eq!(out[1][0], 2);
    }

    #[test]
    fn advise_validates_ranges() {
        let (pool, _driver) = setup(one_page_buckets(), PoolConfig::default());
        let ids: Vec<_> = (0..2).map(|i| committed(&pool, i, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();
        let ps = page_size();

        map.advise(0, 0, MCACHE_TO_END, MemoryAdvice::WillNeed).unwrap();
        map.advise(1, 0, ps, MemoryAdvice::Sequential).unwrap();
        assert!(matches!(
            map.advise(0, 0, ps + 1, MemoryAdvice::Normal),
            Err(MpoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            map.advise(2, 0, MCACHE_TO_END, MemoryAdvice::Normal),
            Err(MpoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            map.advise(0, 3 * ps, MCACHE_TO_END, MemoryAdvice::Normal),
            Err(MpoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn advise_rejects_huge_offsets() {
        let (pool, _driver) = setup(one_page_buckets(), PoolConfig::default());
        let ids: Vec<_> = (0..2).map(|i| committed(&pool, i, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();

        assert!(matches!(
            map.advise(1, usize::MAX, 1, MemoryAdvice::Normal),
            Err(MpoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            map.advise(1, usize::MAX, MCACHE_TO_END, MemoryAdvice::Normal),
            Err(MpoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn residency_prefers_driver_counters() {
        let (pool, _driver) = setup(one_page_buckets(), PoolConfig::default());
        let ids: Vec<_> = (0..3).map(|i| committed(&pool, i, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();

        let residency = map.residency().unwrap();
        assert_eq!(residency.resident_pages, 3);
        assert_eq!(residency.virtual_bytes, map.len());
    }

    #[test]
    fn residency_falls_back_to_mincore() {
        let config = DriverConfig {
            track_residency: false,
            ..one_page_buckets()
        };
        let (pool, _driver) = setup(config.clone(), PoolConfig::default());
        let ids: Vec<_> = (0..4).map(|i| committed(&pool, i, 16)).collect();
        let map = pool.mcache_create(&ids, VmaAdvice::Warm).unwrap();

        // Touch every bucket so its page is resident.
        let sum: u32 = (0..4).map(|b| u32::from(map.bucket(b).unwrap()[0])).sum();
        assert_eq!(sum, 6);
        let residency = map.residency().unwrap();
        assert_eq!(residency.virtual_bytes, 4 * page_size());
        assert!(residency.resident_pages <= 4);

        let strict = PoolConfig {
            residency_fallback: false,
            ..PoolConfig::default()
        };
        let (pool, _driver) = setup(config, strict);
        let id = committed(&pool, 1, 16);
        let map = pool.mcache_create(&[id], VmaAdvice::Warm).unwrap();
        assert!(map.residency().is_err());
    }

    #[test]
    fn failed_mapping_releases_the_region() {
        let (pool, driver) = setup(one_page_buckets(), PoolConfig::default());
        let id = committed(&pool, 1, 16);
        driver.misalign_next_vma();

        let err = pool.mcache_create(&[id], VmaAdvice::Warm).unwrap_err();
        assert!(matches!(err, MpoolError::Io { op: "mmap", .. }));
        assert_eq!(driver.count("VmaDestroy"), 1);
        assert_eq!(driver.vma_count(), 0);
    }

    #[test]
    fn destroying_a_map_releases_its_mblocks() {
        let (pool, driver) = setup(one_page_buckets(), PoolConfig::default());
        let id = committed(&pool, 1, 16);
        let map = pool.mcache_create_default(&[id]).unwrap();
        map.purge().unwrap();
        assert!(matches!(pool.mblock_delete(id), Err(MpoolError::Busy)));

        map.destroy().map_err(|(_, e)| e).unwrap();
        assert_eq!(driver.count("VmaDestroy"), 1);
        assert_eq!(driver.vma_count(), 0);
        pool.mblock_delete(id).unwrap();
    }

    #[test]
    fn dropping_a_map_releases_its_mblocks() {
        let (pool, driver) = setup(one_page_buckets(), PoolConfig::default());
        let id = committed(&pool, 1, 16);
        let map = pool.mcache_create(&[id], VmaAdvice::Warm).unwrap();
        drop(map);
        assert_eq!(driver.vma_count(), 0);
        pool.mblock_delete(id).unwrap();
    }

    /// Passes commands through, reporting regions shorter than they are.
    struct ShortRegions(Arc<InMemoryDriver>);

    impl CommandChannel for ShortRegions {
        fn exchange(&self, command: Command) -> ChannelResult<Reply> {
            match self.0.exchange(command)? {
                Reply::Vma(mut geometry) => {
                    geometry.len -= 1;
                    Ok(Reply::Vma(geometry))
                }
                reply => Ok(reply),
            }
        }

        fn map_fd(&self) -> RawFd {
            self.0.map_fd()
        }
    }

    #[test]
    fn inconsistent_geometry_is_rejected_before_mapping() {
        let driver = Arc::new(InMemoryDriver::with_config(one_page_buckets()).unwrap());
        let pool = Pool::open_with_config(
            "mp1",
            PoolConfig::default(),
            Arc::new(ShortRegions(driver.clone())),
        )
        .unwrap();
        let id = committed(&pool, 1, 16);

        let err = pool.mcache_create(&[id], VmaAdvice::Warm).unwrap_err();
        assert!(matches!(err, MpoolError::InvalidArgument(_)));
        assert_eq!(driver.count("VmaDestroy"), 1);
        assert_eq!(driver.vma_count(), 0);
    }

    #[test]
    fn map_outlives_pool_close() {
        let (pool, driver) = setup(one_page_buckets(), PoolConfig::default());
        let id = committed(&pool, 9, 16);
        let map = pool.mcache_create(&[id], VmaAdvice::Warm).unwrap();
        pool.close().unwrap();
        assert_eq!(map.bucket(0).unwrap()[0], 9);
        assert!(matches!(map.purge(), Err(MpoolError::BadDescriptor)));
        drop(map);
        assert_eq!(driver.vma_count(), 0);
    }

    #[test]
    fn empty_and_null_id_lists_are_rejected() {
        let (pool, driver) = setup(one_page_buckets(), PoolConfig::default());
        assert!(matches!(
            pool.mcache_create(&[], VmaAdvice::Warm),
            Err(MpoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.mcache_create(&[MblockId::null()], VmaAdvice::Warm),
            Err(MpoolError::InvalidArgument(_))
        ));
        assert_eq!(driver.count("VmaCreate"), 0);
    }
}
