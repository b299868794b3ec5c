//! In-process driver for tests and embedding.
//!
//! [`InMemoryDriver`] keeps every object in maps behind one `Mutex`, the
//! way the driver serializes commands on a pool descriptor. mblock contents
//! are copied into a temporary file when an mcache map is created, so the
//! regions it hands out can be mapped with `mmap(2)` exactly like a device.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use mpool_types::{
    MblockId, MblockProps, MclassProps, MediaClass, MlogCapacity, MlogId, MlogProps, MlogPropsEx,
    ObjectState, PoolUsage, VmaAdvice,
};
use tracing::{debug, trace};

use crate::command::{Command, Record, RecordKind, Reply, VmaGeometry};
use crate::error::{ChannelError, ChannelResult, ResultCode};
use crate::page_size;
use crate::traits::CommandChannel;

/// Configuration for the in-process driver.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Capacity of every mblock in bytes (default: 1 MiB).
    pub mblock_capacity: u64,
    /// Total pool capacity in bytes (default: 1 GiB).
    pub total_capacity: u64,
    /// Whether `VmaVrss` is answered. When `false` the command is rejected
    /// with [`ResultCode::Unsupported`].
    pub track_residency: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mblock_capacity: 1024 * 1024,
            total_capacity: 1024 * 1024 * 1024,
            track_residency: true,
        }
    }
}

struct MlogEntry {
    props: MlogProps,
    records: Vec<Record>,
    data_len: u64,
}

impl MlogEntry {
    fn props_ex(&self) -> MlogPropsEx {
        MlogPropsEx {
            props: self.props,
            record_count: self.records.len() as u64,
            data_len: self.data_len,
        }
    }
}

struct MblockEntry {
    props: MblockProps,
    data: Vec<u8>,
}

struct VmaEntry {
    geometry: VmaGeometry,
    ids: Vec<MblockId>,
}

#[derive(Default)]
struct DriverState {
    next_id: u64,
    used: u64,
    mlogs: HashMap<MlogId, MlogEntry>,
    mblocks: HashMap<MblockId, MblockEntry>,
    vmas: BTreeMap<u64, VmaEntry>,
    next_vma_offset: u64,
    counts: HashMap<&'static str, u64>,
    injected: HashMap<&'static str, ResultCode>,
    misalign_next_vma: bool,
}

impl DriverState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn mlog(&mut self, id: MlogId) -> Result<&mut MlogEntry, ResultCode> {
        self.mlogs.get_mut(&id).ok_or(ResultCode::NotFound)
    }

    fn mblock(&mut self, id: MblockId) -> Result<&mut MblockEntry, ResultCode> {
        self.mblocks.get_mut(&id).ok_or(ResultCode::NotFound)
    }
}

/// In-process implementation of [`CommandChannel`].
pub struct InMemoryDriver {
    config: DriverConfig,
    backing: File,
    state: Mutex<DriverState>,
}

impl InMemoryDriver {
    /// Create a driver with the default configuration.
    pub fn new() -> std::io::Result<Self> {
        Self::with_config(DriverConfig::default())
    }

    /// Create a driver; mcache regions are staged in an anonymous temp file.
    pub fn with_config(config: DriverConfig) -> std::io::Result<Self> {
        let backing = tempfile::tempfile()?;
        Ok(Self {
            config,
            backing,
            state: Mutex::new(DriverState {
                next_id: 0x1000,
                ..DriverState::default()
            }),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// How many times a command (by [`Command::name`]) reached the driver.
    pub fn count(&self, command: &str) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        state.counts.get(command).copied().unwrap_or(0)
    }

    /// Reject the next exchange of `command` with `code`.
    pub fn fail_next(&self, command: &'static str, code: ResultCode) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.injected.insert(command, code);
    }

    /// Hand out a region offset that is not page aligned on the next
    /// `VmaCreate`, so mapping it fails.
    pub fn misalign_next_vma(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.misalign_next_vma = true;
    }

    /// Number of live mcache regions.
    pub fn vma_count(&self) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.vmas.len()
    }

    fn execute(&self, state: &mut DriverState, command: Command) -> Result<Reply, ResultCode> {
        match command {
            Command::PoolUsage => Ok(Reply::Usage(PoolUsage {
                total: self.config.total_capacity,
                usable: self.config.total_capacity,
                free: self.config.total_capacity - state.used,
                used: state.used,
            })),
            Command::MclassGet { mclass } => match mclass {
                MediaClass::Capacity => Ok(Reply::Mclass(MclassProps {
                    mclass,
                    zone_size: self.config.mblock_capacity,
                    total: self.config.total_capacity,
                    used: state.used,
                })),
                MediaClass::Staging => Err(ResultCode::NotFound),
            },

            Command::MlogAlloc { mclass, capacity } => self.mlog_alloc(state, mclass, capacity),
            Command::MlogCommit { id } => {
                let entry = state.mlog(id)?;
                if entry.props.state != ObjectState::Allocated {
                    return Err(ResultCode::Invalid);
                }
                entry.props.state = ObjectState::Committed;
                Ok(Reply::Done)
            }
            Command::MlogAbort { id } => {
                let entry = state.mlog(id)?;
                if entry.props.state != ObjectState::Allocated {
                    return Err(ResultCode::Invalid);
                }
                let capacity = entry.props.capacity;
                state.mlogs.remove(&id);
                state.used -= capacity;
                Ok(Reply::Done)
            }
            Command::MlogDelete { id } => {
                let entry = state.mlog(id)?;
                if entry.props.state != ObjectState::Committed {
                    return Err(ResultCode::Invalid);
                }
                let capacity = entry.props.capacity;
                state.mlogs.remove(&id);
                state.used -= capacity;
                Ok(Reply::Done)
            }
            Command::MlogFind { id } | Command::MlogProps { id } => {
                Ok(Reply::MlogEx(state.mlog(id)?.props_ex()))
            }
            Command::MlogErase { id, min_gen } => {
                let entry = state.mlog(id)?;
                entry.props.gen = (entry.props.gen + 1).max(min_gen);
                entry.records.clear();
                entry.data_len = 0;
                Ok(Reply::Erased {
                    gen: entry.props.gen,
                })
            }
            Command::MlogOpen { id, .. } => {
                let entry = state.mlog(id)?;
                if entry.props.state != ObjectState::Committed {
                    return Err(ResultCode::Invalid);
                }
                Ok(Reply::MlogEx(entry.props_ex()))
            }
            Command::MlogAppend {
                id,
                kind,
                data,
                sync: _,
            } => {
                let entry = state.mlog(id)?;
                if entry.props.state != ObjectState::Committed {
                    return Err(ResultCode::Invalid);
                }
                if entry.data_len + data.len() as u64 > entry.props.capacity {
                    return Err(ResultCode::NoSpace);
                }
                if kind == RecordKind::Data {
                    entry.data_len += data.len() as u64;
                }
                entry.records.push(Record { kind, data });
                Ok(Reply::Done)
            }
            Command::MlogReadRecord { id, index } => {
                let entry = state.mlog(id)?;
                let record = usize::try_from(index)
                    .ok()
                    .and_then(|i| entry.records.get(i))
                    .cloned();
                Ok(Reply::Record(record))
            }
            Command::MlogFlush { id } | Command::MlogClose { id } => {
                state.mlog(id)?;
                Ok(Reply::Done)
            }

            Command::MblockAlloc { mclass, spare: _ } => {
                let capacity = self.config.mblock_capacity;
                if state.used + capacity > self.config.total_capacity {
                    return Err(ResultCode::NoSpace);
                }
                let id = MblockId::new(state.alloc_id());
                let props = MblockProps {
                    id,
                    write_len: 0,
                    capacity,
                    optimal_write_size: page_size() as u32,
                    mclass,
                    state: ObjectState::Allocated,
                };
                state.used += capacity;
                state.mblocks.insert(
                    id,
                    MblockEntry {
                        props,
                        data: Vec::new(),
                    },
                );
                Ok(Reply::Mblock(props))
            }
            Command::MblockFind { id } => Ok(Reply::Mblock(state.mblock(id)?.props)),
            Command::MblockCommit { id } => {
                let entry = state.mblock(id)?;
                if entry.props.state != ObjectState::Allocated {
                    return Err(ResultCode::Invalid);
                }
                entry.props.state = ObjectState::Committed;
                Ok(Reply::Done)
            }
            Command::MblockAbort { id } => Self::mblock_remove(state, id, ObjectState::Allocated),
            Command::MblockDelete { id } => Self::mblock_remove(state, id, ObjectState::Committed),
            Command::MblockWrite { id, data } => {
                let entry = state.mblock(id)?;
                if entry.props.state != ObjectState::Allocated {
                    return Err(ResultCode::Invalid);
                }
                if entry.props.write_len + data.len() as u64 > entry.props.capacity {
                    return Err(ResultCode::NoSpace);
                }
                entry.data.extend_from_slice(&data);
                entry.props.write_len = entry.data.len() as u64;
                Ok(Reply::Done)
            }
            Command::MblockRead { id, offset, len } => {
                let entry = state.mblock(id)?;
                let start = usize::try_from(offset).map_err(|_| ResultCode::Invalid)?;
                let end = start.checked_add(len).ok_or(ResultCode::Invalid)?;
                if end > entry.data.len() {
                    return Err(ResultCode::Invalid);
                }
                Ok(Reply::Data(entry.data[start..end].to_vec()))
            }

            Command::VmaCreate { ids, advice } => self.vma_create(state, ids, advice),
            Command::VmaDestroy { offset } => {
                state.vmas.remove(&offset).ok_or(ResultCode::NotFound)?;
                Ok(Reply::Done)
            }
            Command::VmaPurge { offset } => {
                state.vmas.get(&offset).ok_or(ResultCode::NotFound)?;
                Ok(Reply::Done)
            }
            Command::VmaVrss { offset } => {
                if !self.config.track_residency {
                    return Err(ResultCode::Unsupported);
                }
                let vma = state.vmas.get(&offset).ok_or(ResultCode::NotFound)?;
                let page = page_size() as u64;
                let rss_pages = vma
                    .ids
                    .iter()
                    .filter_map(|id| state.mblocks.get(id))
                    .map(|mb| mb.props.write_len.div_ceil(page))
                    .sum();
                Ok(Reply::Vrss {
                    rss_pages,
                    vss_bytes: vma.geometry.len as u64,
                })
            }
        }
    }

    fn mlog_alloc(
        &self,
        state: &mut DriverState,
        mclass: MediaClass,
        capacity: MlogCapacity,
    ) -> Result<Reply, ResultCode> {
        if capacity.capacity == 0 {
            return Err(ResultCode::Invalid);
        }
        if state.used + capacity.capacity > self.config.total_capacity {
            return Err(ResultCode::NoSpace);
        }
        let id = MlogId::new(state.alloc_id());
        let props = MlogProps {
            id,
            gen: 1,
            capacity: capacity.capacity,
            mclass,
            state: ObjectState::Allocated,
        };
        state.used += capacity.capacity;
        state.mlogs.insert(
            id,
            MlogEntry {
                props,
                records: Vec::new(),
                data_len: 0,
            },
        );
        Ok(Reply::Mlog(props))
    }

    fn mblock_remove(
        state: &mut DriverState,
        id: MblockId,
        required: ObjectState,
    ) -> Result<Reply, ResultCode> {
        let entry = state.mblock(id)?;
        if entry.props.state != required {
            return Err(ResultCode::Invalid);
        }
        let capacity = entry.props.capacity;
        if state.vmas.values().any(|vma| vma.ids.contains(&id)) {
            return Err(ResultCode::Busy);
        }
        state.mblocks.remove(&id);
        state.used -= capacity;
        Ok(Reply::Done)
    }

    fn vma_create(
        &self,
        state: &mut DriverState,
        ids: Vec<MblockId>,
        advice: VmaAdvice,
    ) -> Result<Reply, ResultCode> {
        if ids.is_empty() {
            return Err(ResultCode::Invalid);
        }
        for id in &ids {
            let entry = state.mblocks.get(id).ok_or(ResultCode::NotFound)?;
            if entry.props.state != ObjectState::Committed {
                return Err(ResultCode::Invalid);
            }
        }

        let page = page_size() as u64;
        let bucket_size = self.config.mblock_capacity.div_ceil(page) * page;
        let len = bucket_size * ids.len() as u64;
        let offset = state.next_vma_offset;

        for (i, id) in ids.iter().enumerate() {
            let data = &state.mblocks[id].data;
            self.backing
                .write_all_at(data, offset + i as u64 * bucket_size)
                .map_err(|_| ResultCode::Io)?;
        }
        let end = offset + len;
        if self.backing.metadata().map_err(|_| ResultCode::Io)?.len() < end {
            self.backing.set_len(end).map_err(|_| ResultCode::Io)?;
        }
        state.next_vma_offset = end;

        let handed_out = if std::mem::take(&mut state.misalign_next_vma) {
            offset + 1
        } else {
            offset
        };
        let geometry = VmaGeometry {
            bucket_size: bucket_size as usize,
            bucket_count: ids.len(),
            offset: handed_out,
            len: len as usize,
        };
        debug!(offset = handed_out, buckets = ids.len(), ?advice, "vma created");
        state.vmas.insert(handed_out, VmaEntry { geometry, ids });
        Ok(Reply::Vma(geometry))
    }
}

impl CommandChannel for InMemoryDriver {
    fn exchange(&self, command: Command) -> ChannelResult<Reply> {
        let name = command.name();
        let mut state = self.state.lock().expect("lock poisoned");
        *state.counts.entry(name).or_insert(0) += 1;
        trace!(command = name, "exchange");

        if let Some(code) = state.injected.remove(name) {
            return Err(ChannelError::rejected(name, code));
        }
        self.execute(&mut state, command)
            .map_err(|code| ChannelError::rejected(name, code))
    }

    fn map_fd(&self) -> RawFd {
        self.backing.as_raw_fd()
    }
}

impl std::fmt::Debug for InMemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDriver")
            .field("config", &self.config)
            .finish()
    }
}
