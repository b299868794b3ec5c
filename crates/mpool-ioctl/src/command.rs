use mpool_types::{
    MblockId, MblockProps, MclassProps, MediaClass, MlogCapacity, MlogId, MlogOpenFlags,
    MlogProps, MlogPropsEx, PoolUsage, VmaAdvice,
};
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, ChannelResult};

/// Kind of a record stored in an mlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Data,
    /// Start of a compaction run.
    CompactStart,
    /// End of a compaction run.
    CompactEnd,
}

/// One mlog record as stored by the driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub data: Vec<u8>,
}

/// Geometry of an mcache map, chosen by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmaGeometry {
    /// Stride between consecutive mblocks in the mapping.
    pub bucket_size: usize,
    /// Number of mblocks (buckets) in the mapping.
    pub bucket_count: usize,
    /// Offset of the region on the pool descriptor.
    pub offset: u64,
    /// Length of the region in bytes.
    pub len: usize,
}

/// All commands understood by the driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    PoolUsage,
    MclassGet { mclass: MediaClass },

    MlogAlloc { mclass: MediaClass, capacity: MlogCapacity },
    MlogCommit { id: MlogId },
    MlogAbort { id: MlogId },
    MlogDelete { id: MlogId },
    MlogFind { id: MlogId },
    MlogProps { id: MlogId },
    MlogErase { id: MlogId, min_gen: u64 },
    MlogOpen { id: MlogId, flags: MlogOpenFlags },
    MlogAppend { id: MlogId, kind: RecordKind, data: Vec<u8>, sync: bool },
    MlogReadRecord { id: MlogId, index: u64 },
    MlogFlush { id: MlogId },
    MlogClose { id: MlogId },

    MblockAlloc { mclass: MediaClass, spare: bool },
    MblockFind { id: MblockId },
    MblockCommit { id: MblockId },
    MblockAbort { id: MblockId },
    MblockDelete { id: MblockId },
    MblockWrite { id: MblockId, data: Vec<u8> },
    MblockRead { id: MblockId, offset: u64, len: usize },

    VmaCreate { ids: Vec<MblockId>, advice: VmaAdvice },
    VmaDestroy { offset: u64 },
    VmaPurge { offset: u64 },
    VmaVrss { offset: u64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PoolUsage => "PoolUsage",
            Self::MclassGet { .. } => "MclassGet",
            Self::MlogAlloc { .. } => "MlogAlloc",
            Self::MlogCommit { .. } => "MlogCommit",
            Self::MlogAbort { .. } => "MlogAbort",
            Self::MlogDelete { .. } => "MlogDelete",
            Self::MlogFind { .. } => "MlogFind",
            Self::MlogProps { .. } => "MlogProps",
            Self::MlogErase { .. } => "MlogErase",
            Self::MlogOpen { .. } => "MlogOpen",
            Self::MlogAppend { .. } => "MlogAppend",
            Self::MlogReadRecord { .. } => "MlogReadRecord",
            Self::MlogFlush { .. } => "MlogFlush",
            Self::MlogClose { .. } => "MlogClose",
            Self::MblockAlloc { .. } => "MblockAlloc",
            Self::MblockFind { .. } => "MblockFind",
            Self::MblockCommit { .. } => "MblockCommit",
            Self::MblockAbort { .. } => "MblockAbort",
            Self::MblockDelete { .. } => "MblockDelete",
            Self::MblockWrite { .. } => "MblockWrite",
            Self::MblockRead { .. } => "MblockRead",
            Self::VmaCreate { .. } => "VmaCreate",
            Self::VmaDestroy { .. } => "VmaDestroy",
            Self::VmaPurge { .. } => "VmaPurge",
            Self::VmaVrss { .. } => "VmaVrss",
        }
    }
}

/// Typed payload of a successful command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Done,
    Usage(PoolUsage),
    Mclass(MclassProps),
    Mlog(MlogProps),
    MlogEx(MlogPropsEx),
    Erased { gen: u64 },
    Record(Option<Record>),
    Mblock(MblockProps),
    Data(Vec<u8>),
    Vma(VmaGeometry),
    Vrss { rss_pages: u64, vss_bytes: u64 },
}

macro_rules! reply_accessor {
    ($(#[$meta:meta])* $fn:ident, $variant:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn(self, command: &'static str) -> ChannelResult<$ty> {
            match self {
                Self::$variant(value) => Ok(value),
                other => Err(other.unexpected(command)),
            }
        }
    };
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Done => "Done",
            Self::Usage(_) => "Usage",
            Self::Mclass(_) => "Mclass",
            Self::Mlog(_) => "Mlog",
            Self::MlogEx(_) => "MlogEx",
            Self::Erased { .. } => "Erased",
            Self::Record(_) => "Record",
            Self::Mblock(_) => "Mblock",
            Self::Data(_) => "Data",
            Self::Vma(_) => "Vma",
            Self::Vrss { .. } => "Vrss",
        }
    }

    fn unexpected(&self, command: &'static str) -> ChannelError {
        ChannelError::UnexpectedReply {
            command,
            reply: self.name(),
        }
    }

    /// Accept only an empty acknowledgement.
    pub fn into_done(self, command: &'static str) -> ChannelResult<()> {
        match self {
            Self::Done => Ok(()),
            other => Err(other.unexpected(command)),
        }
    }

    reply_accessor!(into_usage, Usage, PoolUsage);
    reply_accessor!(into_mclass, Mclass, MclassProps);
    reply_accessor!(into_mlog, Mlog, MlogProps);
    reply_accessor!(
        /// Extended mlog properties; plain properties are not accepted.
        into_mlog_ex,
        MlogEx,
        MlogPropsEx
    );
    reply_accessor!(into_record, Record, Option<Record>);
    reply_accessor!(into_mblock, Mblock, MblockProps);
    reply_accessor!(into_data, Data, Vec<u8>);
    reply_accessor!(into_vma, Vma, VmaGeometry);

    pub fn into_erased(self, command: &'static str) -> ChannelResult<u64> {
        match self {
            Self::Erased { gen } => Ok(gen),
            other => Err(other.unexpected(command)),
        }
    }

    /// Driver residency counters: resident pages and virtual bytes.
    pub fn into_vrss(self, command: &'static str) -> ChannelResult<(u64, u64)> {
        match self {
            Self::Vrss {
                rss_pages,
                vss_bytes,
            } => Ok((rss_pages, vss_bytes)),
            other => Err(other.unexpected(command)),
        }
    }
}
