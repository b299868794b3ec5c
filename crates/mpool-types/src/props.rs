use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{MblockId, MlogId};

/// Media class an object is allocated from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    #[default]
    Capacity,
    Staging,
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => write!(f, "capacity"),
            Self::Staging => write!(f, "staging"),
        }
    }
}

impl FromStr for MediaClass {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capacity" => Ok(Self::Capacity),
            "staging" => Ok(Self::Staging),
            other => Err(TypeError::UnknownMediaClass(other.to_string())),
        }
    }
}

/// Lifecycle state of a durable object as tracked by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Allocated but not yet committed; may still be aborted.
    Allocated,
    /// Committed; survives restarts until deleted.
    Committed,
}

/// Capacity request for a new mlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlogCapacity {
    /// Requested capacity in bytes.
    pub capacity: u64,
    /// Allocate from spare space.
    pub spare: bool,
}

impl MlogCapacity {
    pub fn bytes(capacity: u64) -> Self {
        Self {
            capacity,
            spare: false,
        }
    }
}

/// Driver-reported properties of an mlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlogProps {
    pub id: MlogId,
    /// Generation; bumped by every erase.
    pub gen: u64,
    /// Total capacity in bytes.
    pub capacity: u64,
    pub mclass: MediaClass,
    pub state: ObjectState,
}

/// Extended mlog properties: driver view of the log's contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlogPropsEx {
    pub props: MlogProps,
    /// Number of records (data and markers) stored.
    pub record_count: u64,
    /// Bytes of data records stored.
    pub data_len: u64,
}

/// Driver-reported properties of an mblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MblockProps {
    pub id: MblockId,
    /// Bytes written so far.
    pub write_len: u64,
    /// Maximum size of the mblock in bytes.
    pub capacity: u64,
    /// Preferred write granularity.
    pub optimal_write_size: u32,
    pub mclass: MediaClass,
    pub state: ObjectState,
}

/// Space accounting for a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub total: u64,
    pub usable: u64,
    pub free: u64,
    pub used: u64,
}

/// Properties of one media class within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MclassProps {
    pub mclass: MediaClass,
    /// Size of the allocation unit in bytes.
    pub zone_size: u64,
    pub total: u64,
    pub used: u64,
}
