use serde::{Deserialize, Serialize};

/// Residency hint given to the driver when an mcache map is created.
///
/// This is a driver-side policy hint (how eagerly the driver keeps the
/// mapped mblocks cached), distinct from the OS-level `madvise` hints applied
/// to an existing mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmaAdvice {
    Cold,
    #[default]
    Warm,
    Hot,
    Pinned,
}
