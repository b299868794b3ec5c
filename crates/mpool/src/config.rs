//! Pool session configuration, loadable from TOML.

use std::path::Path;

use mpool_types::{OpenMode, VmaAdvice};
use serde::{Deserialize, Serialize};

use crate::error::{MpoolError, MpoolResult};

/// Longest pool name accepted, in bytes.
pub const POOL_NAME_MAX: usize = 31;

/// Per-session configuration of a pool handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Access mode of the session.
    pub mode: OpenMode,
    /// Count resident pages locally with `mincore(2)` when the driver cannot
    /// report residency counters for an mcache map.
    pub residency_fallback: bool,
    /// Driver-side hint used by [`Pool::mcache_create_default`].
    ///
    /// [`Pool::mcache_create_default`]: crate::Pool::mcache_create_default
    pub default_advice: VmaAdvice,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: OpenMode::ReadWrite,
            residency_fallback: true,
            default_advice: VmaAdvice::Warm,
        }
    }
}

impl PoolConfig {
    /// A read-only session configuration.
    pub fn read_only() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> MpoolResult<Self> {
        toml::from_str(s).map_err(|e| MpoolError::InvalidArgument(format!("pool config: {e}")))
    }

    /// Read a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> MpoolResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|source| MpoolError::Io {
            op: "read pool config",
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Check a pool name: 1 to [`POOL_NAME_MAX`] bytes of `[A-Za-z0-9._-]`.
pub fn validate_pool_name(name: &str) -> MpoolResult<()> {
    if name.is_empty() || name.len() > POOL_NAME_MAX {
        return Err(MpoolError::InvalidArgument(format!(
            "pool name must be 1..={POOL_NAME_MAX} bytes, got {}",
            name.len()
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(MpoolError::InvalidArgument(format!(
            "pool name {name:?} contains {c:?}"
        )));
    }
    Ok(())
}
