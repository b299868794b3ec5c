use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw driver identifier.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The null identifier. The driver never hands it out.
            pub const fn null() -> Self {
                Self(0)
            }

            /// Returns `true` if this is the null identifier.
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }

            /// The raw 64-bit value as exchanged with the driver.
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            /// Parse a decimal or `0x`-prefixed hexadecimal identifier.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse::<u64>(),
                };
                parsed
                    .map(Self)
                    .map_err(|e| TypeError::InvalidObjectId(format!("{s}: {e}")))
            }
        }
    };
}

object_id!(
    /// Stable identifier of a durable log object (mlog) within a pool.
    MlogId,
    "MlogId"
);

object_id!(
    /// Stable identifier of a durable block object (mblock) within a pool.
    MblockId,
    "MblockId"
);
