use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Access mode a pool session was opened with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl OpenMode {
    /// Whether write-path operations are permitted in this mode.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

impl FromStr for OpenMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" | "read-only" => Ok(Self::ReadOnly),
            "wo" | "write-only" => Ok(Self::WriteOnly),
            "rw" | "read-write" => Ok(Self::ReadWrite),
            other => Err(TypeError::UnknownOpenMode(other.to_string())),
        }
    }
}

/// Open flags of an mlog handle.
///
/// Only [`SKIP_SER`](Self::SKIP_SER) and [`COMPACT_SEM`](Self::COMPACT_SEM)
/// are meaningful; any other bits are dropped by [`masked`](Self::masked).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MlogOpenFlags(u8);

impl MlogOpenFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The caller guarantees external exclusivity; append and read skip the
    /// per-handle lock.
    pub const SKIP_SER: Self = Self(0x01);
    /// Reads honor compaction markers: records after an unterminated
    /// compaction start are not visible.
    pub const COMPACT_SEM: Self = Self(0x02);

    const KNOWN: u8 = Self::SKIP_SER.0 | Self::COMPACT_SEM.0;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Drop every bit that is not a known flag.
    pub const fn masked(&self) -> Self {
        Self(self.0 & Self::KNOWN)
    }

    pub const fn without(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for MlogOpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MlogOpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MlogOpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::SKIP_SER) {
            names.push("SKIP_SER");
        }
        if self.contains(Self::COMPACT_SEM) {
            names.push("COMPACT_SEM");
        }
        write!(f, "MlogOpenFlags({})", names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_modes() {
        assert!(!OpenMode::ReadOnly.is_writable());
        assert!(OpenMode::WriteOnly.is_writable());
        assert!(OpenMode::ReadWrite.is_writable());
        assert_eq!(OpenMode::default(), OpenMode::ReadWrite);
    }

    #[test]
    fn open_mode_parses_short_and_long() {
        assert_eq!("ro".parse::<OpenMode>().unwrap(), OpenMode::ReadOnly);
        assert_eq!("read-write".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
        assert!(matches!(
            "append".parse::<OpenMode>(),
            Err(TypeError::UnknownOpenMode(_))
        ));
    }

    #[test]
    fn masked_drops_unknown_bits() {
        let flags = MlogOpenFlags::from_bits(0xff).masked();
        assert_eq!(flags, MlogOpenFlags::SKIP_SER | MlogOpenFlags::COMPACT_SEM);
    }

    #[test]
    fn contains_and_without() {
        let flags = MlogOpenFlags::SKIP_SER | MlogOpenFlags::COMPACT_SEM;
        assert!(flags.contains(MlogOpenFlags::SKIP_SER));
        let flags = flags.without(MlogOpenFlags::SKIP_SER);
        assert!(!flags.contains(MlogOpenFlags::SKIP_SER));
        assert!(flags.contains(MlogOpenFlags::COMPACT_SEM));
        assert!(flags.contains(MlogOpenFlags::NONE));
    }

    #[test]
    fn debug_lists_names() {
        let flags = MlogOpenFlags::SKIP_SER | MlogOpenFlags::COMPACT_SEM;
        assert_eq!(format!("{flags:?}"), "MlogOpenFlags(SKIP_SER | COMPACT_SEM)");
    }
}
