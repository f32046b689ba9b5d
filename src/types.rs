//! Module `types` define the four index spaces of a ZIM archive along
//! with byte offset/size types and little-endian codec helpers.
//!
//! Entry, title, cluster and blob indexes address different tables and
//! must not be mixed; wrapping each in its own type keeps an index from
//! one space out of another space's table at compile time. Arithmetic is
//! permitted within a kind, and between [Offset] and [Size].

use std::{fmt, ops, result};

use crate::{err_at, Error, Result};

macro_rules! index_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(val: u32) -> $name {
                $name(val)
            }
        }

        impl From<$name> for u32 {
            fn from(val: $name) -> u32 {
                val.0
            }
        }

        impl From<$name> for usize {
            fn from(val: $name) -> usize {
                val.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
                write!(f, "{}", self.0)
            }
        }

        impl ops::Add<u32> for $name {
            type Output = $name;

            fn add(self, rhs: u32) -> $name {
                $name(self.0 + rhs)
            }
        }

        impl ops::AddAssign<u32> for $name {
            fn add_assign(&mut self, rhs: u32) {
                self.0 += rhs;
            }
        }

        impl ops::Sub for $name {
            type Output = u32;

            fn sub(self, rhs: $name) -> u32 {
                self.0 - rhs.0
            }
        }
    };
}

index_type!(
    /// Index into the dirent/path-pointer table, in path sort order.
    EntryIndex
);
index_type!(
    /// Index into the title-ordered index of entry indexes.
    TitleIndex
);
index_type!(
    /// Index into the cluster-pointer table.
    ClusterIndex
);
index_type!(
    /// Index of a blob within one cluster.
    BlobIndex
);

/// Absolute byte position, within an archive or within a reader window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

/// Byte count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub u64);

impl From<u64> for Offset {
    fn from(val: u64) -> Offset {
        Offset(val)
    }
}

impl From<Offset> for u64 {
    fn from(val: Offset) -> u64 {
        val.0
    }
}

impl From<u64> for Size {
    fn from(val: u64) -> Size {
        Size(val)
    }
}

impl From<Size> for u64 {
    fn from(val: Size) -> u64 {
        val.0
    }
}

impl From<Size> for usize {
    fn from(val: Size) -> usize {
        val.0 as usize
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<Size> for Offset {
    type Output = Offset;

    fn add(self, rhs: Size) -> Offset {
        Offset(self.0 + rhs.0)
    }
}

impl ops::AddAssign<Size> for Offset {
    fn add_assign(&mut self, rhs: Size) {
        self.0 += rhs.0;
    }
}

impl ops::Sub for Offset {
    type Output = Size;

    fn sub(self, rhs: Offset) -> Size {
        Size(self.0 - rhs.0)
    }
}

impl ops::Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0 + rhs.0)
    }
}

impl ops::AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        self.0 += rhs.0;
    }
}

impl ops::Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size(self.0 - rhs.0)
    }
}

/// Decode little-endian u16 at `off` within `buf`.
pub fn u16_at(buf: &[u8], off: usize) -> Result<u16> {
    match buf.get(off..off + 2) {
        Some(bs) => {
            let mut scratch = [0_u8; 2];
            scratch.copy_from_slice(bs);
            Ok(u16::from_le_bytes(scratch))
        }
        None => err_at!(InvalidFormat, msg: "u16 at {} beyond {} bytes", off, buf.len()),
    }
}

/// Decode little-endian u32 at `off` within `buf`.
pub fn u32_at(buf: &[u8], off: usize) -> Result<u32> {
    match buf.get(off..off + 4) {
        Some(bs) => {
            let mut scratch = [0_u8; 4];
            scratch.copy_from_slice(bs);
            Ok(u32::from_le_bytes(scratch))
        }
        None => err_at!(InvalidFormat, msg: "u32 at {} beyond {} bytes", off, buf.len()),
    }
}

/// Decode little-endian u64 at `off` within `buf`.
pub fn u64_at(buf: &[u8], off: usize) -> Result<u64> {
    match buf.get(off..off + 8) {
        Some(bs) => {
            let mut scratch = [0_u8; 8];
            scratch.copy_from_slice(bs);
            Ok(u64::from_le_bytes(scratch))
        }
        None => err_at!(InvalidFormat, msg: "u64 at {} beyond {} bytes", off, buf.len()),
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
