//! Module `reader` implement random access over archive bytes.
//!
//! A [Reader] is a bounded window over a [FileCompound] or over an
//! in-memory buffer. All reads are offset-addressed and bounds-checked
//! up front; sub-readers narrow the window without copying. When the
//! `mmap` feature is enabled and a requested range falls inside a single
//! file part, [Reader::get_buffer] hands out a zero-copy memory-mapped
//! view, otherwise a heap copy.

use std::{cmp, io, sync::Arc};

use crate::{
    err_at,
    parts::FileCompound,
    types::{Offset, Size},
    Error, Result,
};

/// Contiguous, addressable view over archive bytes.
pub enum Buffer {
    /// Heap copy of the requested range.
    Owned(Vec<u8>),
    /// Shared slice of an in-memory buffer, typically a decompressed
    /// cluster.
    Shared {
        data: Arc<Vec<u8>>,
        start: usize,
        len: usize,
    },
    /// Memory-mapped view of a single file part.
    #[cfg(feature = "mmap")]
    Mmap {
        map: Arc<memmap::Mmap>,
        start: usize,
        len: usize,
    },
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        match self {
            Buffer::Owned(data) => data,
            Buffer::Shared { data, start, len } => &data[*start..*start + *len],
            #[cfg(feature = "mmap")]
            Buffer::Mmap { map, start, len } => &map[*start..*start + *len],
        }
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl Buffer {
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Buffer::Owned(data) => data.clone(),
            _ => self.as_ref().to_vec(),
        }
    }
}

/// Bounded random-access reader over archive bytes.
#[derive(Clone)]
pub enum Reader {
    /// Window that is known to lie within a single file part.
    File {
        source: Arc<FileCompound>,
        offset: u64,
        size: u64,
    },
    /// Window over a multi-part compound.
    Multi {
        source: Arc<FileCompound>,
        offset: u64,
        size: u64,
    },
    /// Window over an in-memory buffer.
    Mem {
        data: Arc<Vec<u8>>,
        start: usize,
        len: usize,
    },
}

impl Reader {
    /// Reader over the whole of `source`.
    pub fn over(source: Arc<FileCompound>) -> Reader {
        let size = source.size();
        match source.is_multipart() {
            true => Reader::Multi {
                source,
                offset: 0,
                size,
            },
            false => Reader::File {
                source,
                offset: 0,
                size,
            },
        }
    }

    /// Reader over `(offset, size)` of `source`.
    pub fn window(source: Arc<FileCompound>, offset: Offset, size: Size) -> Result<Reader> {
        if offset.0 + size.0 > source.size() {
            err_at!(
                OutOfRange, msg: "window {}+{} beyond compound size {}",
                offset.0, size.0, source.size()
            )?
        }
        let val = match source.is_multipart() {
            true => Reader::Multi {
                source,
                offset: offset.0,
                size: size.0,
            },
            false => Reader::File {
                source,
                offset: offset.0,
                size: size.0,
            },
        };
        Ok(val)
    }

    /// Reader over an owned buffer.
    pub fn from_bytes(data: Vec<u8>) -> Reader {
        let len = data.len();
        Reader::Mem {
            data: Arc::new(data),
            start: 0,
            len,
        }
    }

    pub fn size(&self) -> Size {
        match self {
            Reader::File { size, .. } => Size(*size),
            Reader::Multi { size, .. } => Size(*size),
            Reader::Mem { len, .. } => Size(*len as u64),
        }
    }

    /// Position of this reader within its underlying file, when
    /// meaningful.
    pub fn offset(&self) -> Offset {
        match self {
            Reader::File { offset, .. } => Offset(*offset),
            Reader::Multi { offset, .. } => Offset(*offset),
            Reader::Mem { start, .. } => Offset(*start as u64),
        }
    }

    fn check(&self, offset: Offset, size: u64) -> Result<()> {
        let total = self.size().0;
        if offset.0 > total || offset.0 + size > total {
            err_at!(
                OutOfRange, msg: "read {}+{} beyond reader size {}",
                offset.0, size, total
            )
        } else {
            Ok(())
        }
    }

    /// Fill `buf` starting at `offset` of this reader's window.
    pub fn read(&self, buf: &mut [u8], offset: Offset) -> Result<()> {
        self.check(offset, buf.len() as u64)?;
        match self {
            Reader::File {
                source,
                offset: base,
                ..
            }
            | Reader::Multi {
                source,
                offset: base,
                ..
            } => source.read_at(buf, Offset(base + offset.0)),
            Reader::Mem { data, start, .. } => {
                let a = start + offset.0 as usize;
                buf.copy_from_slice(&data[a..a + buf.len()]);
                Ok(())
            }
        }
    }

    pub fn read_byte(&self, offset: Offset) -> Result<u8> {
        let mut buf = [0_u8; 1];
        self.read(&mut buf, offset)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, offset: Offset) -> Result<u16> {
        let mut buf = [0_u8; 2];
        self.read(&mut buf, offset)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, offset: Offset) -> Result<u32> {
        let mut buf = [0_u8; 4];
        self.read(&mut buf, offset)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&self, offset: Offset) -> Result<u64> {
        let mut buf = [0_u8; 8];
        self.read(&mut buf, offset)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Narrow to `[offset, offset+size)` of this reader.
    pub fn sub_reader(&self, offset: Offset, size: Size) -> Result<Reader> {
        self.check(offset, size.0)?;
        let val = match self {
            Reader::File {
                source,
                offset: base,
                ..
            } => Reader::File {
                source: Arc::clone(source),
                offset: base + offset.0,
                size: size.0,
            },
            Reader::Multi {
                source,
                offset: base,
                ..
            } => Reader::Multi {
                source: Arc::clone(source),
                offset: base + offset.0,
                size: size.0,
            },
            Reader::Mem { data, start, .. } => Reader::Mem {
                data: Arc::clone(data),
                start: start + offset.0 as usize,
                len: size.0 as usize,
            },
        };
        Ok(val)
    }

    /// Get an addressable contiguous view of `[offset, offset+size)`.
    pub fn get_buffer(&self, offset: Offset, size: Size) -> Result<Buffer> {
        self.check(offset, size.0)?;
        match self {
            Reader::Mem { data, start, .. } => Ok(Buffer::Shared {
                data: Arc::clone(data),
                start: start + offset.0 as usize,
                len: size.0 as usize,
            }),
            Reader::File {
                source,
                offset: base,
                ..
            }
            | Reader::Multi {
                source,
                offset: base,
                ..
            } => {
                #[cfg(feature = "mmap")]
                {
                    if let Some(buf) = mmap_buffer(source, Offset(base + offset.0), size.0) {
                        return Ok(buf);
                    }
                }
                let mut data = vec![0; size.0 as usize];
                source.read_at(&mut data, Offset(base + offset.0))?;
                Ok(Buffer::Owned(data))
            }
        }
    }
}

// Zero-copy view when the range lies entirely inside one file part and
// the part maps cleanly; any failure falls back to a heap copy.
#[cfg(feature = "mmap")]
fn mmap_buffer(source: &Arc<FileCompound>, offset: Offset, size: u64) -> Option<Buffer> {
    if size == 0 {
        return None;
    }
    let range = source.locate_range(offset, size).ok()?;
    if range.len() != 1 {
        return None;
    }
    let (part_start, _, part) = source.as_part(range.start);
    let map = part.to_mmap().ok()?;
    let start = (part.offset() + (offset.0 - part_start)) as usize;
    let len = size as usize;
    if start + len > map.len() {
        return None;
    }
    Some(Buffer::Mmap { map, start, len })
}

/// Sequential [io::Read] adapter over a [Reader], used to feed
/// decompression streams.
pub struct ReaderStream {
    reader: Reader,
    pos: u64,
}

impl ReaderStream {
    pub fn new(reader: Reader) -> ReaderStream {
        ReaderStream { reader, pos: 0 }
    }
}

impl io::Read for ReaderStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.reader.size().0.saturating_sub(self.pos);
        let n = cmp::min(buf.len() as u64, remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        match self.reader.read(&mut buf[..n], Offset(self.pos)) {
            Ok(()) => {
                self.pos += n as u64;
                Ok(n)
            }
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "reader_test.rs"]
mod reader_test;
