//! Module `parts` implement the file backend of an archive.
//!
//! A [FilePart] owns one open read-only handle along with a logical
//! `(offset, size)` window inside that handle's file. A [FileCompound]
//! is an ordered, non-overlapping sequence of parts exposing one
//! contiguous logical byte stream. Split archives (`name.zimaa`,
//! `name.zimab`, ...) and archives embedded in a larger container are
//! both expressed as compounds.

use std::{ffi, fs, ops, path, time};

use crate::{err_at, types::Offset, Error, Result};

#[cfg(unix)]
fn pread(fd: &fs::File, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;

    fd.read_at(buf, off)
}

#[cfg(windows)]
fn pread(fd: &fs::File, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;

    fd.seek_read(buf, off)
}

/// One part of an archive: an open read-only handle and the
/// `(offset, size)` window of it that belongs to the archive.
pub struct FilePart {
    loc: Option<ffi::OsString>,
    fd: fs::File,
    offset: u64,
    size: u64,
    #[cfg(feature = "mmap")]
    mmap: std::sync::Mutex<Option<std::sync::Arc<memmap::Mmap>>>,
}

impl FilePart {
    /// Open the whole of the file at `loc` as a part.
    pub fn open(loc: &ffi::OsStr) -> Result<FilePart> {
        let fd = crate::util::open_file_r(loc)?;
        let size = err_at!(IOError, fd.metadata(), "stat {:?}", loc)?.len();

        Ok(FilePart {
            loc: Some(loc.to_os_string()),
            fd,
            offset: 0,
            size,
            #[cfg(feature = "mmap")]
            mmap: std::sync::Mutex::new(None),
        })
    }

    /// Treat an already opened handle as a part.
    pub fn from_file(fd: fs::File) -> Result<FilePart> {
        let size = err_at!(IOError, fd.metadata())?.len();
        Ok(Self::from_file_window(fd, 0, size))
    }

    /// Treat `(offset, size)` of an already opened handle as a part,
    /// for archives embedded inside a larger container.
    pub fn from_file_window(fd: fs::File, offset: u64, size: u64) -> FilePart {
        FilePart {
            loc: None,
            fd,
            offset,
            size,
            #[cfg(feature = "mmap")]
            mmap: std::sync::Mutex::new(None),
        }
    }

    pub fn to_location(&self) -> Option<ffi::OsString> {
        self.loc.clone()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Window start of this part within its backing file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill `buf` from `local_offset` within this part's window, looping
    /// on short reads, pread style.
    pub fn read_at(&self, buf: &mut [u8], local_offset: u64) -> Result<()> {
        if local_offset + (buf.len() as u64) > self.size {
            err_at!(
                OutOfRange, msg: "read {}+{} beyond part size {}",
                local_offset, buf.len(), self.size
            )?
        }

        let mut off = self.offset + local_offset;
        let mut buf = buf;
        while !buf.is_empty() {
            match pread(&self.fd, buf, off) {
                Ok(0) => err_at!(IOError, msg: "unexpected end-of-file at {}", off)?,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    off += n as u64;
                }
                Err(err) => err_at!(IOError, Err(err), "pread at {}", off)?,
            }
        }

        Ok(())
    }

    /// Memory map this part's backing file, once, shared.
    #[cfg(feature = "mmap")]
    pub fn to_mmap(&self) -> Result<std::sync::Arc<memmap::Mmap>> {
        let mut slot = self.mmap.lock().unwrap();
        if let Some(map) = slot.as_ref() {
            return Ok(std::sync::Arc::clone(map));
        }
        let map = unsafe { err_at!(IOError, memmap::Mmap::map(&self.fd), "mmap")? };
        let map = std::sync::Arc::new(map);
        *slot = Some(std::sync::Arc::clone(&map));
        Ok(map)
    }
}

/// An ordered, non-overlapping sequence of [FilePart] values exposing
/// one contiguous logical byte stream.
pub struct FileCompound {
    loc: Option<ffi::OsString>,
    parts: Vec<(u64, u64, FilePart)>, // (start, end, part), end exclusive
    total: u64,
    mtime: Option<time::SystemTime>,
}

impl FileCompound {
    /// Open the archive at `loc`. When `loc` itself does not exist, part
    /// files are discovered by appending the two-letter suffixes `aa`,
    /// `ab`, ... in order, stopping at the first missing one.
    pub fn open<P>(loc: P) -> Result<FileCompound>
    where
        P: AsRef<path::Path>,
    {
        let loc: &path::Path = loc.as_ref();

        // A part given directly, like `name.zimaa`, opens the split set.
        let bytes = loc.as_os_str().to_string_lossy();
        if bytes.ends_with(".zimaa") {
            let base = bytes[..bytes.len() - 2].to_string();
            return Self::open_split(ffi::OsString::from(base));
        }

        match FilePart::open(loc.as_os_str()) {
            Ok(part) => {
                let mtime = part_mtime(&part);
                let mut val = FileCompound {
                    loc: Some(loc.as_os_str().to_os_string()),
                    parts: Vec::default(),
                    total: 0,
                    mtime,
                };
                val.add_part(part);
                Ok(val)
            }
            Err(_) => Self::open_split(loc.as_os_str().to_os_string()),
        }
    }

    fn open_split(base: ffi::OsString) -> Result<FileCompound> {
        let mut val = FileCompound {
            loc: Some(base.clone()),
            parts: Vec::default(),
            total: 0,
            mtime: None,
        };

        'outer: for ch0 in b'a'..=b'z' {
            for ch1 in b'a'..=b'z' {
                let mut loc = base.clone();
                loc.push(format!("{}{}", ch0 as char, ch1 as char));
                match FilePart::open(&loc) {
                    Ok(part) => {
                        if val.mtime.is_none() {
                            val.mtime = part_mtime(&part);
                        }
                        val.add_part(part)
                    }
                    Err(_) => break 'outer,
                }
            }
        }

        if val.parts.is_empty() {
            err_at!(IOError, msg: "cannot open zim-file {:?}, nor its parts", base)
        } else {
            Ok(val)
        }
    }

    /// Treat an already opened handle as a single-part archive.
    pub fn from_file(fd: fs::File) -> Result<FileCompound> {
        let part = FilePart::from_file(fd)?;
        let mut val = FileCompound {
            loc: None,
            parts: Vec::default(),
            total: 0,
            mtime: part_mtime(&part),
        };
        val.add_part(part);
        Ok(val)
    }

    /// Treat `(offset, size)` of an already opened handle as a
    /// single-part archive, for embedded archives.
    pub fn from_file_window(fd: fs::File, offset: u64, size: u64) -> FileCompound {
        let part = FilePart::from_file_window(fd, offset, size);
        let mut val = FileCompound {
            loc: None,
            parts: Vec::default(),
            total: 0,
            mtime: part_mtime(&part),
        };
        val.add_part(part);
        val
    }

    /// Assemble an archive from a list of `(handle, offset, size)`
    /// windows, in order.
    pub fn from_file_windows(windows: Vec<(fs::File, u64, u64)>) -> Result<FileCompound> {
        let mut val = FileCompound {
            loc: None,
            parts: Vec::default(),
            total: 0,
            mtime: None,
        };
        for (fd, offset, size) in windows.into_iter() {
            let part = FilePart::from_file_window(fd, offset, size);
            if val.mtime.is_none() {
                val.mtime = part_mtime(&part);
            }
            val.add_part(part);
        }
        if val.parts.is_empty() {
            err_at!(InvalidInput, msg: "empty list of file windows")
        } else {
            Ok(val)
        }
    }

    fn add_part(&mut self, part: FilePart) {
        let (start, end) = (self.total, self.total + part.size());
        self.parts.push((start, end, part));
        self.total = end;
    }

    pub fn to_location(&self) -> Option<ffi::OsString> {
        self.loc.clone()
    }

    pub fn size(&self) -> u64 {
        self.total
    }

    pub fn to_mtime(&self) -> Option<time::SystemTime> {
        self.mtime
    }

    pub fn is_multipart(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn as_part(&self, i: usize) -> &(u64, u64, FilePart) {
        &self.parts[i]
    }

    /// Locate the part containing `offset`.
    pub fn locate(&self, offset: Offset) -> Result<usize> {
        let off = offset.0;
        if off >= self.total {
            err_at!(OutOfRange, msg: "offset {} beyond compound size {}", off, self.total)?
        }
        let i = match self.parts.binary_search_by(|(start, _, _)| start.cmp(&off)) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Ok(i)
    }

    /// Locate the run of parts covering `[offset, offset+size)`.
    pub fn locate_range(&self, offset: Offset, size: u64) -> Result<ops::Range<usize>> {
        if size == 0 {
            let i = match offset.0 {
                off if off >= self.total => self.parts.len(),
                _ => self.locate(offset)?,
            };
            return Ok(i..i);
        }
        let first = self.locate(offset)?;
        let last_off = offset.0 + size - 1;
        if last_off >= self.total {
            err_at!(
                OutOfRange, msg: "range {}+{} beyond compound size {}",
                offset.0, size, self.total
            )?
        }
        let last = self.locate(Offset(last_off))?;
        Ok(first..last + 1)
    }

    /// Fill `buf` from logical `offset`, crossing part boundaries as
    /// needed.
    pub fn read_at(&self, buf: &mut [u8], offset: Offset) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let range = self.locate_range(offset, buf.len() as u64)?;
        let mut off = offset.0;
        let mut buf = buf;
        for i in range {
            let (start, end, part) = &self.parts[i];
            let local = off - start;
            let n = std::cmp::min(buf.len() as u64, (end - start) - local) as usize;
            part.read_at(&mut buf[..n], local)?;
            let tmp = buf;
            buf = &mut tmp[n..];
            off += n as u64;
        }
        Ok(())
    }
}

fn part_mtime(part: &FilePart) -> Option<time::SystemTime> {
    part.fd.metadata().ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
#[path = "parts_test.rs"]
mod parts_test;
