//! Module `provider` implement content feeding for the writer.
//!
//! A [ContentProvider] declares its total size up front and then feeds
//! its bytes in chunks; the cluster serializer checks that the two
//! agree. Providers cross thread boundaries, compression happens on a
//! worker pool.

use std::{ffi, fs, io::Read};

use crate::{err_at, util, Error, Result};

const FEED_CHUNK: usize = 1024 * 1024;

/// Source of one blob's bytes.
pub trait ContentProvider: Send {
    /// Total number of bytes this provider will feed.
    fn size(&self) -> u64;

    /// Next chunk of bytes; an empty chunk marks exhaustion.
    fn feed(&mut self) -> Result<Vec<u8>>;
}

/// Feed an in-memory byte string.
pub struct StringProvider {
    data: Option<Vec<u8>>,
    size: u64,
}

impl StringProvider {
    pub fn new<T>(data: T) -> StringProvider
    where
        T: Into<Vec<u8>>,
    {
        let data = data.into();
        let size = data.len() as u64;
        StringProvider {
            data: Some(data),
            size,
        }
    }
}

impl ContentProvider for StringProvider {
    fn size(&self) -> u64 {
        self.size
    }

    fn feed(&mut self) -> Result<Vec<u8>> {
        Ok(self.data.take().unwrap_or_default())
    }
}

/// Feed a file's bytes, in bounded chunks. The size is fixed at
/// creation; a file that changes under the provider is caught by the
/// serializer's size check.
pub struct FileProvider {
    loc: ffi::OsString,
    size: u64,
    fd: Option<fs::File>,
}

impl FileProvider {
    pub fn new(loc: &ffi::OsStr) -> Result<FileProvider> {
        let size = err_at!(IOError, fs::metadata(loc), "stat {:?}", loc)?.len();
        Ok(FileProvider {
            loc: loc.to_os_string(),
            size,
            fd: None,
        })
    }
}

impl ContentProvider for FileProvider {
    fn size(&self) -> u64 {
        self.size
    }

    fn feed(&mut self) -> Result<Vec<u8>> {
        if self.fd.is_none() {
            self.fd = Some(util::open_file_r(&self.loc)?);
        }
        let fd = self.fd.as_mut().unwrap();

        let mut chunk = vec![0; FEED_CHUNK];
        let n = err_at!(IOError, fd.read(&mut chunk), "reading {:?}", self.loc)?;
        chunk.truncate(n);
        Ok(chunk)
    }
}

#[cfg(test)]
#[path = "provider_test.rs"]
mod provider_test;
