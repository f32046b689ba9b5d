//! Module `dirent` implement the on-disk directory entry.
//!
//! A dirent describes one archive member: namespace byte, path, title
//! and mimetype, along with either a `(cluster, blob)` address for items
//! or a target entry index for redirects. Dirents are variable length;
//! [DirentReader] decodes them from an unknown-length byte run by
//! growing a scratch window until the entry's strings terminate.

use std::{cmp, sync::Arc, sync::Mutex};

use crate::{
    err_at,
    reader::Reader,
    types::{u16_at, u32_at, BlobIndex, ClusterIndex, EntryIndex, Offset},
    Error, Result,
};

/// Reserved mimetype code marking a dirent as a redirect.
pub const REDIRECT_MIMETYPE: u16 = 0xffff;
/// Historical reserved code for link-target entries.
pub const LINKTARGET_MIMETYPE: u16 = 0xfffe;
/// Historical reserved code for deleted entries.
pub const DELETED_MIMETYPE: u16 = 0xfffd;

/// What a dirent points at.
#[derive(Clone, Debug, PartialEq)]
pub enum DirentKind {
    Item {
        cluster: ClusterIndex,
        blob: BlobIndex,
    },
    Redirect {
        target: EntryIndex,
    },
    /// Neither a redirect nor a real item; found in old archives.
    LinkTarget,
    /// Neither a redirect nor a real item; found in old archives.
    Deleted,
}

/// In-memory form of one directory entry.
#[derive(Clone, Debug)]
pub struct Dirent {
    mimetype: u16,
    namespace: u8,
    version: u32,
    kind: DirentKind,
    path: String,
    title: String,
    parameter: Vec<u8>,
}

impl Dirent {
    // Decode a dirent from the head of `buf`. Return None when the
    // buffer ends before the dirent does.
    fn decode(buf: &[u8]) -> Result<Option<Dirent>> {
        if buf.len() < 8 {
            return Ok(None);
        }
        let mimetype = u16_at(buf, 0)?;
        let param_len = buf[2] as usize;
        let namespace = buf[3];
        let version = u32_at(buf, 4)?;

        let (kind, mut n) = match mimetype {
            REDIRECT_MIMETYPE => {
                if buf.len() < 12 {
                    return Ok(None);
                }
                let target = EntryIndex(u32_at(buf, 8)?);
                (DirentKind::Redirect { target }, 12)
            }
            LINKTARGET_MIMETYPE => (DirentKind::LinkTarget, 8),
            DELETED_MIMETYPE => (DirentKind::Deleted, 8),
            _ => {
                if buf.len() < 16 {
                    return Ok(None);
                }
                let cluster = ClusterIndex(u32_at(buf, 8)?);
                let blob = BlobIndex(u32_at(buf, 12)?);
                (DirentKind::Item { cluster, blob }, 16)
            }
        };

        let path = match take_cstr(&buf[n..]) {
            Some((s, m)) => {
                n += m;
                s?
            }
            None => return Ok(None),
        };
        let title = match take_cstr(&buf[n..]) {
            Some((s, m)) => {
                n += m;
                s?
            }
            None => return Ok(None),
        };
        let parameter = match buf.get(n..n + param_len) {
            Some(bs) => bs.to_vec(),
            None => return Ok(None),
        };

        let title = match title.is_empty() {
            true => path.clone(),
            false => title,
        };

        Ok(Some(Dirent {
            mimetype,
            namespace,
            version,
            kind,
            path,
            title,
            parameter,
        }))
    }

    pub fn namespace(&self) -> char {
        self.namespace as char
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Title, with the path substituted when the stored title was empty.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Namespace-qualified path, `N/path`.
    pub fn long_path(&self) -> String {
        let mut s = String::with_capacity(self.path.len() + 2);
        s.push(self.namespace as char);
        s.push('/');
        s.push_str(&self.path);
        s
    }

    /// Namespace-qualified title, `N/title`.
    pub fn long_title(&self) -> String {
        let mut s = String::with_capacity(self.title.len() + 2);
        s.push(self.namespace as char);
        s.push('/');
        s.push_str(&self.title);
        s
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn parameter(&self) -> &[u8] {
        &self.parameter
    }

    pub fn mimetype(&self) -> u16 {
        self.mimetype
    }

    pub fn kind(&self) -> &DirentKind {
        &self.kind
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, DirentKind::Redirect { .. })
    }

    pub fn is_item(&self) -> bool {
        matches!(self.kind, DirentKind::Item { .. })
    }

    pub fn redirect_index(&self) -> Result<EntryIndex> {
        match &self.kind {
            DirentKind::Redirect { target } => Ok(*target),
            _ => err_at!(InvalidType, msg: "{} is not a redirect", self.long_path()),
        }
    }

    pub fn cluster_index(&self) -> Result<ClusterIndex> {
        match &self.kind {
            DirentKind::Item { cluster, .. } => Ok(*cluster),
            _ => err_at!(InvalidType, msg: "{} is not an item", self.long_path()),
        }
    }

    pub fn blob_index(&self) -> Result<BlobIndex> {
        match &self.kind {
            DirentKind::Item { blob, .. } => Ok(*blob),
            _ => err_at!(InvalidType, msg: "{} is not an item", self.long_path()),
        }
    }
}

// NUL-terminated UTF-8 from the head of `buf`; None when no NUL within
// the buffer, Some((string, consumed)) otherwise.
fn take_cstr(buf: &[u8]) -> Option<(Result<String>, usize)> {
    let pos = buf.iter().position(|b| *b == 0)?;
    let val = match std::str::from_utf8(&buf[..pos]) {
        Ok(s) => Ok(s.to_string()),
        Err(err) => {
            let prefix = format!("{}:{}", file!(), line!());
            Err(Error::InvalidFormat(prefix, format!("bad utf8 {}", err)))
        }
    };
    Some((val, pos + 1))
}

/// Decode dirents at arbitrary archive offsets, growing a shared
/// scratch buffer until the entry fits.
pub struct DirentReader {
    reader: Arc<Reader>,
    scratch: Mutex<Vec<u8>>,
}

impl DirentReader {
    pub fn new(reader: Arc<Reader>) -> DirentReader {
        DirentReader {
            reader,
            scratch: Mutex::new(Vec::with_capacity(256)),
        }
    }

    /// Read the dirent starting at `offset`, whose length is not known
    /// up front.
    pub fn read_dirent(&self, offset: Offset) -> Result<Dirent> {
        let total = self.reader.size().0;
        if offset.0 >= total {
            err_at!(OutOfRange, msg: "dirent offset {} beyond file size {}", offset.0, total)?
        }
        let remaining = total - offset.0;

        let mut scratch = self.scratch.lock().unwrap();
        let mut window = cmp::min(256, remaining);
        loop {
            scratch.resize(window as usize, 0);
            self.reader.read(&mut scratch, offset)?;
            match Dirent::decode(&scratch)? {
                Some(dirent) => break Ok(dirent),
                None if window == remaining => {
                    break err_at!(
                        InvalidFormat, msg: "dirent at {} runs past end of file", offset.0
                    )
                }
                None => window = cmp::min(window + 256, remaining),
            }
        }
    }
}

#[cfg(test)]
#[path = "dirent_test.rs"]
mod dirent_test;
