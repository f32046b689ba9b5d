//! Module `entry` implement the public view over dirents.
//!
//! An [Entry] is the namespace-qualified view of one dirent, either an
//! [Item] carrying a blob or a redirect pointing at another entry.
//! Entries hold a cheap handle to their archive, so they stay usable
//! after the archive value that produced them goes out of scope.

use std::{ffi, sync::Arc};

use crate::{
    archive::ArchiveInner,
    dirent::{Dirent, DirentKind},
    err_at,
    reader::Buffer,
    types::{BlobIndex, ClusterIndex, EntryIndex, Offset, Size, TitleIndex},
    Error, Result,
};

// redirect chains longer than this are treated as loops.
const REDIRECT_HOP_LIMIT: usize = 50;

/// One archive member: an item or a redirect.
#[derive(Clone)]
pub struct Entry {
    pub(crate) inner: Arc<ArchiveInner>,
    pub(crate) idx: EntryIndex,
    pub(crate) dirent: Arc<Dirent>,
}

impl Entry {
    pub(crate) fn new(inner: Arc<ArchiveInner>, idx: EntryIndex) -> Result<Entry> {
        let dirent = inner.direct.dirent(idx)?;
        Ok(Entry { inner, idx, dirent })
    }

    pub fn index(&self) -> EntryIndex {
        self.idx
    }

    /// Path of this entry. Under the old namespace scheme paths carry
    /// the namespace byte, `N/path`; under the new scheme they do not.
    pub fn path(&self) -> String {
        match self.inner.new_scheme {
            true => self.dirent.path().to_string(),
            false => self.dirent.long_path(),
        }
    }

    pub fn title(&self) -> String {
        self.dirent.title().to_string()
    }

    pub fn namespace(&self) -> char {
        self.dirent.namespace()
    }

    pub fn is_redirect(&self) -> bool {
        self.dirent.is_redirect()
    }

    /// Entry index this redirect points at; fails on non-redirects.
    pub fn redirect_entry_index(&self) -> Result<EntryIndex> {
        self.dirent.redirect_index()
    }

    /// The entry this redirect points at, one hop.
    pub fn redirect_entry(&self) -> Result<Entry> {
        Entry::new(Arc::clone(&self.inner), self.redirect_entry_index()?)
    }

    /// Item view of this entry. With `follow`, redirects are chased to
    /// their final item, up to a bounded number of hops.
    pub fn item(&self, follow: bool) -> Result<Item> {
        match self.dirent.kind() {
            DirentKind::Redirect { .. } if !follow => {
                err_at!(InvalidType, msg: "entry {} is a redirect", self.path())
            }
            DirentKind::Redirect { .. } => {
                let mut dirent = Arc::clone(&self.dirent);
                let mut idx = self.idx;
                for _ in 0..REDIRECT_HOP_LIMIT {
                    let target = match dirent.kind() {
                        DirentKind::Redirect { target } => Some(*target),
                        _ => None,
                    };
                    match target {
                        Some(target) => {
                            idx = target;
                            dirent = self.inner.direct.dirent(idx)?;
                        }
                        None => break,
                    }
                }
                match dirent.is_redirect() {
                    true => err_at!(
                        InvalidFormat, msg: "redirect chain from {} exceeds {} hops",
                        self.path(), REDIRECT_HOP_LIMIT
                    ),
                    false => Ok(Item {
                        inner: Arc::clone(&self.inner),
                        idx,
                        dirent,
                    }),
                }
            }
            _ => Ok(Item {
                inner: Arc::clone(&self.inner),
                idx: self.idx,
                dirent: Arc::clone(&self.dirent),
            }),
        }
    }
}

/// An entry that carries content.
#[derive(Clone)]
pub struct Item {
    inner: Arc<ArchiveInner>,
    idx: EntryIndex,
    dirent: Arc<Dirent>,
}

impl Item {
    pub fn index(&self) -> EntryIndex {
        self.idx
    }

    pub fn path(&self) -> String {
        match self.inner.new_scheme {
            true => self.dirent.path().to_string(),
            false => self.dirent.long_path(),
        }
    }

    pub fn title(&self) -> String {
        self.dirent.title().to_string()
    }

    pub fn mimetype(&self) -> Result<String> {
        match self.dirent.kind() {
            DirentKind::Item { .. } => {
                let idx = self.dirent.mimetype() as usize;
                match self.inner.mime_types.get(idx) {
                    Some(mt) => Ok(mt.clone()),
                    None => err_at!(InvalidFormat, msg: "unknown mime type code {}", idx),
                }
            }
            // linktarget/deleted entries have no real payload.
            _ => Ok("".to_string()),
        }
    }

    pub fn cluster_index(&self) -> Result<ClusterIndex> {
        self.dirent.cluster_index()
    }

    pub fn blob_index(&self) -> Result<BlobIndex> {
        self.dirent.blob_index()
    }

    pub fn size(&self) -> Result<Size> {
        match self.dirent.kind() {
            DirentKind::Item { cluster, blob } => {
                let cluster = self.inner.get_cluster(*cluster)?;
                cluster.get_blob_size(*blob)
            }
            _ => Ok(Size(0)),
        }
    }

    /// The item's whole blob, zero-copy where the storage allows.
    pub fn blob(&self) -> Result<Buffer> {
        match self.dirent.kind() {
            DirentKind::Item { cluster, blob } => {
                let cluster = self.inner.get_cluster(*cluster)?;
                cluster.get_blob(*blob)
            }
            _ => Ok(Buffer::Owned(vec![])),
        }
    }

    pub fn data(&self) -> Result<Vec<u8>> {
        Ok(self.blob()?.to_vec())
    }

    /// A sub-range of the item's bytes.
    pub fn data_range(&self, offset: Offset, size: Size) -> Result<Vec<u8>> {
        match self.dirent.kind() {
            DirentKind::Item { cluster, blob } => {
                let cluster = self.inner.get_cluster(*cluster)?;
                Ok(cluster.get_blob_range(*blob, offset, size)?.to_vec())
            }
            _ => err_at!(OutOfRange, msg: "no data range on an empty entry"),
        }
    }

    /// When the item's bytes sit uncompressed in a single archive file,
    /// return `(filename, offset)` for callers that want to read them
    /// directly. `None` otherwise.
    pub fn direct_access_information(&self) -> Result<Option<(ffi::OsString, u64)>> {
        let (cluster_idx, blob) = match self.dirent.kind() {
            DirentKind::Item { cluster, blob } => (*cluster, *blob),
            _ => return Ok(None),
        };
        if self.inner.compound.is_multipart() {
            return Ok(None);
        }
        let loc = match self.inner.compound.to_location() {
            Some(loc) => loc,
            None => return Ok(None),
        };
        let cluster = self.inner.get_cluster(cluster_idx)?;
        if cluster.is_compressed() {
            return Ok(None);
        }
        let off = self.inner.cluster_offset(cluster_idx)?.0
            + cluster.get_blob_offset(blob)?.0
            + self.inner.reader.offset().0;
        Ok(Some((loc, off)))
    }
}

/// Iterator over entries in path order. Each iterator owns its cursor;
/// entries come out as `Result` since dirents decode lazily.
pub struct PathIter {
    pub(crate) inner: Arc<ArchiveInner>,
    pub(crate) cur: u32,
    pub(crate) end: u32,
}

impl Iterator for PathIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let idx = EntryIndex(self.cur);
        self.cur += 1;
        Some(Entry::new(Arc::clone(&self.inner), idx))
    }
}

/// Iterator over entries in title order.
pub struct TitleIter {
    pub(crate) inner: Arc<ArchiveInner>,
    pub(crate) cur: u32,
    pub(crate) end: u32,
}

impl Iterator for TitleIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let idx = TitleIndex(self.cur);
        self.cur += 1;
        let entry = self
            .inner
            .title
            .entry_index_of(idx)
            .and_then(|eidx| Entry::new(Arc::clone(&self.inner), eidx));
        Some(entry)
    }
}

/// Iterator over user entries in storage (cluster) order, the efficient
/// order for bulk extraction.
pub struct EfficientIter {
    pub(crate) inner: Arc<ArchiveInner>,
    pub(crate) order: Arc<Vec<EntryIndex>>,
    pub(crate) cur: u32,
    pub(crate) end: u32,
}

impl Iterator for EfficientIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let idx = self.order[self.cur as usize];
        self.cur += 1;
        Some(Entry::new(Arc::clone(&self.inner), idx))
    }
}
