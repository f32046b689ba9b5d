//! Module `accessor` implement dirent access by index.
//!
//! [DirectDirentAccessor] resolves an entry index through the
//! path-pointer table to a file offset and decodes the dirent there,
//! holding decoded dirents in a bounded LRU. [IndirectDirentAccessor]
//! adds one indirection through a title-ordered table of entry indexes.

use std::sync::Arc;

use crate::{
    cache::Lru,
    dirent::{Dirent, DirentReader},
    err_at,
    reader::Reader,
    types::{EntryIndex, Offset, TitleIndex},
    Error, Result,
};

/// Access a dirent from its entry index.
pub struct DirectDirentAccessor {
    dirent_reader: DirentReader,
    path_ptr_reader: Reader,
    count: EntryIndex,
    cache: Lru<u32, Dirent>,
}

impl DirectDirentAccessor {
    pub fn new(
        dirent_reader: DirentReader,
        path_ptr_reader: Reader,
        count: EntryIndex,
        cache_size: usize,
    ) -> DirectDirentAccessor {
        DirectDirentAccessor {
            dirent_reader,
            path_ptr_reader,
            count,
            cache: Lru::new(cache_size),
        }
    }

    pub fn count(&self) -> EntryIndex {
        self.count
    }

    /// File offset of the dirent at `idx`, from the path-pointer table.
    pub fn offset_of(&self, idx: EntryIndex) -> Result<Offset> {
        if idx >= self.count {
            err_at!(OutOfRange, msg: "entry index {} out of {}", idx, self.count)?
        }
        let off = self.path_ptr_reader.read_u64(Offset(8 * idx.0 as u64))?;
        Ok(Offset(off))
    }

    pub fn dirent(&self, idx: EntryIndex) -> Result<Arc<Dirent>> {
        let offset = self.offset_of(idx)?;
        self.cache
            .get_or_fetch(idx.0, || self.dirent_reader.read_dirent(offset))
    }

    pub fn cache_max(&self) -> usize {
        self.cache.max()
    }

    pub fn set_cache_max(&self, max: usize) {
        self.cache.set_max(max)
    }
}

/// Access a dirent from its title index, through the title-ordered
/// table of entry indexes.
pub struct IndirectDirentAccessor {
    direct: Arc<DirectDirentAccessor>,
    index_reader: Reader,
    count: TitleIndex,
}

impl IndirectDirentAccessor {
    pub fn new(
        direct: Arc<DirectDirentAccessor>,
        index_reader: Reader,
        count: TitleIndex,
    ) -> IndirectDirentAccessor {
        IndirectDirentAccessor {
            direct,
            index_reader,
            count,
        }
    }

    pub fn count(&self) -> TitleIndex {
        self.count
    }

    pub fn as_direct(&self) -> &Arc<DirectDirentAccessor> {
        &self.direct
    }

    /// Entry index stored at title index `idx`.
    pub fn entry_index_of(&self, idx: TitleIndex) -> Result<EntryIndex> {
        if idx >= self.count {
            err_at!(OutOfRange, msg: "title index {} out of {}", idx, self.count)?
        }
        let entry = self.index_reader.read_u32(Offset(4 * idx.0 as u64))?;
        Ok(EntryIndex(entry))
    }

    pub fn dirent(&self, idx: TitleIndex) -> Result<Arc<Dirent>> {
        self.direct.dirent(self.entry_index_of(idx)?)
    }
}

#[cfg(test)]
#[path = "accessor_test.rs"]
mod accessor_test;
