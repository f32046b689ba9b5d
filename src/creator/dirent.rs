//! Module `dirent` implement writer-side dirents and their pool.
//!
//! Writer dirents are allocated out of a bump pool in fixed blocks and
//! addressed by stable [DirentId] values; every cross-reference between
//! dirents, the ordered sets and the cluster builders goes through
//! those ids. Path and title are packed into one allocation, with the
//! title omitted when it equals the path.

use std::sync::Arc;

use crate::{creator::cluster::ClusterHandle, err_at, Error, Result};

// dirents per pool block.
const POOL_BLOCK: usize = 0xffff;

/// Namespaces a writer can allocate into. The enum order is the byte
/// order of the namespace characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ns {
    C = 0,
    M = 1,
    W = 2,
    X = 3,
}

impl Ns {
    pub fn as_char(self) -> char {
        match self {
            Ns::C => 'C',
            Ns::M => 'M',
            Ns::W => 'W',
            Ns::X => 'X',
        }
    }
}

// path NUL title, with the title dropped when it equals the path.
pub(crate) struct PathTitle {
    data: Box<[u8]>,
}

impl PathTitle {
    fn new(path: &str, title: &str) -> Result<PathTitle> {
        if path.len() >= 0xffff {
            err_at!(InvalidEntry, msg: "path length {} too big", path.len())?
        }
        if title.len() >= 0xffff {
            err_at!(InvalidEntry, msg: "title length {} too big", title.len())?
        }
        let mut data = Vec::with_capacity(path.len() + 1 + title.len());
        data.extend_from_slice(path.as_bytes());
        data.push(0);
        if title != path {
            data.extend_from_slice(title.as_bytes());
        }
        Ok(PathTitle {
            data: data.into_boxed_slice(),
        })
    }

    pub fn path(&self) -> &str {
        let z = self.data.iter().position(|b| *b == 0).unwrap();
        std::str::from_utf8(&self.data[..z]).unwrap()
    }

    /// Title for sorting and display, the path when none was stored.
    pub fn title(&self) -> &str {
        match self.stored_title() {
            "" => self.path(),
            title => title,
        }
    }

    /// Title exactly as it will be written, empty when it equals the
    /// path.
    pub fn stored_title(&self) -> &str {
        let z = self.data.iter().position(|b| *b == 0).unwrap();
        std::str::from_utf8(&self.data[z + 1..]).unwrap()
    }
}

/// What a writer dirent points at, before and after finalization.
pub(crate) enum DirentInfo {
    /// An item: the cluster it was batched into and its blob index.
    Direct {
        cluster: Option<Arc<ClusterHandle>>,
        blob: u32,
    },
    /// A redirect whose target path is not resolved yet.
    Redirect { ns: Ns, target: String },
    /// A redirect resolved to its target dirent.
    Resolved { target: DirentId },
}

/// Stable handle to a pool-allocated dirent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct DirentId(pub(crate) u32);

pub(crate) struct WriterDirent {
    pub(crate) path_title: PathTitle,
    pub(crate) ns: Ns,
    pub(crate) mimetype: u16,
    pub(crate) idx: u32,
    pub(crate) info: DirentInfo,
    pub(crate) offset: u64,
    pub(crate) removed: bool,
    pub(crate) front_article: bool,
}

impl WriterDirent {
    pub(crate) fn new_item(ns: Ns, path: &str, title: &str, mimetype: u16) -> Result<WriterDirent> {
        Ok(WriterDirent {
            path_title: PathTitle::new(path, title)?,
            ns,
            mimetype,
            idx: 0,
            info: DirentInfo::Direct {
                cluster: None,
                blob: 0,
            },
            offset: 0,
            removed: false,
            front_article: false,
        })
    }

    pub(crate) fn new_redirect(
        ns: Ns,
        path: &str,
        title: &str,
        target_ns: Ns,
        target: &str,
    ) -> Result<WriterDirent> {
        Ok(WriterDirent {
            path_title: PathTitle::new(path, title)?,
            ns,
            mimetype: 0,
            idx: 0,
            info: DirentInfo::Redirect {
                ns: target_ns,
                target: target.to_string(),
            },
            offset: 0,
            removed: false,
            front_article: false,
        })
    }

    /// A clone of `target`'s content address under a new path; the two
    /// dirents share the same blob.
    pub(crate) fn new_alias(path: &str, title: &str, target: &WriterDirent) -> Result<WriterDirent> {
        let (cluster, blob) = match &target.info {
            DirentInfo::Direct { cluster, blob } => (cluster.clone(), *blob),
            _ => err_at!(InvalidEntry, msg: "alias target {} is not an item", target.path())?,
        };
        Ok(WriterDirent {
            path_title: PathTitle::new(path, title)?,
            ns: target.ns,
            mimetype: target.mimetype,
            idx: 0,
            info: DirentInfo::Direct { cluster, blob },
            offset: 0,
            removed: false,
            front_article: false,
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.path_title.path()
    }

    pub(crate) fn title(&self) -> &str {
        self.path_title.title()
    }

    pub(crate) fn is_redirect(&self) -> bool {
        matches!(
            self.info,
            DirentInfo::Redirect { .. } | DirentInfo::Resolved { .. }
        )
    }

    pub(crate) fn is_item(&self) -> bool {
        matches!(self.info, DirentInfo::Direct { .. })
    }
}

/// Bump allocator handing out stable dirent ids; dirents are only
/// dropped with the pool itself.
#[derive(Default)]
pub(crate) struct DirentPool {
    blocks: Vec<Vec<WriterDirent>>,
}

impl DirentPool {
    pub(crate) fn new() -> DirentPool {
        DirentPool { blocks: vec![] }
    }

    pub(crate) fn len(&self) -> usize {
        match self.blocks.len() {
            0 => 0,
            n => (n - 1) * POOL_BLOCK + self.blocks[n - 1].len(),
        }
    }

    pub(crate) fn alloc(&mut self, dirent: WriterDirent) -> DirentId {
        match self.blocks.last() {
            Some(block) if block.len() < POOL_BLOCK => (),
            _ => self.blocks.push(Vec::with_capacity(POOL_BLOCK)),
        }
        let num_blocks = self.blocks.len();
        let block = self.blocks.last_mut().unwrap();
        block.push(dirent);
        DirentId(((num_blocks - 1) * POOL_BLOCK + block.len() - 1) as u32)
    }

    pub(crate) fn get(&self, id: DirentId) -> &WriterDirent {
        &self.blocks[id.0 as usize / POOL_BLOCK][id.0 as usize % POOL_BLOCK]
    }

    pub(crate) fn get_mut(&mut self, id: DirentId) -> &mut WriterDirent {
        &mut self.blocks[id.0 as usize / POOL_BLOCK][id.0 as usize % POOL_BLOCK]
    }
}

#[cfg(test)]
#[path = "dirent_test.rs"]
mod dirent_test;
