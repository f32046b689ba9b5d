//! Module `check` implement standalone validators over an open archive.
//!
//! Each check inspects one structural aspect, returns whether it holds,
//! and emits one diagnostic line per failure through the log.

use log::error;

use std::path;

use crate::{
    accessor::IndirectDirentAccessor,
    archive::{Archive, HEADER_SIZE},
    types::{EntryIndex, TitleIndex},
    Result,
};

/// The individual integrity checks that [Archive::check_integrity] can
/// run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntegrityCheck {
    /// Re-hash the archive and compare against the stored checksum.
    Checksum,
    /// Every path-pointer entry points inside the dirent region.
    DirentPtrs,
    /// The dirent table is strictly ordered by (namespace, path).
    DirentOrder,
    /// Title-index entries are valid and ordered by (namespace, title).
    TitleIndex,
    /// Every cluster pointer points inside the cluster region.
    ClusterPtrs,
    /// Every item dirent names a mimetype from the mimetype list.
    DirentMimeTypes,
}

/// All checks, in the order they are usually run.
pub const ALL_CHECKS: [IntegrityCheck; 6] = [
    IntegrityCheck::Checksum,
    IntegrityCheck::DirentPtrs,
    IntegrityCheck::DirentOrder,
    IntegrityCheck::TitleIndex,
    IntegrityCheck::ClusterPtrs,
    IntegrityCheck::DirentMimeTypes,
];

/// Run one integrity check over `archive`.
pub fn check_integrity(archive: &Archive, check: IntegrityCheck) -> Result<bool> {
    match check {
        IntegrityCheck::Checksum => check_checksum(archive),
        IntegrityCheck::DirentPtrs => check_dirent_ptrs(archive),
        IntegrityCheck::DirentOrder => check_dirent_order(archive),
        IntegrityCheck::TitleIndex => check_title_index(archive),
        IntegrityCheck::ClusterPtrs => check_cluster_ptrs(archive),
        IntegrityCheck::DirentMimeTypes => check_dirent_mimetypes(archive),
    }
}

/// Open the archive at `path` and run `checks` over it. Construction
/// failures count as a failed validation.
pub fn validate<P>(path: P, checks: &[IntegrityCheck]) -> Result<bool>
where
    P: AsRef<path::Path>,
{
    let archive = match Archive::open(path) {
        Ok(archive) => archive,
        Err(err) => {
            error!(target: "zimf  ", "{}", err);
            return Ok(false);
        }
    };
    for check in checks {
        if !check_integrity(&archive, *check)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_checksum(archive: &Archive) -> Result<bool> {
    match archive.verify_checksum()? {
        true => Ok(true),
        false => {
            error!(target: "zimf  ", "checksum doesn't match");
            Ok(false)
        }
    }
}

fn check_dirent_ptrs(archive: &Archive) -> Result<bool> {
    let inner = &archive.inner;
    let count = inner.header.entry_count;
    let valid_end = match inner.header.has_checksum() {
        true => inner.header.checksum_pos,
        false => inner.reader.size().0,
    };
    let dirent_min_size = 11;

    for i in 0..count {
        let off = inner.direct.offset_of(EntryIndex(i))?.0;
        if off < HEADER_SIZE || off + dirent_min_size > valid_end {
            error!(target: "zimf  ", "invalid dirent pointer at {}", i);
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_dirent_order(archive: &Archive) -> Result<bool> {
    let inner = &archive.inner;
    let mut prev: Option<String> = None;
    for i in 0..inner.header.entry_count {
        let dirent = inner.direct.dirent(EntryIndex(i))?;
        let long_path = dirent.long_path();
        if let Some(prev) = &prev {
            if *prev >= long_path {
                error!(
                    target: "zimf  ",
                    "dirent table is not properly sorted: #{}: {} #{}: {}",
                    i - 1, prev, i, long_path
                );
                return Ok(false);
            }
        }
        prev = Some(long_path);
    }
    Ok(true)
}

fn check_title_listing(accessor: &IndirectDirentAccessor, total: u32) -> Result<bool> {
    let mut prev: Option<String> = None;
    for i in 0..accessor.count().0 {
        let idx = accessor.entry_index_of(TitleIndex(i))?;
        if idx.0 >= total {
            error!(target: "zimf  ", "invalid title index entry at {}", i);
            return Ok(false);
        }
        let long_title = accessor.dirent(TitleIndex(i))?.long_title();
        if let Some(prev) = &prev {
            if *prev > long_title {
                error!(target: "zimf  ", "title index is not properly sorted at {}", i);
                return Ok(false);
            }
        }
        prev = Some(long_title);
    }
    Ok(true)
}

fn check_title_index(archive: &Archive) -> Result<bool> {
    let inner = &archive.inner;
    let total = inner.header.entry_count;

    let mut ok = true;
    if let Some(accessor) = inner.legacy_title_accessor()? {
        ok = check_title_listing(&accessor, total)?;
    }
    if inner.has_front_index {
        ok = ok && check_title_listing(&inner.title, total)?;
    }
    Ok(ok)
}

fn check_cluster_ptrs(archive: &Archive) -> Result<bool> {
    let inner = &archive.inner;
    let valid_end = match inner.header.has_checksum() {
        true => inner.header.checksum_pos,
        false => inner.reader.size().0,
    };
    let cluster_min_size = 1;

    for i in 0..inner.header.cluster_count {
        let off = inner.cluster_offset(crate::types::ClusterIndex(i))?.0;
        if off < HEADER_SIZE || off + cluster_min_size > valid_end {
            error!(target: "zimf  ", "invalid cluster pointer at {}", i);
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_dirent_mimetypes(archive: &Archive) -> Result<bool> {
    let inner = &archive.inner;
    for i in 0..inner.header.entry_count {
        let dirent = inner.direct.dirent(EntryIndex(i))?;
        if dirent.is_item() && (dirent.mimetype() as usize) >= inner.mime_types.len() {
            error!(
                target: "zimf  ",
                "entry {} has invalid mime-type value {}",
                dirent.long_path(),
                dirent.mimetype()
            );
            return Ok(false);
        }
    }
    Ok(true)
}
