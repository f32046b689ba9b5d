//! Module `archive` implement the reader facade over a ZIM file.
//!
//! [Archive] opens a file (possibly split into parts, or embedded in a
//! larger container), parses the header and pointer tables once, and
//! then resolves entries by path, title or index on demand. Handles are
//! cheap to clone and shareable across threads; dirents and clusters
//! are fetched lazily into bounded caches.

use binread::{BinRead, BinReaderExt};
use lazy_static::lazy_static;
use log::{debug, warn};
use md5::{Digest, Md5};

use std::{
    cmp,
    collections::BTreeSet,
    ffi, fs, path,
    sync::{Arc, Mutex},
    time,
};

use crate::{
    accessor::{DirectDirentAccessor, IndirectDirentAccessor},
    cache::Lru,
    cluster::Cluster,
    counter::{count_mimetype, parse_mimetype_counter, MimeCounter},
    dirent::DirentReader,
    entry::{EfficientIter, Entry, Item, PathIter, TitleIter},
    err_at,
    lookup::{DirentLookup, PathTable, TitleTable},
    parts::FileCompound,
    reader::Reader,
    types::{ClusterIndex, EntryIndex, Offset, Size, TitleIndex},
    util, Error, Result,
};

/// Magic number identifying a ZIM file, `ZIM\x04` little-endian.
pub const ZIM_MAGIC: u32 = 0x044d_495a;
/// Major version of archives using the old namespace scheme.
pub const MAJOR_VERSION_OLD: u16 = 5;
/// Major version written by this library.
pub const MAJOR_VERSION: u16 = 6;
/// Minor version written by this library.
pub const MINOR_VERSION: u16 = 3;

/// Namespaces holding user-visible content under the old scheme.
pub const NAMESPACES_OLD_CONTENT: [char; 4] = ['A', 'I', 'J', '-'];

pub(crate) const HEADER_SIZE: u64 = 80;

lazy_static! {
    static ref CLUSTER_CACHE_SIZE: usize = util::env_value("ZIM_CLUSTERCACHE", 16);
    static ref DIRENT_CACHE_SIZE: usize = util::env_value("ZIM_DIRENTCACHE", 512);
    static ref DIRENT_LOOKUP_CACHE_SIZE: u32 = util::env_value("ZIM_DIRENTLOOKUPCACHE", 256);
}

/// The fixed 80-byte file header.
#[derive(Clone, Debug, BinRead)]
pub struct Header {
    pub magic_number: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: [u8; 16],
    pub entry_count: u32,
    pub cluster_count: u32,
    pub path_ptr_pos: u64,
    pub title_idx_pos: u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos: u64,
    pub main_page: u32,
    pub layout_page: u32,
    pub checksum_pos: u64,
}

impl Header {
    pub(crate) fn read(reader: &Reader) -> Result<Header> {
        let buf = reader.get_buffer(Offset(0), Size(HEADER_SIZE))?;
        let mut br = binread::io::Cursor::new(&buf[..]);
        let header: Header = err_at!(InvalidFormat, br.read_le())?;
        header.sanity_check()?;
        Ok(header)
    }

    fn sanity_check(&self) -> Result<()> {
        if self.magic_number != ZIM_MAGIC {
            err_at!(InvalidFormat, msg: "invalid magic number {:x}", self.magic_number)?
        }
        if self.major_version != MAJOR_VERSION_OLD && self.major_version != MAJOR_VERSION {
            err_at!(InvalidFormat, msg: "invalid major version {}", self.major_version)?
        }
        if (self.entry_count == 0) != (self.cluster_count == 0) {
            err_at!(InvalidFormat, msg: "no entry <=> no cluster")?
        }
        if self.mime_list_pos != HEADER_SIZE && self.mime_list_pos != 72 {
            err_at!(InvalidFormat, msg: "mimeListPos must be 80")?
        }
        if self.path_ptr_pos < self.mime_list_pos {
            err_at!(InvalidFormat, msg: "pathPtrPos must be > mimeListPos")?
        }
        if self.has_title_listing_v0() && self.title_idx_pos < self.mime_list_pos {
            err_at!(InvalidFormat, msg: "titleIdxPos must be > mimeListPos")?
        }
        if self.cluster_ptr_pos < self.mime_list_pos {
            err_at!(InvalidFormat, msg: "clusterPtrPos must be > mimeListPos")?
        }
        if self.cluster_count > self.entry_count {
            err_at!(InvalidFormat, msg: "cluster count higher than entry count")?
        }
        if self.checksum_pos != 0 && self.checksum_pos < self.mime_list_pos {
            err_at!(InvalidFormat, msg: "checksumPos must be > mimeListPos")?
        }
        Ok(())
    }

    pub fn has_checksum(&self) -> bool {
        self.checksum_pos != 0
    }

    pub fn has_main_page(&self) -> bool {
        self.main_page != u32::MAX
    }

    pub fn has_title_listing_v0(&self) -> bool {
        self.title_idx_pos != u64::MAX
    }

    pub fn to_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_slice(&self.uuid).unwrap()
    }

    pub(crate) fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0_u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.magic_number.to_le_bytes());
        buf[4..6].copy_from_slice(&self.major_version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[8..24].copy_from_slice(&self.uuid);
        buf[24..28].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.cluster_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.path_ptr_pos.to_le_bytes());
        buf[40..48].copy_from_slice(&self.title_idx_pos.to_le_bytes());
        buf[48..56].copy_from_slice(&self.cluster_ptr_pos.to_le_bytes());
        buf[56..64].copy_from_slice(&self.mime_list_pos.to_le_bytes());
        buf[64..68].copy_from_slice(&self.main_page.to_le_bytes());
        buf[68..72].copy_from_slice(&self.layout_page.to_le_bytes());
        buf[72..80].copy_from_slice(&self.checksum_pos.to_le_bytes());
        buf
    }
}

fn section_reader(reader: &Reader, name: &str, offset: Offset, size: Size) -> Result<Reader> {
    match reader.sub_reader(offset, size) {
        Ok(sub) => Ok(sub),
        Err(_) => err_at!(
            InvalidFormat, msg: "{} outside (or not fully inside) zim file", name
        ),
    }
}

pub(crate) struct ArchiveInner {
    pub(crate) compound: Arc<FileCompound>,
    pub(crate) reader: Arc<Reader>,
    pub(crate) header: Header,
    pub(crate) mime_types: Vec<String>,
    pub(crate) direct: Arc<DirectDirentAccessor>,
    pub(crate) cluster_ptr_reader: Reader,
    pub(crate) title: Arc<IndirectDirentAccessor>,
    pub(crate) has_front_index: bool,
    pub(crate) path_lookup: DirentLookup<PathTable>,
    pub(crate) title_lookup: DirentLookup<TitleTable>,
    pub(crate) cluster_cache: Lru<u32, Cluster>,
    pub(crate) new_scheme: bool,
    pub(crate) start_user: EntryIndex,
    pub(crate) end_user: EntryIndex,
    by_cluster_order: Mutex<Option<Arc<Vec<EntryIndex>>>>,
}

impl ArchiveInner {
    fn open(compound: Arc<FileCompound>, window: Option<(Offset, Size)>) -> Result<ArchiveInner> {
        let reader = match window {
            Some((offset, size)) => Reader::window(Arc::clone(&compound), offset, size)?,
            None => Reader::over(Arc::clone(&compound)),
        };
        let reader = Arc::new(reader);

        if reader.size().0 < HEADER_SIZE {
            err_at!(InvalidFormat, msg: "zim-file is too small to contain a header")?
        }
        let header = Header::read(&reader)?;

        let path_ptr_reader = section_reader(
            &reader,
            "dirent pointer table",
            Offset(header.path_ptr_pos),
            Size(8 * header.entry_count as u64),
        )?;
        let direct = Arc::new(DirectDirentAccessor::new(
            DirentReader::new(Arc::clone(&reader)),
            path_ptr_reader,
            EntryIndex(header.entry_count),
            *DIRENT_CACHE_SIZE,
        ));

        let cluster_ptr_reader = section_reader(
            &reader,
            "cluster pointer table",
            Offset(header.cluster_ptr_pos),
            Size(8 * header.cluster_count as u64),
        )?;

        // quick check for an obviously corrupt file.
        if header.cluster_count == 0 {
            warn!(target: "zimf  ", "no clusters found");
        } else {
            let last =
                cluster_ptr_reader.read_u64(Offset(8 * (header.cluster_count as u64 - 1)))?;
            if last > reader.size().0 {
                err_at!(
                    InvalidFormat, msg: "last cluster offset {} larger than file size {}",
                    last, reader.size().0
                )?
            }
        }
        if header.has_checksum() && header.checksum_pos != reader.size().0 - 16 {
            err_at!(InvalidFormat, msg: "checksum position is not valid")?
        }

        let path_lookup = DirentLookup::new_fast(
            PathTable(Arc::clone(&direct)),
            *DIRENT_LOOKUP_CACHE_SIZE,
        )?;

        let cluster_cache = Lru::new(cmp::max(1, *CLUSTER_CACHE_SIZE));

        // the title index: prefer the front-article listing entry, fall
        // back to the legacy header table.
        let mut has_front_index = false;
        let mut title: Option<IndirectDirentAccessor> = None;
        if let (true, idx) = path_lookup.find(b'X', b"listing/titleOrdered/v1")? {
            let dirent = direct.dirent(EntryIndex(idx))?;
            if dirent.is_item() {
                let cluster_idx = dirent.cluster_index()?;
                let cluster_off =
                    cluster_ptr_reader.read_u64(Offset(8 * cluster_idx.0 as u64))?;
                let cluster = Cluster::read(&reader, Offset(cluster_off))?;
                // a compressed listing would be a format error; be
                // tolerant and skip the entry.
                if !cluster.is_compressed() {
                    let blob = dirent.blob_index()?;
                    let off = cluster_off + cluster.get_blob_offset(blob)?.0;
                    let size = cluster.get_blob_size(blob)?;
                    let index_reader =
                        section_reader(&reader, "title index", Offset(off), size)?;
                    title = Some(IndirectDirentAccessor::new(
                        Arc::clone(&direct),
                        index_reader,
                        TitleIndex((size.0 / 4) as u32),
                    ));
                    has_front_index = true;
                }
            }
        }
        let title = match title {
            Some(title) => title,
            None if header.has_title_listing_v0() => {
                let index_reader = section_reader(
                    &reader,
                    "title index table",
                    Offset(header.title_idx_pos),
                    Size(4 * header.entry_count as u64),
                )?;
                IndirectDirentAccessor::new(
                    Arc::clone(&direct),
                    index_reader,
                    TitleIndex(header.entry_count),
                )
            }
            None => IndirectDirentAccessor::new(
                Arc::clone(&direct),
                Reader::from_bytes(vec![]),
                TitleIndex(0),
            ),
        };
        let title = Arc::new(title);

        let title_lookup = DirentLookup::new(TitleTable(Arc::clone(&title)));

        let mime_types = Self::read_mime_types(&header, &reader, &direct, &cluster_ptr_reader)?;

        let new_scheme = header.minor_version >= 1;
        let (start_user, end_user) = match new_scheme {
            true => {
                let start = path_lookup.namespace_begin(b'C')?;
                let end = path_lookup.namespace_end(b'C')?;
                (EntryIndex(start), EntryIndex(end))
            }
            false => (EntryIndex(0), EntryIndex(header.entry_count)),
        };

        Ok(ArchiveInner {
            compound,
            reader,
            header,
            mime_types,
            direct,
            cluster_ptr_reader,
            title,
            has_front_index,
            path_lookup,
            title_lookup,
            cluster_cache,
            new_scheme,
            start_user,
            end_user,
            by_cluster_order: Mutex::new(None),
        })
    }

    fn read_mime_types(
        header: &Header,
        reader: &Reader,
        direct: &DirectDirentAccessor,
        cluster_ptr_reader: &Reader,
    ) -> Result<Vec<String>> {
        let mut upper = cmp::min(header.path_ptr_pos, header.cluster_ptr_pos);
        if header.has_title_listing_v0() {
            upper = cmp::min(upper, header.title_idx_pos);
        }
        if header.entry_count > 0 {
            // dirents and clusters are laid out in pointer-table order.
            upper = cmp::min(upper, direct.offset_of(EntryIndex(0))?.0);
            upper = cmp::min(upper, cluster_ptr_reader.read_u64(Offset(0))?);
        }
        if upper <= header.mime_list_pos {
            err_at!(InvalidFormat, msg: "bad zim archive, no room for mime list")?
        }
        if upper > 1024 {
            warn!(
                target: "zimf  ",
                "the mime-type list is abnormally large ({} bytes)",
                upper - header.mime_list_pos
            );
        }

        let size = Size(upper - header.mime_list_pos);
        let buf = reader.get_buffer(Offset(header.mime_list_pos), size)?;
        let mut mime_types = vec![];
        let mut p = 0;
        loop {
            match buf.get(p) {
                Some(0) => break Ok(mime_types),
                Some(_) => match buf[p..].iter().position(|b| *b == 0) {
                    Some(z) => {
                        let s = err_at!(
                            InvalidFormat,
                            std::str::from_utf8(&buf[p..p + z]),
                            "bad mime type"
                        )?;
                        mime_types.push(s.to_string());
                        p += z + 1;
                    }
                    None => break err_at!(InvalidFormat, msg: "error getting mime lists"),
                },
                None => break err_at!(InvalidFormat, msg: "error getting mime lists"),
            }
        }
    }

    pub(crate) fn cluster_offset(&self, idx: ClusterIndex) -> Result<Offset> {
        if idx.0 >= self.header.cluster_count {
            err_at!(OutOfRange, msg: "cluster index {} out of {}", idx, self.header.cluster_count)?
        }
        let off = self.cluster_ptr_reader.read_u64(Offset(8 * idx.0 as u64))?;
        Ok(Offset(off))
    }

    pub(crate) fn get_cluster(&self, idx: ClusterIndex) -> Result<Arc<Cluster>> {
        if idx.0 >= self.header.cluster_count {
            err_at!(InvalidFormat, msg: "cluster index {} out of range", idx)?
        }
        let offset = self.cluster_offset(idx)?;
        debug!(target: "zimf  ", "read cluster {} from {}", idx, offset);
        let cluster = self
            .cluster_cache
            .get_or_fetch(idx.0, || Cluster::read(&self.reader, offset))?;

        // A generation of writers (format 5.0) emitted zstd frames with
        // a 128MiB window; each cached decoder would pin that much
        // address space, which 32-bit builds cannot afford.
        #[cfg(target_pointer_width = "32")]
        {
            if cluster.compression() == crate::cluster::Compression::Zstd
                && self.header.major_version == 5
                && self.header.minor_version == 0
            {
                self.cluster_cache.drop_key(&idx.0);
            }
        }

        Ok(cluster)
    }

    // entry indexes of user entries, ordered by (cluster, entry).
    fn cluster_order(&self) -> Result<Arc<Vec<EntryIndex>>> {
        let mut slot = self.by_cluster_order.lock().unwrap();
        if let Some(order) = slot.as_ref() {
            return Ok(Arc::clone(order));
        }

        let mut list: Vec<(u32, u32)> = vec![];
        for i in self.start_user.0..self.end_user.0 {
            let dirent = self.direct.dirent(EntryIndex(i))?;
            let cluster = match dirent.is_item() {
                true => dirent.cluster_index()?.0,
                false => 0,
            };
            list.push((cluster, i));
        }
        list.sort_unstable();

        let order: Arc<Vec<EntryIndex>> =
            Arc::new(list.into_iter().map(|(_, i)| EntryIndex(i)).collect());
        *slot = Some(Arc::clone(&order));
        Ok(order)
    }

    pub(crate) fn legacy_title_accessor(&self) -> Result<Option<IndirectDirentAccessor>> {
        if !self.header.has_title_listing_v0() {
            return Ok(None);
        }
        let index_reader = section_reader(
            &self.reader,
            "full title index table",
            Offset(self.header.title_idx_pos),
            Size(4 * self.header.entry_count as u64),
        )?;
        Ok(Some(IndirectDirentAccessor::new(
            Arc::clone(&self.direct),
            index_reader,
            TitleIndex(self.header.entry_count),
        )))
    }

    fn find_path(&self, ns: char, path: &str) -> Result<Option<EntryIndex>> {
        match self.path_lookup.find(ns as u8, path.as_bytes())? {
            (true, idx) => Ok(Some(EntryIndex(idx))),
            (false, _) => Ok(None),
        }
    }
}

/// Split a namespace-qualified path `N/path` (with an optional leading
/// slash) into its namespace byte and bare path.
pub(crate) fn parse_long_path(long_path: &str) -> Result<(char, &str)> {
    let bytes = long_path.as_bytes();
    let i = match bytes.first() {
        Some(b'/') => 1,
        _ => 0,
    };
    let ok = i < bytes.len()
        && bytes[i] != b'/'
        && bytes[i].is_ascii()
        && (i + 1 >= bytes.len() || bytes[i + 1] == b'/');
    if !ok {
        err_at!(InvalidInput, msg: "cannot parse path {:?}", long_path)?
    }
    let ns = bytes[i] as char;
    let rest = match i + 2 <= bytes.len() {
        true => &long_path[i + 2..],
        false => "",
    };
    Ok((ns, rest))
}

// smallest byte-string strictly greater than every string prefixed by
// `key`: bump the last byte.
fn key_successor(key: &str) -> Vec<u8> {
    let mut bytes = key.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.wrapping_add(1);
    }
    bytes
}

/// Read-only handle over one ZIM archive. Clones share the parsed
/// metadata and the caches.
#[derive(Clone)]
pub struct Archive {
    pub(crate) inner: Arc<ArchiveInner>,
}

impl Archive {
    /// Open the archive at `path`. A missing `path` triggers split-file
    /// discovery with the `aa`..`zz` suffixes.
    pub fn open<P>(path: P) -> Result<Archive>
    where
        P: AsRef<path::Path>,
    {
        let compound = Arc::new(FileCompound::open(path)?);
        let inner = ArchiveInner::open(compound, None)?;
        Ok(Archive {
            inner: Arc::new(inner),
        })
    }

    /// Treat an already opened handle as a whole archive.
    pub fn from_file(fd: fs::File) -> Result<Archive> {
        let compound = Arc::new(FileCompound::from_file(fd)?);
        let inner = ArchiveInner::open(compound, None)?;
        Ok(Archive {
            inner: Arc::new(inner),
        })
    }

    /// Treat `(offset, size)` of an open handle as the archive, for
    /// archives embedded inside a larger file.
    pub fn from_file_window(fd: fs::File, offset: u64, size: u64) -> Result<Archive> {
        let compound = Arc::new(FileCompound::from_file_window(fd, offset, size));
        let inner = ArchiveInner::open(compound, None)?;
        Ok(Archive {
            inner: Arc::new(inner),
        })
    }

    /// Assemble the archive from several `(handle, offset, size)`
    /// windows.
    pub fn from_file_windows(windows: Vec<(fs::File, u64, u64)>) -> Result<Archive> {
        let compound = Arc::new(FileCompound::from_file_windows(windows)?);
        let inner = ArchiveInner::open(compound, None)?;
        Ok(Archive {
            inner: Arc::new(inner),
        })
    }

    pub fn filename(&self) -> Option<ffi::OsString> {
        self.inner.compound.to_location()
    }

    pub fn filesize(&self) -> u64 {
        self.inner.reader.size().0
    }

    pub fn mtime(&self) -> Option<time::SystemTime> {
        self.inner.compound.to_mtime()
    }

    pub fn is_multipart(&self) -> bool {
        self.inner.compound.is_multipart()
    }

    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.inner.header.to_uuid()
    }

    pub fn has_new_namespace_scheme(&self) -> bool {
        self.inner.new_scheme
    }

    pub fn has_front_articles_index(&self) -> bool {
        self.inner.has_front_index
    }

    /// Every dirent in the archive, synthesized listings included.
    pub fn entry_count_all(&self) -> u32 {
        self.inner.header.entry_count
    }

    /// User-facing entries only.
    pub fn entry_count_user(&self) -> u32 {
        self.inner.end_user - self.inner.start_user
    }

    pub fn cluster_count(&self) -> u32 {
        self.inner.header.cluster_count
    }

    pub fn cluster_offset(&self, idx: ClusterIndex) -> Result<Offset> {
        self.inner.cluster_offset(idx)
    }

    /// Parsed `M/Counter` metadata.
    pub fn counter(&self) -> Result<MimeCounter> {
        let data = self.metadata("Counter")?;
        let data = err_at!(InvalidFormat, std::str::from_utf8(&data), "Counter")?;
        Ok(parse_mimetype_counter(data))
    }

    /// Number of front articles: the dedicated index when present, else
    /// derived from `M/Counter`, else the content-namespace size.
    pub fn article_count(&self) -> Result<u32> {
        if self.inner.has_front_index {
            return Ok(self.inner.title.count().0);
        }
        match self.counter() {
            Ok(counter) => {
                let n = count_mimetype(&counter, |m| m.starts_with("text/html"));
                Ok(n as u32)
            }
            Err(err) if err.is_not_found() => {
                let ns = match self.inner.new_scheme {
                    true => b'C',
                    false => b'A',
                };
                let begin = self.inner.path_lookup.namespace_begin(ns)?;
                let end = self.inner.path_lookup.namespace_end(ns)?;
                Ok(end - begin)
            }
            Err(err) => Err(err),
        }
    }

    /// Number of media entries, from `M/Counter` or the image/media
    /// namespaces of old archives.
    pub fn media_count(&self) -> Result<u32> {
        match self.counter() {
            Ok(counter) => {
                let n = count_mimetype(&counter, |m| {
                    m.starts_with("image/") || m.starts_with("video/") || m.starts_with("audio/")
                });
                Ok(n as u32)
            }
            Err(err) if err.is_not_found() => {
                let mut n = 0;
                for ns in [b'I', b'J'] {
                    n += self.inner.path_lookup.namespace_end(ns)?
                        - self.inner.path_lookup.namespace_begin(ns)?;
                }
                Ok(n)
            }
            Err(err) => Err(err),
        }
    }

    /// Entry at position `idx` of the path-ordered table.
    pub fn get_entry_by_path_idx(&self, idx: EntryIndex) -> Result<Entry> {
        if idx.0 >= self.inner.header.entry_count {
            err_at!(OutOfRange, msg: "entry index {} out of {}", idx, self.entry_count_all())?
        }
        Entry::new(Arc::clone(&self.inner), idx)
    }

    /// Entry at position `idx` of the title-ordered table.
    pub fn get_entry_by_title_idx(&self, idx: TitleIndex) -> Result<Entry> {
        let eidx = self.inner.title.entry_index_of(idx)?;
        Entry::new(Arc::clone(&self.inner), eidx)
    }

    /// The i-th user entry in storage (cluster) order.
    pub fn get_entry_by_cluster_order(&self, idx: u32) -> Result<Entry> {
        let order = self.inner.cluster_order()?;
        match order.get(idx as usize) {
            Some(eidx) => Entry::new(Arc::clone(&self.inner), *eidx),
            None => err_at!(OutOfRange, msg: "entry index {} out of {}", idx, order.len()),
        }
    }

    /// Look an entry up by path. Under the new scheme bare user paths
    /// are tried first, then namespace-qualified ones; under the old
    /// scheme the other way around.
    pub fn get_entry_by_path(&self, path: &str) -> Result<Entry> {
        if self.inner.new_scheme {
            if let Some(idx) = self.inner.find_path('C', path)? {
                return Entry::new(Arc::clone(&self.inner), idx);
            }
            // the path may be an old namespace-qualified form, from a
            // bookmark say.
            if let Ok((_, rest)) = parse_long_path(path) {
                if let Some(idx) = self.inner.find_path('C', rest)? {
                    return Entry::new(Arc::clone(&self.inner), idx);
                }
            }
        } else {
            if let Ok((ns, rest)) = parse_long_path(path) {
                if let Some(idx) = self.inner.find_path(ns, rest)? {
                    return Entry::new(Arc::clone(&self.inner), idx);
                }
            }
            for ns in NAMESPACES_OLD_CONTENT {
                if let Some(idx) = self.inner.find_path(ns, path)? {
                    return Entry::new(Arc::clone(&self.inner), idx);
                }
            }
        }
        err_at!(NotFound, msg: "cannot find entry {:?}", path)
    }

    /// Look an entry up by `(namespace, path)` directly.
    pub fn get_entry_by_path_ns(&self, ns: char, path: &str) -> Result<Entry> {
        match self.inner.find_path(ns, path)? {
            Some(idx) => Entry::new(Arc::clone(&self.inner), idx),
            None => err_at!(NotFound, msg: "cannot find entry {}/{}", ns, path),
        }
    }

    /// Look an entry up by exact title, trying content namespaces in
    /// order.
    pub fn get_entry_by_title(&self, title: &str) -> Result<Entry> {
        for ns in ['C', 'A', 'I', 'J', '-'] {
            let (found, idx) = self.inner.title_lookup.find(ns as u8, title.as_bytes())?;
            if found {
                return self.get_entry_by_title_idx(TitleIndex(idx));
            }
        }
        err_at!(NotFound, msg: "cannot find entry titled {:?}", title)
    }

    pub fn main_entry_index(&self) -> Option<EntryIndex> {
        match self.inner.header.has_main_page() {
            true => Some(EntryIndex(self.inner.header.main_page)),
            false => None,
        }
    }

    pub fn has_main_entry(&self) -> bool {
        self.inner.header.has_main_page()
    }

    /// The archive's main (welcome) entry.
    pub fn get_main_entry(&self) -> Result<Entry> {
        if let Some(idx) = self.inner.find_path('W', "mainPage")? {
            return Entry::new(Arc::clone(&self.inner), idx);
        }
        match self.main_entry_index() {
            Some(idx) => self.get_entry_by_path_idx(idx),
            None => err_at!(NotFound, msg: "no main page"),
        }
    }

    /// A uniformly random front article.
    pub fn get_random_entry(&self) -> Result<Entry> {
        if self.inner.new_scheme {
            // without a dedicated front index, the user entries come
            // first in title order: C sorts lowest among {C, M, W, X}.
            let n = match self.inner.has_front_index {
                true => self.inner.title.count().0,
                false => self.entry_count_user(),
            };
            if n == 0 {
                err_at!(NotFound, msg: "cannot pick a random entry, no front entry at all")?
            }
            self.get_entry_by_title_idx(TitleIndex(rand::random::<u32>() % n))
        } else {
            let begin = self.inner.path_lookup.namespace_begin(b'A')?;
            let end = self.inner.path_lookup.namespace_end(b'A')?;
            if begin == end {
                err_at!(NotFound, msg: "cannot pick a random entry, empty namespace 'A'")?
            }
            let idx = begin + rand::random::<u32>() % (end - begin);
            self.get_entry_by_path_idx(EntryIndex(idx))
        }
    }

    /// `[begin, end)` of the path-ordered table covering exactly the
    /// entries whose path starts with `prefix`.
    pub fn find_by_path_prefix(&self, prefix: &str) -> Result<(EntryIndex, EntryIndex)> {
        if prefix.is_empty() || prefix == "/" {
            return Ok((self.inner.start_user, self.inner.end_user));
        }
        let (ns, key) = match self.inner.new_scheme {
            true => ('C', prefix),
            false => match parse_long_path(prefix) {
                Ok(parsed) => parsed,
                Err(_) => return Ok((EntryIndex(0), EntryIndex(0))),
            },
        };
        let begin = self.inner.path_lookup.find(ns as u8, key.as_bytes())?.1;
        let end = match key.is_empty() {
            true => self.inner.path_lookup.find(ns as u8 + 1, key.as_bytes())?.1,
            false => {
                let succ = key_successor(key);
                self.inner.path_lookup.find(ns as u8, &succ)?.1
            }
        };
        Ok((EntryIndex(begin), EntryIndex(end)))
    }

    /// `[begin, end)` of the title-ordered table covering exactly the
    /// entries whose title starts with `prefix`.
    pub fn find_by_title_prefix(&self, prefix: &str) -> Result<(TitleIndex, TitleIndex)> {
        let ns = match self.inner.new_scheme {
            true => b'C',
            false => b'A',
        };
        let begin = self.inner.title_lookup.find(ns, prefix.as_bytes())?.1;
        let end = match prefix.is_empty() {
            true => self.inner.title_lookup.find(ns + 1, b"")?.1,
            false => {
                let succ = key_successor(prefix);
                self.inner.title_lookup.find(ns, &succ)?.1
            }
        };
        Ok((TitleIndex(begin), TitleIndex(end)))
    }

    /// Iterate user entries in path order.
    pub fn iter_by_path(&self) -> PathIter {
        PathIter {
            inner: Arc::clone(&self.inner),
            cur: self.inner.start_user.0,
            end: self.inner.end_user.0,
        }
    }

    /// Iterate entries in title order: front articles when the archive
    /// has the dedicated listing, else the legacy equivalents.
    pub fn iter_by_title(&self) -> TitleIter {
        let (cur, end) = if self.inner.has_front_index {
            (0, self.inner.title.count().0)
        } else if !self.inner.new_scheme {
            let begin = self.inner.path_lookup.namespace_begin(b'A').unwrap_or(0);
            let end = self.inner.path_lookup.namespace_end(b'A').unwrap_or(begin);
            (begin, end)
        } else {
            (self.inner.start_user.0, self.inner.end_user.0)
        };
        TitleIter {
            inner: Arc::clone(&self.inner),
            cur,
            end,
        }
    }

    /// Iterate user entries in storage order, cheapest for bulk reads.
    pub fn iter_efficient(&self) -> Result<EfficientIter> {
        let order = self.inner.cluster_order()?;
        let end = order.len() as u32;
        Ok(EfficientIter {
            inner: Arc::clone(&self.inner),
            order,
            cur: 0,
            end,
        })
    }

    /// Iterate the entries whose path starts with `prefix`.
    pub fn entries_by_path_prefix(&self, prefix: &str) -> Result<PathIter> {
        let (begin, end) = self.find_by_path_prefix(prefix)?;
        Ok(PathIter {
            inner: Arc::clone(&self.inner),
            cur: begin.0,
            end: end.0,
        })
    }

    /// Iterate the entries whose title starts with `prefix`.
    pub fn entries_by_title_prefix(&self, prefix: &str) -> Result<TitleIter> {
        let (begin, end) = self.find_by_title_prefix(prefix)?;
        Ok(TitleIter {
            inner: Arc::clone(&self.inner),
            cur: begin.0,
            end: end.0,
        })
    }

    /// Metadata item `M/name`.
    pub fn metadata_item(&self, name: &str) -> Result<Item> {
        match self.inner.find_path('M', name)? {
            Some(idx) => Entry::new(Arc::clone(&self.inner), idx)?.item(true),
            None => err_at!(NotFound, msg: "cannot find metadata {:?}", name),
        }
    }

    /// Metadata value `M/name`.
    pub fn metadata(&self, name: &str) -> Result<Vec<u8>> {
        self.metadata_item(name)?.data()
    }

    /// All metadata keys, in path order.
    pub fn metadata_keys(&self) -> Result<Vec<String>> {
        let begin = self.inner.path_lookup.namespace_begin(b'M')?;
        let end = self.inner.path_lookup.namespace_end(b'M')?;
        let mut keys = vec![];
        for i in begin..end {
            let dirent = self.inner.direct.dirent(EntryIndex(i))?;
            keys.push(dirent.path().to_string());
        }
        Ok(keys)
    }

    /// The `size x size` illustration. For 48x48 requests, archives
    /// predating illustration metadata fall back to their favicon.
    pub fn illustration(&self, size: u32) -> Result<Item> {
        let name = format!("Illustration_{}x{}@1", size, size);
        if let Some(idx) = self.inner.find_path('M', &name)? {
            return Entry::new(Arc::clone(&self.inner), idx)?.item(false);
        }
        if size == 48 {
            for ns in ['-', 'I'] {
                for path in ["favicon", "favicon.png"] {
                    if let Some(idx) = self.inner.find_path(ns, path)? {
                        return Entry::new(Arc::clone(&self.inner), idx)?.item(true);
                    }
                }
            }
        }
        err_at!(NotFound, msg: "cannot find illustration item {}x{}", size, size)
    }

    pub fn has_illustration(&self, size: u32) -> bool {
        self.illustration(size).is_ok()
    }

    /// Square illustration sizes available in this archive.
    pub fn illustration_sizes(&self) -> Result<BTreeSet<u32>> {
        let mut sizes = BTreeSet::new();
        let mut idx = self.inner.path_lookup.find(b'M', b"Illustration_")?.1;
        while idx < self.inner.header.entry_count {
            let dirent = self.inner.direct.dirent(EntryIndex(idx))?;
            if dirent.namespace() != 'M' || !dirent.path().starts_with("Illustration_") {
                break;
            }
            if let Some(size) = parse_illustration_path(dirent.path()) {
                sizes.insert(size);
            }
            idx += 1;
        }
        if !sizes.contains(&48) && self.illustration(48).is_ok() {
            sizes.insert(48);
        }
        Ok(sizes)
    }

    /// Whether the archive embeds a xapian fulltext index.
    pub fn has_fulltext_index(&self) -> bool {
        let idx = match self.inner.find_path('X', "fulltext/xapian") {
            Ok(Some(idx)) => Some(idx),
            _ => match self.inner.find_path('Z', "/fulltextIndex/xapian") {
                Ok(idx) => idx,
                Err(_) => None,
            },
        };
        self.index_is_accessible(idx)
    }

    /// Whether the archive embeds a xapian title index.
    pub fn has_title_index(&self) -> bool {
        let idx = match self.inner.find_path('X', "title/xapian") {
            Ok(idx) => idx,
            Err(_) => None,
        };
        self.index_is_accessible(idx)
    }

    fn index_is_accessible(&self, idx: Option<EntryIndex>) -> bool {
        let idx = match idx {
            Some(idx) => idx,
            None => return false,
        };
        Entry::new(Arc::clone(&self.inner), idx)
            .and_then(|entry| entry.item(true))
            .and_then(|item| item.direct_access_information())
            .map(|info| info.is_some())
            .unwrap_or(false)
    }

    pub fn has_checksum(&self) -> bool {
        self.inner.header.has_checksum()
    }

    /// Stored MD5 checksum as a hex string.
    pub fn checksum(&self) -> Result<String> {
        if !self.has_checksum() {
            return Ok(String::new());
        }
        let mut buf = [0_u8; 16];
        self.inner
            .reader
            .read(&mut buf, Offset(self.inner.header.checksum_pos))?;
        Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Re-hash the archive and compare against the stored checksum.
    pub fn check(&self) -> bool {
        self.verify_checksum().unwrap_or(false)
    }

    pub(crate) fn verify_checksum(&self) -> Result<bool> {
        if !self.has_checksum() {
            return Ok(false);
        }
        let checksum_pos = self.inner.header.checksum_pos;

        let mut ctx = Md5::new();
        let mut pos = 0_u64;
        let mut chunk = vec![0_u8; 64 * 1024];
        while pos < checksum_pos {
            let n = cmp::min(chunk.len() as u64, checksum_pos - pos) as usize;
            self.inner.reader.read(&mut chunk[..n], Offset(pos))?;
            ctx.input(&chunk[..n]);
            pos += n as u64;
        }
        let digest = ctx.result();

        let mut stored = [0_u8; 16];
        self.inner.reader.read(&mut stored, Offset(checksum_pos))?;
        Ok(digest[..] == stored[..])
    }

    /// Run one integrity check; diagnostics go to the log.
    pub fn check_integrity(&self, check: crate::check::IntegrityCheck) -> Result<bool> {
        crate::check::check_integrity(self, check)
    }

    pub fn cluster_cache_max(&self) -> usize {
        self.inner.cluster_cache.max()
    }

    pub fn set_cluster_cache_max(&self, nb_clusters: usize) {
        self.inner.cluster_cache.set_max(nb_clusters)
    }

    pub fn dirent_cache_max(&self) -> usize {
        self.inner.direct.cache_max()
    }

    pub fn set_dirent_cache_max(&self, nb_dirents: usize) {
        self.inner.direct.set_cache_max(nb_dirents)
    }
}

// "Illustration_<w>x<h>@1" to its size, square illustrations only.
fn parse_illustration_path(path: &str) -> Option<u32> {
    let rest = path.strip_prefix("Illustration_")?;
    let (dims, _scale) = rest.split_at(rest.find('@')?);
    let mut parts = dims.split('x');
    let w: u32 = parts.next()?.parse().ok()?;
    let h: u32 = parts.next()?.parse().ok()?;
    match parts.next().is_none() && w == h {
        true => Some(w),
        false => None,
    }
}

#[cfg(test)]
#[path = "archive_test.rs"]
mod archive_test;
