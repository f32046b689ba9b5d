//! Package implement the archive writer.
//!
//! Use the [Creator] type to build a new archive. Items and redirects
//! are accepted on the caller's thread, batched into size-bounded
//! clusters and compressed on a worker pool while a single writer
//! thread appends finished clusters to the output file. Finalization
//! resolves redirects, assigns entry indexes in path order, remaps
//! mimetypes, emits the synthesized listings and counter, writes the
//! header and pointer tables, checksums the file and atomically renames
//! it into place.
//!
//! ```ignore
//! let mut creator = Creator::new();
//! creator.start_zim_creation("out.zim")?;
//! creator.add_item(StringItem::new("foo", "Foo", "text/html", hints, "..."))?;
//! creator.set_main_path("foo")?;
//! creator.finish_zim_creation()?;
//! ```

use log::{info, warn};
use md5::{Digest, Md5};

use std::{
    collections::{BTreeMap, HashMap},
    ffi, fs,
    io::{Read, Seek, SeekFrom},
    mem, path,
    sync::{atomic::Ordering::SeqCst, Arc, Mutex},
    time,
};

use crate::{
    archive::{Header, HEADER_SIZE, MAJOR_VERSION, MINOR_VERSION, ZIM_MAGIC},
    cluster::Compression,
    err_at, read_file, util,
    util::thread::{Thread, Tx},
    write_file, Error, Result,
};

mod cluster;
mod dirent;
mod handlers;
mod provider;
mod workers;

pub use provider::{ContentProvider, FileProvider, StringProvider};

use cluster::{ClusterBuilder, ClusterHandle};
use dirent::{DirentId, DirentInfo, DirentPool, Ns, WriterDirent};
use handlers::{CounterHandler, DirentHandler, HandlerSpec, TitleListingHandler};
use workers::{cluster_writer, Workers, MAX_QUEUE_SIZE};

/// Default target size for a cluster's uncompressed data.
pub const DEFAULT_CLUSTER_SIZE: u64 = 2 * 1024 * 1024;

// space reserved for the header and the mimetype list.
const CLUSTER_BASE_OFFSET: u64 = 1024;

/// Per-entry hint keys a caller can attach to items and redirects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HintKey {
    /// Force the entry into compressed (1) or uncompressed (0)
    /// clusters, overriding the mimetype heuristic.
    Compress,
    /// Mark the entry for the front-article listing.
    FrontArticle,
}

/// Hints: an enumerated key to unsigned value mapping.
pub type Hints = HashMap<HintKey, u64>;

/// Whether content of `mimetype` is worth routing into compressed
/// clusters.
pub fn is_compressible_mimetype(mimetype: &str) -> bool {
    mimetype.starts_with("text")
        || mimetype.contains("+xml")
        || mimetype.contains("+json")
        || mimetype == "application/javascript"
        || mimetype == "application/json"
}

/// One user entry to be added to the archive.
pub trait Item {
    fn path(&self) -> String;
    fn title(&self) -> String;
    fn mimetype(&self) -> String;
    fn hints(&self) -> Hints {
        Hints::new()
    }
    /// Hand over the content source; called exactly once.
    fn content_provider(&mut self) -> Result<Box<dyn ContentProvider>>;
}

/// Item fed from an in-memory byte string.
pub struct StringItem {
    path: String,
    title: String,
    mimetype: String,
    hints: Hints,
    data: Option<Vec<u8>>,
}

impl StringItem {
    pub fn new<T>(path: &str, title: &str, mimetype: &str, hints: Hints, data: T) -> Box<StringItem>
    where
        T: Into<Vec<u8>>,
    {
        Box::new(StringItem {
            path: path.to_string(),
            title: title.to_string(),
            mimetype: mimetype.to_string(),
            hints,
            data: Some(data.into()),
        })
    }
}

impl Item for StringItem {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn mimetype(&self) -> String {
        self.mimetype.clone()
    }

    fn hints(&self) -> Hints {
        self.hints.clone()
    }

    fn content_provider(&mut self) -> Result<Box<dyn ContentProvider>> {
        match self.data.take() {
            Some(data) => Ok(Box::new(StringProvider::new(data))),
            None => err_at!(Fatal, msg: "content provider for {} taken twice", self.path),
        }
    }
}

/// Item fed from a file on disk.
pub struct FileItem {
    path: String,
    title: String,
    mimetype: String,
    hints: Hints,
    loc: ffi::OsString,
}

impl FileItem {
    pub fn new(
        path: &str,
        title: &str,
        mimetype: &str,
        hints: Hints,
        loc: &ffi::OsStr,
    ) -> Box<FileItem> {
        Box::new(FileItem {
            path: path.to_string(),
            title: title.to_string(),
            mimetype: mimetype.to_string(),
            hints,
            loc: loc.to_os_string(),
        })
    }
}

impl Item for FileItem {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn mimetype(&self) -> String {
        self.mimetype.clone()
    }

    fn hints(&self) -> Hints {
        self.hints.clone()
    }

    fn content_provider(&mut self) -> Result<Box<dyn ContentProvider>> {
        Ok(Box::new(FileProvider::new(&self.loc)?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    NotStarted,
    Started,
    Finished,
}

/// Archive writer. Configure, start, feed entries, finish.
pub struct Creator {
    verbose: bool,
    compression: Compression,
    level: i32,
    cluster_size: u64,
    with_index: bool,
    index_language: String,
    nb_workers: usize,
    uuid: [u8; 16],
    main_path: Option<String>,
    state: State,
    data: Option<CreatorData>,
}

impl Default for Creator {
    fn default() -> Creator {
        Creator::new()
    }
}

impl Creator {
    pub fn new() -> Creator {
        Creator {
            verbose: false,
            compression: Compression::Zstd,
            level: 3,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            with_index: false,
            index_language: String::new(),
            nb_workers: num_cpus::get(),
            uuid: random_uuid(),
            main_path: None,
            state: State::NotStarted,
            data: None,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Compression for compressible clusters. Zstd is the default;
    /// Lzma is deprecated and None stores clusters raw.
    pub fn set_compression(&mut self, compression: Compression, level: i32) -> Result<&mut Self> {
        match compression {
            Compression::Zstd | Compression::None => (),
            Compression::Lzma => {
                warn!(
                    target: "zimw  ",
                    "LZMA compression method is deprecated, support for it will be dropped"
                );
            }
            _ => err_at!(InvalidInput, msg: "cannot write {:?} clusters", compression)?,
        }
        self.compression = compression;
        self.level = level;
        Ok(self)
    }

    pub fn set_cluster_size(&mut self, size: u64) -> &mut Self {
        self.cluster_size = size;
        self
    }

    /// Request fulltext/title indexing. The xapian indexers plug in as
    /// dirent handlers and are not bundled with this package.
    pub fn set_indexing(&mut self, indexing: bool, language: &str) -> &mut Self {
        self.with_index = indexing;
        self.index_language = language.to_string();
        self
    }

    pub fn set_nb_workers(&mut self, nb_workers: usize) -> &mut Self {
        self.nb_workers = nb_workers;
        self
    }

    pub fn set_uuid(&mut self, uuid: [u8; 16]) -> &mut Self {
        self.uuid = uuid;
        self
    }

    /// Path (in the content namespace) of the archive's main entry; a
    /// `W/mainPage` redirect to it is synthesized at finalize time.
    pub fn set_main_path(&mut self, main_path: &str) -> Result<&mut Self> {
        match self.state {
            State::Finished => err_at!(InvalidInput, msg: "creator already finished")?,
            _ => self.main_path = Some(main_path.to_string()),
        }
        Ok(self)
    }

    /// Open `path + ".tmp"` for writing and spawn the worker pool and
    /// the writer thread.
    pub fn start_zim_creation<P>(&mut self, path: P) -> Result<()>
    where
        P: AsRef<path::Path>,
    {
        if self.state != State::NotStarted {
            err_at!(InvalidInput, msg: "creator already started")?
        }

        let zim_loc = path.as_ref().as_os_str().to_os_string();
        let mut tmp_loc = zim_loc.clone();
        tmp_loc.push(".tmp");

        let fd = match util::create_file_rw(&tmp_loc) {
            Ok(mut fd) => {
                err_at!(IOError, fd.seek(SeekFrom::Start(CLUSTER_BASE_OFFSET)))?;
                fd
            }
            Err(err) => err_at!(ResourceFail, msg: "cannot create {:?}: {}", tmp_loc, err)?,
        };

        let fail: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

        let workers = Workers::new(self.nb_workers, Arc::clone(&fail));

        let writer_fail = Arc::clone(&fail);
        let writer_th = Thread::new_sync("zim-writer", MAX_QUEUE_SIZE, move |rx| {
            move || cluster_writer(fd, rx, writer_fail, CLUSTER_BASE_OFFSET)
        });
        let writer_tx = writer_th.to_tx();

        if self.with_index {
            info!(
                target: "zimw  ",
                "indexing requested for language {:?}; the xapian handlers attach externally",
                self.index_language
            );
        }

        let mut handlers: Vec<Box<dyn DirentHandler>> =
            vec![Box::new(TitleListingHandler::new()), Box::new(CounterHandler::new())];
        for handler in handlers.iter_mut() {
            handler.start();
        }

        self.data = Some(CreatorData {
            zim_loc,
            tmp_loc,
            pool: DirentPool::new(),
            by_path: BTreeMap::new(),
            unresolved: Vec::new(),
            main_dirent: None,
            mime_types: Vec::new(),
            mime_index: HashMap::new(),
            comp_builder: Some(ClusterBuilder::new(self.compression, self.level)),
            uncomp_builder: Some(ClusterBuilder::new(Compression::None, self.level)),
            clusters: Vec::new(),
            writer_tx: Some(writer_tx),
            workers,
            writer_th: Some(writer_th),
            fail,
            handlers,
            title_handler: 0,
            v0_capture: None,
            compression: self.compression,
            level: self.level,
            cluster_size: self.cluster_size,
            verbose: self.verbose,
            nb_items: 0,
            nb_redirects: 0,
            start_time: time::SystemTime::now(),
        });
        self.state = State::Started;
        Ok(())
    }

    fn started_data(&mut self) -> Result<&mut CreatorData> {
        match (self.state, self.data.as_mut()) {
            (State::Started, Some(data)) => Ok(data),
            _ => err_at!(InvalidInput, msg: "creator not started"),
        }
    }

    /// Add one content entry.
    pub fn add_item(&mut self, item: Box<dyn Item>) -> Result<()> {
        let verbose = self.verbose;
        let data = self.started_data()?;
        data.check_fail()?;

        let mut item = item;
        let (path, title, hints) = (item.path(), item.title(), item.hints());
        let mut mimetype = item.mimetype();
        if mimetype.is_empty() {
            warn!(target: "zimw  ", "{:?} has an empty mimetype", path);
            mimetype = "application/octet-stream".to_string();
        }

        let mime_idx = data.get_mime_idx(&mimetype)?;
        let dirent = WriterDirent::new_item(Ns::C, &path, &title, mime_idx)?;
        let id = data.add_dirent(dirent)?;

        let provider = item.content_provider()?;
        let compress = match hints.get(&HintKey::Compress) {
            Some(v) => *v != 0,
            None => is_compressible_mimetype(&mimetype),
        };
        data.add_item_data(id, provider, compress)?;

        data.nb_items += 1;
        data.notify_handlers(id, Some(mimetype.as_str()), &hints);
        if verbose && data.nb_items % 1000 == 0 {
            data.progress();
        }
        Ok(())
    }

    /// Add a redirect from `path` to `target_path`; the target is
    /// resolved at finalize time and dangling redirects are dropped.
    pub fn add_redirection(
        &mut self,
        path: &str,
        title: &str,
        target_path: &str,
        hints: Hints,
    ) -> Result<()> {
        let data = self.started_data()?;
        data.check_fail()?;

        let dirent = WriterDirent::new_redirect(Ns::C, path, title, Ns::C, target_path)?;
        let id = data.add_dirent(dirent)?;
        data.notify_handlers(id, None, &hints);
        Ok(())
    }

    /// Add a metadata value under `M/name`.
    pub fn add_metadata<T>(&mut self, name: &str, content: T) -> Result<()>
    where
        T: Into<Vec<u8>>,
    {
        let provider = Box::new(StringProvider::new(content));
        self.add_metadata_provider(name, provider, "text/plain;charset=utf-8")
    }

    /// Add a metadata entry with an explicit provider and mimetype.
    pub fn add_metadata_provider(
        &mut self,
        name: &str,
        provider: Box<dyn ContentProvider>,
        mimetype: &str,
    ) -> Result<()> {
        let data = self.started_data()?;
        data.check_fail()?;

        let mime_idx = data.get_mime_idx(mimetype)?;
        let dirent = WriterDirent::new_item(Ns::M, name, "", mime_idx)?;
        let id = data.add_dirent(dirent)?;
        data.add_item_data(id, provider, is_compressible_mimetype(mimetype))?;
        data.notify_handlers(id, None, &Hints::new());
        Ok(())
    }

    /// Add the `size x size` illustration, a PNG under
    /// `M/Illustration_<s>x<s>@1`.
    pub fn add_illustration<T>(&mut self, size: u32, content: T) -> Result<()>
    where
        T: Into<Vec<u8>>,
    {
        let name = format!("Illustration_{}x{}@1", size, size);
        let provider = Box::new(StringProvider::new(content));
        self.add_metadata_provider(&name, provider, "image/png")
    }

    /// Add `path` as another name for `target_path`'s content; the two
    /// entries share one blob.
    pub fn add_alias(&mut self, path: &str, title: &str, target_path: &str, hints: Hints) -> Result<()> {
        let data = self.started_data()?;
        data.check_fail()?;

        let target_id = match data.by_path.get(&(Ns::C, target_path.to_string())) {
            Some(id) => *id,
            None => err_at!(InvalidEntry, msg: "alias target {:?} not found", target_path)?,
        };
        let dirent = WriterDirent::new_alias(path, title, data.pool.get(target_id))?;
        let id = data.add_dirent(dirent)?;
        data.notify_handlers(id, None, &hints);
        Ok(())
    }

    /// Finalize the archive: resolve, index, emit and rename into
    /// place. Any error parked by a background thread re-raises here.
    pub fn finish_zim_creation(&mut self) -> Result<()> {
        if self.state != State::Started {
            err_at!(InvalidInput, msg: "creator not started")?
        }
        self.state = State::Finished;
        let mut data = self.data.take().unwrap();

        let res = finish(&mut data, self.uuid, self.main_path.as_deref());
        match res {
            Ok(()) => {
                // tmp file was renamed; nothing left to clean up.
                data.tmp_loc = ffi::OsString::new();
                Ok(())
            }
            Err(err) => Err(err), // dropping data removes the tmp file
        }
    }
}

fn random_uuid() -> [u8; 16] {
    let mut uuid: [u8; 16] = rand::random();
    // RFC 4122 version 4, variant 1.
    uuid[6] = (uuid[6] & 0x0f) | 0x40;
    uuid[8] = (uuid[8] & 0x3f) | 0x80;
    uuid
}

struct CreatorData {
    zim_loc: ffi::OsString,
    tmp_loc: ffi::OsString,
    pool: DirentPool,
    by_path: BTreeMap<(Ns, String), DirentId>,
    unresolved: Vec<DirentId>,
    main_dirent: Option<DirentId>,
    mime_types: Vec<String>,
    mime_index: HashMap<String, u16>,
    comp_builder: Option<ClusterBuilder>,
    uncomp_builder: Option<ClusterBuilder>,
    clusters: Vec<Arc<ClusterHandle>>,
    // drop order matters: the writer tx must close before the worker
    // pool drains and the writer thread joins.
    writer_tx: Option<Tx<Arc<ClusterHandle>, ()>>,
    workers: Workers,
    writer_th: Option<Thread<Arc<ClusterHandle>, (), Result<(fs::File, u64)>>>,
    fail: Arc<Mutex<Option<Error>>>,
    handlers: Vec<Box<dyn DirentHandler>>,
    title_handler: usize,
    v0_capture: Option<(Arc<ClusterHandle>, u64)>,
    compression: Compression,
    level: i32,
    cluster_size: u64,
    verbose: bool,
    nb_items: u64,
    nb_redirects: u64,
    start_time: time::SystemTime,
}

impl Drop for CreatorData {
    fn drop(&mut self) {
        if !self.tmp_loc.is_empty() {
            fs::remove_file(&self.tmp_loc).ok();
        }
    }
}

impl CreatorData {
    fn check_fail(&self) -> Result<()> {
        match self.fail.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn progress(&self) {
        let seconds = self
            .start_time
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or(0);
        info!(
            target: "zimw  ",
            "T:{}; A:{}; RA:{}; C:{}", seconds, self.pool.len(), self.nb_redirects,
            self.clusters.len()
        );
    }

    fn get_mime_idx(&mut self, mimetype: &str) -> Result<u16> {
        if let Some(idx) = self.mime_index.get(mimetype) {
            return Ok(*idx);
        }
        let idx = self.mime_types.len();
        // the topmost u16 codes are reserved dirent markers.
        if idx >= 0xfffd {
            err_at!(InvalidEntry, msg: "too many distinct mime types")?
        }
        self.mime_types.push(mimetype.to_string());
        self.mime_index.insert(mimetype.to_string(), idx as u16);
        Ok(idx as u16)
    }

    fn add_dirent(&mut self, dirent: WriterDirent) -> Result<DirentId> {
        let key = (dirent.ns, dirent.path().to_string());
        let is_redirect = dirent.is_redirect();

        if let Some(&existing) = self.by_path.get(&key) {
            let existing_redirect = self.pool.get(existing).is_redirect();
            match existing_redirect && !is_redirect {
                // a real item displaces a redirect squatting its path.
                true => {
                    self.pool.get_mut(existing).removed = true;
                    self.unresolved.retain(|id| *id != existing);
                }
                false => err_at!(
                    InvalidEntry, msg: "impossible to add {}/{}, duplicate path",
                    key.0.as_char(), key.1
                )?,
            }
        }

        let id = self.pool.alloc(dirent);
        self.by_path.insert(key, id);
        if is_redirect {
            self.unresolved.push(id);
            self.nb_redirects += 1;
        }
        Ok(id)
    }

    fn notify_handlers(&mut self, id: DirentId, mimetype: Option<&str>, hints: &Hints) {
        let mut handlers = mem::take(&mut self.handlers);
        for handler in handlers.iter_mut() {
            handler.handle(id, &mut self.pool, mimetype, hints);
        }
        self.handlers = handlers;
    }

    fn add_item_data(
        &mut self,
        id: DirentId,
        provider: Box<dyn ContentProvider>,
        compress: bool,
    ) -> Result<()> {
        let size = provider.size();

        let need_close = {
            let builder = match compress {
                true => self.comp_builder.as_ref(),
                false => self.uncomp_builder.as_ref(),
            }
            .unwrap();
            builder.count() > 0 && builder.size() + size >= self.cluster_size
        };
        if need_close {
            self.close_cluster(compress)?;
        }

        let builder = match compress {
            true => self.comp_builder.as_mut(),
            false => self.uncomp_builder.as_mut(),
        }
        .unwrap();
        let blob = builder.add_content(provider);
        let handle = builder.handle();

        match &mut self.pool.get_mut(id).info {
            DirentInfo::Direct { cluster, blob: b } => {
                *cluster = Some(handle);
                *b = blob;
                Ok(())
            }
            _ => err_at!(Fatal, msg: "adding item data to a redirect dirent"),
        }
    }

    // hand the full builder to the background threads, and open a fresh
    // one of the same compression class.
    fn close_cluster(&mut self, compress: bool) -> Result<()> {
        let replacement = match compress {
            true => ClusterBuilder::new(self.compression, self.level),
            false => ClusterBuilder::new(Compression::None, self.level),
        };
        let slot = match compress {
            true => &mut self.comp_builder,
            false => &mut self.uncomp_builder,
        };
        let builder = mem::replace(slot, Some(replacement)).unwrap();

        let handle = builder.close(self.clusters.len() as u32);
        self.clusters.push(Arc::clone(&handle));
        self.workers.post(Arc::clone(&handle))?;
        self.writer_tx.as_ref().unwrap().post(handle)?;
        Ok(())
    }
}

fn finish(data: &mut CreatorData, uuid: [u8; 16], main_path: Option<&str>) -> Result<()> {
    data.check_fail()?;

    // the main-page redirect, like any other dirent, goes through the
    // handlers.
    if let Some(main_path) = main_path {
        let dirent = WriterDirent::new_redirect(Ns::W, "mainPage", "", Ns::C, main_path)?;
        let id = data.add_dirent(dirent)?;
        data.main_dirent = Some(id);
        data.notify_handlers(id, None, &Hints::new());
    }

    if data.verbose {
        data.progress();
    }

    // handlers contribute their own dirents; the title listing handler
    // is the one that must observe every dirent, its own included.
    let specs: Vec<Vec<HandlerSpec>> = data.handlers.iter().map(|h| h.specs()).collect();
    let mut handler_dirents: Vec<Vec<DirentId>> = Vec::with_capacity(specs.len());
    for specs in specs {
        let mut ids = vec![];
        for spec in specs {
            let mime_idx = data.get_mime_idx(&spec.mimetype)?;
            let dirent = WriterDirent::new_item(spec.ns, &spec.path, &spec.title, mime_idx)?;
            let id = data.add_dirent(dirent)?;
            ids.push(id);

            let mut handlers = mem::take(&mut data.handlers);
            let title_handler = data.title_handler;
            handlers[title_handler].handle(id, &mut data.pool, None, &Hints::new());
            data.handlers = handlers;
        }
        handler_dirents.push(ids);
    }

    info!(target: "zimw  ", "resolve redirect indexes");
    let unresolved = mem::take(&mut data.unresolved);
    for id in unresolved {
        let (target_ns, target) = match &data.pool.get(id).info {
            DirentInfo::Redirect { ns, target } => (*ns, target.clone()),
            _ => continue,
        };
        match data.by_path.get(&(target_ns, target.clone())) {
            Some(&target_id) => {
                data.pool.get_mut(id).info = DirentInfo::Resolved { target: target_id };
            }
            None => {
                let dirent = data.pool.get(id);
                info!(
                    target: "zimw  ",
                    "invalid redirection {}/{} to missing {}/{}",
                    dirent.ns.as_char(), dirent.path(), target_ns.as_char(), target
                );
                let key = (dirent.ns, dirent.path().to_string());
                data.by_path.remove(&key);
                data.pool.get_mut(id).removed = true;
                if data.main_dirent == Some(id) {
                    data.main_dirent = None;
                }
            }
        }
    }

    info!(target: "zimw  ", "set entry indexes");
    let ordered: Vec<DirentId> = data.by_path.values().copied().collect();
    for (i, id) in ordered.iter().enumerate() {
        data.pool.get_mut(*id).idx = i as u32;
    }

    info!(target: "zimw  ", "resolve mime types");
    let mut sorted = data.mime_types.clone();
    sorted.sort();
    let mapping: Vec<u16> = data
        .mime_types
        .iter()
        .map(|m| sorted.iter().position(|s| s == m).unwrap() as u16)
        .collect();
    for id in ordered.iter() {
        let dirent = data.pool.get_mut(*id);
        if dirent.is_item() {
            dirent.mimetype = mapping[dirent.mimetype as usize];
        }
    }
    data.mime_types = sorted;

    let mime_bytes: u64 = data.mime_types.iter().map(|m| m.len() as u64 + 1).sum::<u64>() + 1;
    if HEADER_SIZE + mime_bytes > CLUSTER_BASE_OFFSET {
        err_at!(
            InvalidEntry, msg: "mime-type list of {} bytes does not fit the header gap",
            mime_bytes
        )?
    }

    // stop the handlers and feed their content like user items. The
    // title listing's blob offset must be captured before its cluster
    // closes, the legacy titleIdxPos header field points into it.
    let mut handlers = mem::take(&mut data.handlers);
    for handler in handlers.iter_mut() {
        handler.stop(&data.pool);
    }
    for (hi, handler) in handlers.iter().enumerate() {
        let ids = &handler_dirents[hi];
        if ids.is_empty() {
            continue;
        }
        let providers = handler.providers(&data.pool);
        for (id, provider) in ids.iter().zip(providers.into_iter()) {
            data.add_item_data(*id, provider, handler.compressible())?;
            if hi == data.title_handler && data.v0_capture.is_none() {
                let blob = match &data.pool.get(*id).info {
                    DirentInfo::Direct { blob, .. } => *blob,
                    _ => unreachable!(),
                };
                let builder = data.uncomp_builder.as_ref().unwrap();
                data.v0_capture = Some((builder.handle(), builder.blob_offset(blob)));
            }
        }
    }
    data.handlers = handlers;

    // all data is in, close whatever is still open.
    if data.comp_builder.as_ref().unwrap().count() > 0 {
        data.close_cluster(true)?;
    }
    if data.uncomp_builder.as_ref().unwrap().count() > 0 {
        data.close_cluster(false)?;
    }

    info!(target: "zimw  ", "waiting for workers");
    data.workers.close_wait()?;
    mem::drop(data.writer_tx.take());
    let (mut fd, fpos) = data.writer_th.take().unwrap().join()??;
    data.check_fail()?;

    info!(
        target: "zimw  ",
        "{} entries, {} clusters created", ordered.len(), data.clusters.len()
    );

    write_last_parts(data, &mut fd, fpos, uuid, &ordered)?;
    err_at!(IOError, fd.sync_all())?;
    mem::drop(fd);

    err_at!(
        IOError,
        fs::rename(&data.tmp_loc, &data.zim_loc),
        "renaming {:?}",
        data.tmp_loc
    )?;
    info!(target: "zimw  ", "finished {:?}", data.zim_loc);
    Ok(())
}

fn encode_writer_dirent(dirent: &WriterDirent, pool: &DirentPool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + dirent.path().len() + 2);
    match &dirent.info {
        DirentInfo::Resolved { target } => {
            buf.extend_from_slice(&0xffff_u16.to_le_bytes());
            buf.push(0); // parameter-length
            buf.push(dirent.ns.as_char() as u8);
            buf.extend_from_slice(&0_u32.to_le_bytes()); // version
            buf.extend_from_slice(&pool.get(*target).idx.to_le_bytes());
        }
        DirentInfo::Direct { cluster, blob } => {
            buf.extend_from_slice(&dirent.mimetype.to_le_bytes());
            buf.push(0);
            buf.push(dirent.ns.as_char() as u8);
            buf.extend_from_slice(&0_u32.to_le_bytes());
            let cluster_idx = cluster.as_ref().map(|h| h.to_index()).unwrap_or(0);
            buf.extend_from_slice(&cluster_idx.to_le_bytes());
            buf.extend_from_slice(&blob.to_le_bytes());
        }
        DirentInfo::Redirect { .. } => unreachable!(),
    }
    buf.extend_from_slice(dirent.path().as_bytes());
    buf.push(0);
    let stored_title = dirent.path_title.stored_title();
    buf.extend_from_slice(stored_title.as_bytes());
    buf.push(0);
    buf
}

fn write_last_parts(
    data: &mut CreatorData,
    fd: &mut fs::File,
    end_of_clusters: u64,
    uuid: [u8; 16],
    ordered: &[DirentId],
) -> Result<()> {
    info!(target: "zimw  ", "write mimetype list");
    err_at!(IOError, fd.seek(SeekFrom::Start(HEADER_SIZE)))?;
    for mimetype in data.mime_types.iter() {
        write_file!(fd, mimetype.as_bytes(), &data.tmp_loc, "writing mimetype")?;
        write_file!(fd, &[0_u8], &data.tmp_loc, "writing mimetype")?;
    }
    write_file!(fd, &[0_u8], &data.tmp_loc, "writing mimetype")?;

    info!(target: "zimw  ", "write directory entries");
    let mut pos = err_at!(IOError, fd.seek(SeekFrom::Start(end_of_clusters)))?;
    for id in ordered.iter() {
        let bytes = encode_writer_dirent(data.pool.get(*id), &data.pool);
        data.pool.get_mut(*id).offset = pos;
        write_file!(fd, &bytes, &data.tmp_loc, "writing dirent")?;
        pos += bytes.len() as u64;
    }

    info!(target: "zimw  ", "write path pointer list");
    let path_ptr_pos = pos;
    for id in ordered.iter() {
        write_file!(
            fd,
            &data.pool.get(*id).offset.to_le_bytes(),
            &data.tmp_loc,
            "writing path pointer"
        )?;
        pos += 8;
    }

    info!(target: "zimw  ", "write cluster offset list");
    let cluster_ptr_pos = pos;
    for handle in data.clusters.iter() {
        write_file!(
            fd,
            &handle.to_offset().to_le_bytes(),
            &data.tmp_loc,
            "writing cluster pointer"
        )?;
        pos += 8;
    }

    let checksum_pos = pos;

    let title_idx_pos = match &data.v0_capture {
        Some((handle, blob_off)) => {
            handle.to_offset() + handle.data_offset.load(SeqCst) + blob_off
        }
        None => u64::MAX,
    };

    let header = Header {
        magic_number: ZIM_MAGIC,
        major_version: MAJOR_VERSION,
        minor_version: MINOR_VERSION,
        uuid,
        entry_count: ordered.len() as u32,
        cluster_count: data.clusters.len() as u32,
        path_ptr_pos,
        title_idx_pos,
        cluster_ptr_pos,
        mime_list_pos: HEADER_SIZE,
        main_page: data
            .main_dirent
            .map(|id| data.pool.get(id).idx)
            .unwrap_or(u32::MAX),
        layout_page: u32::MAX,
        checksum_pos,
    };

    info!(target: "zimw  ", "write header");
    err_at!(IOError, fd.seek(SeekFrom::Start(0)))?;
    write_file!(fd, &header.to_bytes(), &data.tmp_loc, "writing header")?;

    info!(target: "zimw  ", "write checksum");
    let mut ctx = Md5::new();
    let mut hashed = 0_u64;
    err_at!(IOError, fd.seek(SeekFrom::Start(0)))?;
    while hashed < checksum_pos {
        let n = std::cmp::min(64 * 1024, checksum_pos - hashed);
        let chunk = read_file!(fd, SeekFrom::Start(hashed), n, "hashing for checksum")?;
        ctx.input(&chunk);
        hashed += n;
    }
    let digest = ctx.result();
    err_at!(IOError, fd.seek(SeekFrom::Start(checksum_pos)))?;
    write_file!(fd, &digest[..], &data.tmp_loc, "writing checksum")?;

    Ok(())
}
