//! Module `handlers` implement the pluggable dirent handlers.
//!
//! A handler observes every user dirent as it is added and, at
//! finalize time, contributes its own dirents and content. The title
//! listing handler builds the title-ordered listings consumed by
//! readers; the counter handler aggregates item mimetypes into the
//! `M/Counter` metadata. The external fulltext/title indexers plug into
//! the same seam.

use std::collections::BTreeMap;

use crate::{
    creator::dirent::{DirentId, DirentPool, Ns},
    creator::provider::{ContentProvider, StringProvider},
    creator::{HintKey, Hints},
    Result,
};

pub(crate) const LISTING_MIMETYPE: &str = "application/octet-stream+zimlisting";

/// A dirent a handler wants added at finalize time.
pub(crate) struct HandlerSpec {
    pub(crate) ns: Ns,
    pub(crate) path: String,
    pub(crate) title: String,
    pub(crate) mimetype: String,
}

/// Observer of dirents that may synthesize entries of its own.
pub(crate) trait DirentHandler {
    fn start(&mut self) {}

    /// Observe one dirent. `mimetype` is set for user items only.
    fn handle(&mut self, id: DirentId, pool: &mut DirentPool, mimetype: Option<&str>, hints: &Hints);

    /// Dirents this handler contributes; resolved before indexes are
    /// assigned.
    fn specs(&self) -> Vec<HandlerSpec>;

    fn stop(&mut self, pool: &DirentPool);

    /// One content provider per spec, same order. Called after entry
    /// indexes are assigned.
    fn providers(&self, pool: &DirentPool) -> Vec<Box<dyn ContentProvider>>;

    /// Whether this handler's content belongs in compressed clusters.
    fn compressible(&self) -> bool;
}

// Emit entry indexes as little-endian u32 words.
struct ListingProvider {
    words: Vec<u32>,
    pos: usize,
}

impl ListingProvider {
    fn new(words: Vec<u32>) -> ListingProvider {
        ListingProvider { words, pos: 0 }
    }
}

impl ContentProvider for ListingProvider {
    fn size(&self) -> u64 {
        (self.words.len() * 4) as u64
    }

    fn feed(&mut self) -> Result<Vec<u8>> {
        let chunk: Vec<u8> = self.words[self.pos..]
            .iter()
            .take(1024)
            .flat_map(|w| w.to_le_bytes())
            .collect();
        self.pos = std::cmp::min(self.pos + 1024, self.words.len());
        Ok(chunk)
    }
}

/// Collects every dirent, orders them by title, and produces the
/// `X/listing/titleOrdered/v0` listing (plus `v1` when any entry was
/// flagged as a front article).
#[derive(Default)]
pub(crate) struct TitleListingHandler {
    handled: Vec<DirentId>,
    has_front_articles: bool,
}

impl TitleListingHandler {
    pub(crate) fn new() -> TitleListingHandler {
        TitleListingHandler::default()
    }
}

impl DirentHandler for TitleListingHandler {
    fn handle(&mut self, id: DirentId, pool: &mut DirentPool, _mimetype: Option<&str>, hints: &Hints) {
        self.handled.push(id);
        if hints.get(&HintKey::FrontArticle).copied().unwrap_or(0) != 0 {
            pool.get_mut(id).front_article = true;
            self.has_front_articles = true;
        }
    }

    fn specs(&self) -> Vec<HandlerSpec> {
        let mut specs = vec![HandlerSpec {
            ns: Ns::X,
            path: "listing/titleOrdered/v0".to_string(),
            title: String::new(),
            mimetype: LISTING_MIMETYPE.to_string(),
        }];
        if self.has_front_articles {
            specs.push(HandlerSpec {
                ns: Ns::X,
                path: "listing/titleOrdered/v1".to_string(),
                title: String::new(),
                mimetype: LISTING_MIMETYPE.to_string(),
            });
        }
        specs
    }

    fn stop(&mut self, pool: &DirentPool) {
        self.handled.retain(|id| !pool.get(*id).removed);
        // stable sort, ties keep insertion order.
        self.handled.sort_by(|a, b| {
            let (da, db) = (pool.get(*a), pool.get(*b));
            (da.ns, da.title()).cmp(&(db.ns, db.title()))
        });
    }

    fn providers(&self, pool: &DirentPool) -> Vec<Box<dyn ContentProvider>> {
        let full: Vec<u32> = self.handled.iter().map(|id| pool.get(*id).idx).collect();
        let mut providers: Vec<Box<dyn ContentProvider>> =
            vec![Box::new(ListingProvider::new(full))];
        if self.has_front_articles {
            let front: Vec<u32> = self
                .handled
                .iter()
                .filter(|id| pool.get(**id).front_article)
                .map(|id| pool.get(*id).idx)
                .collect();
            providers.push(Box::new(ListingProvider::new(front)));
        }
        providers
    }

    fn compressible(&self) -> bool {
        false
    }
}

/// Counts the mimetypes of user items and produces `M/Counter`.
#[derive(Default)]
pub(crate) struct CounterHandler {
    counts: BTreeMap<String, u64>,
}

impl CounterHandler {
    pub(crate) fn new() -> CounterHandler {
        CounterHandler::default()
    }
}

impl DirentHandler for CounterHandler {
    fn handle(&mut self, id: DirentId, pool: &mut DirentPool, mimetype: Option<&str>, _hints: &Hints) {
        let mimetype = match mimetype {
            Some(mimetype) if !mimetype.is_empty() => mimetype,
            _ => return,
        };
        if pool.get(id).ns != Ns::C {
            return;
        }
        *self.counts.entry(mimetype.to_string()).or_insert(0) += 1;
    }

    fn specs(&self) -> Vec<HandlerSpec> {
        vec![HandlerSpec {
            ns: Ns::M,
            path: "Counter".to_string(),
            title: String::new(),
            mimetype: "text/plain".to_string(),
        }]
    }

    fn stop(&mut self, _pool: &DirentPool) {}

    fn providers(&self, _pool: &DirentPool) -> Vec<Box<dyn ContentProvider>> {
        let body = self
            .counts
            .iter()
            .map(|(mime, count)| format!("{}={}", mime, count))
            .collect::<Vec<String>>()
            .join(";");
        vec![Box::new(StringProvider::new(body))]
    }

    fn compressible(&self) -> bool {
        true
    }
}
