//! Module `suggest` implement the title-based suggestion facade.
//!
//! Full suggestion quality comes from the external xapian title index;
//! this facade is the in-archive fallback that serves title-prefix
//! ranges out of the title-ordered table. It only consumes dirent and
//! blob data, nothing else of the search stack lives here.

use crate::{archive::Archive, entry::Entry, Result};

/// Suggestion engine over one archive.
pub struct SuggestionSearcher {
    archive: Archive,
}

/// One suggestion: the matched entry and its display title.
pub struct Suggestion {
    entry: Entry,
}

impl Suggestion {
    pub fn title(&self) -> String {
        self.entry.title()
    }

    pub fn path(&self) -> String {
        self.entry.path()
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl SuggestionSearcher {
    pub fn new(archive: Archive) -> SuggestionSearcher {
        SuggestionSearcher { archive }
    }

    pub fn as_archive(&self) -> &Archive {
        &self.archive
    }

    /// Number of entries whose title starts with `query`.
    pub fn estimated_matches(&self, query: &str) -> Result<u32> {
        let (begin, end) = self.archive.find_by_title_prefix(query)?;
        Ok(end - begin)
    }

    /// Up to `count` suggestions for `query`, in title order. Redirects
    /// are kept as-is; callers resolve them when showing content.
    pub fn suggest(&self, query: &str, count: usize) -> Result<Vec<Suggestion>> {
        let mut suggestions = vec![];
        for entry in self.archive.entries_by_title_prefix(query)?.take(count) {
            suggestions.push(Suggestion { entry: entry? });
        }
        Ok(suggestions)
    }
}
