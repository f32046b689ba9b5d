//! Zimf provide read and write access to [ZIM] archives, the container
//! format used to store wikis and other web content for offline use.
//!
//! A ZIM archive is a read-optimized single file: a directory of named
//! entries, sorted by path and by title, whose payloads are grouped into
//! optionally compressed clusters. Entries either carry content (items)
//! or point to another entry (redirects).
//!
//! Reading is done through the [Archive] type. Archive handles are cheap
//! to clone and can be shared across threads; dirents and clusters are
//! fetched lazily and held in bounded LRU caches.
//!
//! ```ignore
//! let archive = zimf::Archive::open("wikipedia.zim")?;
//! let entry = archive.get_entry_by_path("A/Ray_Charles")?;
//! let data = entry.item(true)?.data()?;
//! ```
//!
//! Writing is done through the [creator::Creator] type, which consumes a
//! stream of items and redirects, compresses clusters on a worker pool
//! and emits the final archive along with its synthesized listings,
//! counter and checksum.
//!
//! [ZIM]: https://openzim.org/wiki/ZIM_file_format

use std::result;

#[macro_use]
pub mod util;

mod accessor;
mod archive;
mod cache;
mod cluster;
mod counter;
mod dirent;
mod entry;
mod error;
mod lookup;
mod parts;
mod reader;
mod types;

pub mod check;
pub mod creator;
pub mod fuzzy;
pub mod suggest;

pub use crate::archive::{
    Archive, Header, MAJOR_VERSION, MAJOR_VERSION_OLD, MINOR_VERSION, NAMESPACES_OLD_CONTENT,
    ZIM_MAGIC,
};
pub use crate::cluster::Compression;
pub use crate::counter::{count_mimetype, parse_mimetype_counter, MimeCounter};
pub use crate::entry::{EfficientIter, Entry, Item, PathIter, TitleIter};
pub use crate::error::Error;
pub use crate::reader::Buffer;
pub use crate::types::{BlobIndex, ClusterIndex, EntryIndex, Offset, Size, TitleIndex};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;
