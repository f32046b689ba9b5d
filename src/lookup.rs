//! Module `lookup` implement key lookup over the sorted dirent tables.
//!
//! Lookups binary-search the path- or title-ordered dirent sequence.
//! Since each probe decodes a dirent from storage, a sparse in-memory
//! [NarrowDown] grid of (pseudo-key, index) samples is consulted first
//! to restrict the search to a small dense range. Namespace boundary
//! indexes are resolved by their own binary search and cached.

use std::{
    cmp,
    cmp::Ordering,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    accessor::{DirectDirentAccessor, IndirectDirentAccessor},
    err_at, Error, Result,
};

/// A sorted dirent sequence that lookups can probe: path-ordered
/// (keyed by path) or title-ordered (keyed by title).
pub trait SortedDirents {
    fn count(&self) -> u32;

    /// (namespace-byte, key) of the i-th dirent in this sequence.
    fn ns_key(&self, i: u32) -> Result<(u8, String)>;

    /// Namespace-prefixed key of the i-th dirent, the grid's notion of
    /// a full key.
    fn full_key(&self, i: u32) -> Result<Vec<u8>> {
        let (ns, key) = self.ns_key(i)?;
        let mut full = Vec::with_capacity(key.len() + 1);
        full.push(ns);
        full.extend_from_slice(key.as_bytes());
        Ok(full)
    }
}

/// The path-ordered dirent sequence, keyed by path.
pub struct PathTable(pub Arc<DirectDirentAccessor>);

impl SortedDirents for PathTable {
    fn count(&self) -> u32 {
        self.0.count().0
    }

    fn ns_key(&self, i: u32) -> Result<(u8, String)> {
        let dirent = self.0.dirent(i.into())?;
        Ok((dirent.namespace() as u8, dirent.path().to_string()))
    }
}

/// The title-ordered dirent sequence, keyed by title.
pub struct TitleTable(pub Arc<IndirectDirentAccessor>);

impl SortedDirents for TitleTable {
    fn count(&self) -> u32 {
        self.0.count().0
    }

    fn ns_key(&self, i: u32) -> Result<(u8, String)> {
        let dirent = self.0.dirent(i.into())?;
        Ok((dirent.namespace() as u8, dirent.title().to_string()))
    }
}

/// Sparse in-memory sample of (pseudo-key, index) pairs over a sorted
/// external sequence. Pseudo-keys are shortened so that the grid stays
/// small: for each sampled item the shortest string sorting between it
/// and its successor is stored instead of the full key.
#[derive(Default)]
pub struct NarrowDown {
    entries: Vec<(Vec<u8>, u32)>,
}

impl NarrowDown {
    /// Shortest string `s` with `a < s <= b`, given `a < b`: `b`'s
    /// prefix through the first byte differing from `a`.
    pub fn shortest_between(a: &[u8], b: &[u8]) -> Vec<u8> {
        let minlen = cmp::min(a.len(), b.len());
        let mut m = 0;
        while m < minlen && a[m] == b[m] {
            m += 1;
        }
        b[..cmp::min(b.len(), m + 1)].to_vec()
    }

    fn add(&mut self, key: &[u8], i: u32, next_key: &[u8]) -> Result<()> {
        if key >= next_key {
            err_at!(
                InvalidFormat, msg: "dirent table is not sorted at {}: {:?} >= {:?}",
                i, key, next_key
            )?
        }
        if self.entries.is_empty() {
            self.entries.push((key.to_vec(), i));
            return Ok(());
        }
        let pseudo = Self::shortest_between(key, next_key);
        match self.entries.last() {
            Some((last, _)) if last.as_slice() >= pseudo.as_slice() => {
                err_at!(
                    InvalidFormat, msg: "dirent table is not sorted at {}: {:?}", i, key
                )
            }
            _ => {
                self.entries.push((pseudo, i));
                Ok(())
            }
        }
    }

    fn close(&mut self, key: &[u8], i: u32) {
        self.entries.push((key.to_vec(), i));
    }

    /// Narrow `key` down to a `[begin, end]` index range of the
    /// underlying sequence.
    pub fn range(&self, key: &[u8]) -> (u32, u32) {
        // position of the first entry strictly greater than `key`.
        let pos = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
        if pos == 0 {
            return (0, 0);
        }
        let prev = self.entries[pos - 1].1;
        if pos == self.entries.len() {
            (prev, prev + 1)
        } else {
            (prev, self.entries[pos].1 + 1)
        }
    }
}

/// Key lookup over a sorted dirent sequence. The fast variant narrows
/// binary searches through an in-memory grid; the plain variant probes
/// the whole range and tolerates duplicate keys (titles may repeat,
/// paths may not).
pub struct DirentLookup<T>
where
    T: SortedDirents,
{
    table: T,
    grid: Option<NarrowDown>,
    ns_cache: Mutex<HashMap<u8, u32>>,
}

impl<T> DirentLookup<T>
where
    T: SortedDirents,
{
    /// Plain lookup, no grid.
    pub fn new(table: T) -> DirentLookup<T> {
        DirentLookup {
            table,
            grid: None,
            ns_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build the lookup with a grid of roughly `grid_entries` samples.
    pub fn new_fast(table: T, grid_entries: u32) -> Result<DirentLookup<T>> {
        let count = table.count();
        let mut grid = NarrowDown::default();
        if count > 0 {
            let step = cmp::max(1, count / cmp::max(1, grid_entries));
            let mut i = 0;
            while i < count - 1 {
                grid.add(&table.full_key(i)?, i, &table.full_key(i + 1)?)?;
                i += step;
            }
            grid.close(&table.full_key(count - 1)?, count - 1);
        }

        Ok(DirentLookup {
            table,
            grid: Some(grid),
            ns_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn count(&self) -> u32 {
        self.table.count()
    }

    /// Smallest index whose dirent namespace is >= `ns`, cached.
    pub fn namespace_begin(&self, ns: u8) -> Result<u32> {
        check_namespace(ns)?;
        self.namespace_boundary(ns)
    }

    /// One past the largest index whose dirent namespace is `ns`.
    pub fn namespace_end(&self, ns: u8) -> Result<u32> {
        check_namespace(ns)?;
        self.namespace_boundary(ns + 1)
    }

    fn namespace_boundary(&self, ns: u8) -> Result<u32> {
        if let Some(idx) = self.ns_cache.lock().unwrap().get(&ns) {
            return Ok(*idx);
        }

        let count = self.table.count();
        let ret = if count == 0 {
            0
        } else {
            let ns0 = self.table.ns_key(0)?.0;
            let (mut lower, mut upper) = (0, count);
            while upper - lower > 1 {
                let m = lower + (upper - lower) / 2;
                match self.table.ns_key(m)?.0 >= ns {
                    true => upper = m,
                    false => lower = m,
                }
            }
            match ns0 < ns {
                true => upper,
                false => lower,
            }
        };

        self.ns_cache.lock().unwrap().insert(ns, ret);
        Ok(ret)
    }

    fn compare_at(&self, ns: u8, key: &[u8], i: u32) -> Result<Ordering> {
        let (dns, dkey) = self.table.ns_key(i)?;
        Ok((ns, key).cmp(&(dns, dkey.as_bytes())))
    }

    /// Look `(ns, key)` up. On a hit return `(true, index)` of the
    /// matching dirent; on a miss `(false, insertion-point)`.
    pub fn find(&self, ns: u8, key: &[u8]) -> Result<(bool, u32)> {
        let mut grid_key = Vec::with_capacity(key.len() + 1);
        grid_key.push(ns);
        grid_key.extend_from_slice(key);

        let (lo, hi) = match &self.grid {
            Some(grid) if !grid.entries.is_empty() => grid.range(&grid_key),
            Some(_) => (0, 0),
            None => (0, self.table.count()),
        };
        self.find_in_range(lo, hi, ns, key)
    }

    fn find_in_range(&self, l: u32, u: u32, ns: u8, key: &[u8]) -> Result<(bool, u32)> {
        if l == u {
            return Ok((false, l));
        }

        match self.compare_at(ns, key, l)? {
            Ordering::Less => return Ok((false, l)),
            Ordering::Equal => return Ok((true, l)),
            Ordering::Greater => (),
        }
        if self.compare_at(ns, key, u - 1)? == Ordering::Greater {
            return Ok((false, u));
        }

        // Invariant maintained below: entry[l] < (ns, key) <= entry[u].
        let (mut l, mut u) = (l, u - 1);
        loop {
            // probe at the upward rounded midpoint.
            let p = l + (u - l + 1) / 2;
            match self.compare_at(ns, key, p)? {
                Ordering::Greater => l = p,
                c => match u == p {
                    true => return Ok((c == Ordering::Equal, u)),
                    false => u = p,
                },
            }
        }
    }
}

fn check_namespace(ns: u8) -> Result<()> {
    match ns {
        32..=127 => Ok(()),
        _ => err_at!(InvalidInput, msg: "namespace byte {} outside [32, 127]", ns),
    }
}

#[cfg(test)]
#[path = "lookup_test.rs"]
mod lookup_test;
