use std::sync::Arc;

use super::*;
use crate::{
    dirent::DirentReader,
    reader::Reader,
    types::EntryIndex,
};

fn encode_item(ns: char, path: &str, title: &str) -> Vec<u8> {
    let mut buf = vec![];
    buf.extend_from_slice(&0_u16.to_le_bytes());
    buf.push(0);
    buf.push(ns as u8);
    buf.extend_from_slice(&0_u32.to_le_bytes());
    buf.extend_from_slice(&0_u32.to_le_bytes());
    buf.extend_from_slice(&0_u32.to_le_bytes());
    buf.extend_from_slice(path.as_bytes());
    buf.push(0);
    if title != path {
        buf.extend_from_slice(title.as_bytes());
    }
    buf.push(0);
    buf
}

// Sequence must be supplied in (ns, path) order.
fn build_table(dirents: &[(char, &str)]) -> PathTable {
    let mut region = vec![];
    let mut ptrs = vec![];
    for (ns, path) in dirents.iter() {
        ptrs.extend_from_slice(&(region.len() as u64).to_le_bytes());
        region.extend_from_slice(&encode_item(*ns, path, path));
    }

    let zim_reader = Arc::new(Reader::from_bytes(region));
    let accessor = DirectDirentAccessor::new(
        DirentReader::new(zim_reader),
        Reader::from_bytes(ptrs),
        EntryIndex(dirents.len() as u32),
        512,
    );
    PathTable(Arc::new(accessor))
}

fn narrow_fixture() -> Vec<(char, &'static str)> {
    vec![
        ('A', "aa"),
        ('A', "aaaa"),
        ('A', "aaaaaa"),
        ('A', "aaaabb"),
        ('A', "aaaacc"),
        ('A', "aabbaa"),
        ('A', "aabbbb"),
        ('A', "aabbcc"),
        ('A', "cccccc"),
        ('M', "foo"),
        ('a', "aa"),
        ('a', "bb"),
        ('b', "aa"),
    ]
}

#[test]
fn test_shortest_between() {
    let f = |a: &str, b: &str| NarrowDown::shortest_between(a.as_bytes(), b.as_bytes());
    assert_eq!(f("aabbaa", "aabbbb"), b"aabbb".to_vec());
    assert_eq!(f("aa", "aaaa"), b"aaa".to_vec());
    assert_eq!(f("We Are The Champions", "We Will Rock You"), b"We W".to_vec());
    assert_eq!(f("a", "b"), b"b".to_vec());
}

#[test]
fn test_find() {
    // run the same queries for every grid density, from one sample per
    // dirent down to a single sample.
    for grid_entries in [1, 2, 3, 4, 8, 256] {
        let lookup = DirentLookup::new_fast(build_table(&narrow_fixture()), grid_entries).unwrap();

        assert_eq!(lookup.find(b'A', b"aabb").unwrap(), (false, 5), "grid {}", grid_entries);
        assert_eq!(lookup.find(b'A', b"aabbbb").unwrap(), (true, 6), "grid {}", grid_entries);
        assert_eq!(lookup.find(b'U', b"aa").unwrap(), (false, 10), "grid {}", grid_entries);
        assert_eq!(lookup.find(b'A', b"dd").unwrap(), (false, 9), "grid {}", grid_entries);

        // every present key is found at its own index.
        for (i, (ns, path)) in narrow_fixture().iter().enumerate() {
            let got = lookup.find(*ns as u8, path.as_bytes()).unwrap();
            assert_eq!(got, (true, i as u32), "grid {} path {}", grid_entries, path);
        }

        // boundaries.
        assert_eq!(lookup.find(b' ', b"zz").unwrap(), (false, 0));
        assert_eq!(lookup.find(b'z', b"aa").unwrap(), (false, 13));
    }
}

#[test]
fn test_namespace_boundaries() {
    let lookup = DirentLookup::new_fast(build_table(&narrow_fixture()), 256).unwrap();

    assert_eq!(lookup.namespace_begin(b'A').unwrap(), 0);
    assert_eq!(lookup.namespace_end(b'A').unwrap(), 9);
    assert_eq!(lookup.namespace_begin(b'M').unwrap(), 9);
    assert_eq!(lookup.namespace_end(b'M').unwrap(), 10);
    assert_eq!(lookup.namespace_begin(b'a').unwrap(), 10);
    assert_eq!(lookup.namespace_end(b'a').unwrap(), 12);
    assert_eq!(lookup.namespace_begin(b'b').unwrap(), 12);
    assert_eq!(lookup.namespace_end(b'b').unwrap(), 13);

    // absent namespace collapses to an empty range.
    assert_eq!(lookup.namespace_begin(b'U').unwrap(), 10);
    assert_eq!(lookup.namespace_end(b'U').unwrap(), 10);

    // namespace bytes outside [32, 127] are rejected.
    assert!(lookup.namespace_begin(20).is_err());
    assert!(lookup.namespace_begin(200).is_err());
}

#[test]
fn test_unsorted_table_rejected() {
    let table = build_table(&[('A', "bb"), ('A', "aa"), ('A', "cc")]);
    match DirentLookup::new_fast(table, 256) {
        Err(Error::InvalidFormat(_, _)) => (),
        res => panic!("expected InvalidFormat, got {:?}", res.map(|_| ())),
    }
}

#[test]
fn test_plain_lookup_duplicate_keys() {
    // titles may legitimately repeat; the plain (grid-less) lookup
    // serves them, returning the first of an equal run.
    let table = build_table(&[
        ('A', "aa"),
        ('A', "bb"),
        ('A', "bb"),
        ('A', "cc"),
    ]);
    let lookup = DirentLookup::new(table);
    assert_eq!(lookup.find(b'A', b"aa").unwrap(), (true, 0));
    assert_eq!(lookup.find(b'A', b"bb").unwrap(), (true, 1));
    assert_eq!(lookup.find(b'A', b"cc").unwrap(), (true, 3));
    assert_eq!(lookup.find(b'A', b"ba").unwrap(), (false, 1));
}

#[test]
fn test_empty_table() {
    let lookup = DirentLookup::new_fast(build_table(&[]), 256).unwrap();
    assert_eq!(lookup.find(b'A', b"anything").unwrap(), (false, 0));
    assert_eq!(lookup.namespace_begin(b'A').unwrap(), 0);
    assert_eq!(lookup.namespace_end(b'A').unwrap(), 0);
}
