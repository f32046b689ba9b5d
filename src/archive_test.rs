use std::{fs, io::Read, io::Seek, io::SeekFrom, io::Write};

use super::*;
use crate::{
    check::{validate, IntegrityCheck, ALL_CHECKS},
    creator::{Creator, HintKey, Hints, StringItem},
    suggest::SuggestionSearcher,
};

fn scratch(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("zimf-archive-test");
    fs::create_dir_all(&dir).unwrap();
    let loc = dir.join(name);
    fs::remove_file(&loc).ok();
    loc
}

fn front_hints() -> Hints {
    let mut hints = Hints::new();
    hints.insert(HintKey::FrontArticle, 1);
    hints
}

// a representative archive: html articles, media, metadata, redirect.
fn build_sample(name: &str) -> std::path::PathBuf {
    let loc = scratch(name);
    let mut creator = Creator::new();
    creator.start_zim_creation(&loc).unwrap();

    let articles = [
        ("art/alpha", "Alpha article", "alpha body text"),
        ("art/beta", "Beta article", "beta body text"),
        ("art/gamma", "Gamma article", "gamma body text"),
    ];
    for (path, title, body) in articles {
        creator
            .add_item(StringItem::new(path, title, "text/html", front_hints(), body))
            .unwrap();
    }
    creator
        .add_item(StringItem::new(
            "img/logo.png",
            "The logo",
            "image/png",
            Hints::new(),
            "PNGPNGPNG",
        ))
        .unwrap();
    creator
        .add_item(StringItem::new(
            "video/intro.mp4",
            "Intro video",
            "video/mp4",
            Hints::new(),
            "MP4BYTES",
        ))
        .unwrap();
    creator
        .add_redirection("start", "Start here", "art/alpha", Hints::new())
        .unwrap();
    creator.add_metadata("Title", "Sample archive").unwrap();
    creator.add_illustration(48, b"ICON".to_vec()).unwrap();
    creator.set_main_path("art/alpha").unwrap();
    creator.finish_zim_creation().unwrap();
    loc
}

#[test]
fn test_sample_counts() {
    let archive = Archive::open(build_sample("counts.zim")).unwrap();

    assert_eq!(archive.entry_count_user(), 6);
    assert!(archive.entry_count_all() > 6);
    assert!(archive.has_front_articles_index());
    assert_eq!(archive.article_count().unwrap(), 3);
    assert_eq!(archive.media_count().unwrap(), 2);

    let counter = archive.counter().unwrap();
    assert_eq!(counter["text/html"], 3);
    assert_eq!(counter["image/png"], 1);
    assert_eq!(counter["video/mp4"], 1);
    // counter sums to the number of user items (redirects excluded).
    assert_eq!(counter.values().sum::<u64>(), 5);
}

#[test]
fn test_path_and_title_order() {
    let archive = Archive::open(build_sample("order.zim")).unwrap();

    // path order is strictly increasing over user entries.
    let paths: Vec<String> = archive
        .iter_by_path()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(paths.len(), 6);
    for pair in paths.windows(2) {
        assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
    }

    // title order is non-decreasing over the front articles.
    let titles: Vec<String> = archive
        .iter_by_title()
        .map(|e| e.unwrap().title())
        .collect();
    assert_eq!(titles.len(), 3);
    for pair in titles.windows(2) {
        assert!(pair[0] <= pair[1]);
    }

    // storage-order iteration visits every user entry exactly once.
    let mut efficient: Vec<String> = archive
        .iter_efficient()
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    efficient.sort();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(efficient, sorted);

    // indexed accessors agree with iteration.
    let by_idx = archive.get_entry_by_path_idx(archive.header().entry_count.into());
    assert!(by_idx.is_err());
    let entry = archive.get_entry_by_cluster_order(0).unwrap();
    assert!(!entry.path().is_empty());
}

#[test]
fn test_find_by_prefix() {
    let archive = Archive::open(build_sample("prefix.zim")).unwrap();

    let (begin, end) = archive.find_by_path_prefix("art/").unwrap();
    assert_eq!(end - begin, 3);
    let paths: Vec<String> = archive
        .entries_by_path_prefix("art/")
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(paths, vec!["art/alpha", "art/beta", "art/gamma"]);

    // unmatched prefixes give an empty, not erroneous, range.
    let (begin, end) = archive.find_by_path_prefix("zzz").unwrap();
    assert_eq!(begin, end);

    // the empty prefix covers the whole user range.
    let (begin, end) = archive.find_by_path_prefix("").unwrap();
    assert_eq!(end - begin, archive.entry_count_user());

    let (begin, end) = archive.find_by_title_prefix("Alpha").unwrap();
    assert_eq!(end - begin, 1);
    let (begin, end) = archive.find_by_title_prefix("Nope").unwrap();
    assert_eq!(begin, end);
}

#[test]
fn test_entry_lookup_fallbacks() {
    let archive = Archive::open(build_sample("lookup.zim")).unwrap();

    // bare path, namespace-qualified path, and title lookups.
    assert!(archive.get_entry_by_path("art/alpha").is_ok());
    assert!(archive.get_entry_by_path("C/art/alpha").is_ok());
    assert!(archive.get_entry_by_path("/C/art/alpha").is_ok());
    assert!(archive.get_entry_by_path("missing").is_err());
    assert!(archive.get_entry_by_title("Beta article").is_ok());
    assert!(archive.get_entry_by_title("Beta").is_err());

    let entry = archive.get_entry_by_path_ns('W', "mainPage").unwrap();
    assert!(entry.is_redirect());

    // the redirect chain from start resolves to alpha's content.
    let start = archive.get_entry_by_path("start").unwrap();
    assert_eq!(
        start.item(true).unwrap().data().unwrap(),
        b"alpha body text".to_vec()
    );

    let main = archive.get_main_entry().unwrap();
    assert_eq!(
        main.item(true).unwrap().data().unwrap(),
        b"alpha body text".to_vec()
    );
}

#[test]
fn test_checksum_and_tamper() {
    let loc = build_sample("tamper.zim");
    let archive = Archive::open(&loc).unwrap();
    assert!(archive.has_checksum());
    assert_eq!(archive.checksum().unwrap().len(), 32);
    assert!(archive.check());
    std::mem::drop(archive);

    // flip one byte inside the cluster region.
    {
        let mut fd = fs::OpenOptions::new().read(true).write(true).open(&loc).unwrap();
        fd.seek(SeekFrom::Start(1030)).unwrap();
        let mut byte = [0_u8; 1];
        fd.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xff;
        fd.seek(SeekFrom::Start(1030)).unwrap();
        fd.write_all(&byte).unwrap();
    }

    let archive = Archive::open(&loc).unwrap();
    assert!(!archive.check());
    assert!(!archive.check_integrity(IntegrityCheck::Checksum).unwrap());
}

#[test]
fn test_integrity_checks() {
    let loc = build_sample("integrity.zim");
    assert!(validate(&loc, &ALL_CHECKS).unwrap());

    let archive = Archive::open(&loc).unwrap();
    for check in ALL_CHECKS {
        assert!(archive.check_integrity(check).unwrap(), "{:?}", check);
    }
}

#[test]
fn test_integrity_detects_bad_mimetype() {
    let loc = build_sample("bad-mime.zim");

    // point the first dirent's mimetype at a code past the list.
    let path_ptr_pos = {
        let archive = Archive::open(&loc).unwrap();
        archive.header().path_ptr_pos
    };
    let mut fd = fs::OpenOptions::new().read(true).write(true).open(&loc).unwrap();
    fd.seek(SeekFrom::Start(path_ptr_pos)).unwrap();
    let mut buf = [0_u8; 8];
    fd.read_exact(&mut buf).unwrap();
    let first_dirent = u64::from_le_bytes(buf);
    fd.seek(SeekFrom::Start(first_dirent)).unwrap();
    fd.write_all(&0x00f0_u16.to_le_bytes()).unwrap();

    let archive = Archive::open(&loc).unwrap();
    assert!(!archive
        .check_integrity(IntegrityCheck::DirentMimeTypes)
        .unwrap());
    assert!(!archive.check_integrity(IntegrityCheck::Checksum).unwrap());
}

#[test]
fn test_integrity_detects_bad_cluster_ptr() {
    let loc = build_sample("bad-cluster.zim");

    let (cluster_ptr_pos, cluster_count, checksum_pos) = {
        let archive = Archive::open(&loc).unwrap();
        let header = archive.header();
        (header.cluster_ptr_pos, header.cluster_count, header.checksum_pos)
    };
    assert!(cluster_count >= 2);

    // the first cluster pointer moves past the valid region but stays
    // inside the file, so construction still succeeds.
    let mut fd = fs::OpenOptions::new().read(true).write(true).open(&loc).unwrap();
    fd.seek(SeekFrom::Start(cluster_ptr_pos)).unwrap();
    fd.write_all(&(checksum_pos + 1).to_le_bytes()).unwrap();

    let archive = Archive::open(&loc).unwrap();
    assert!(!archive.check_integrity(IntegrityCheck::ClusterPtrs).unwrap());
}

#[test]
fn test_open_rejects_malformed_header() {
    // too small to be a zim file.
    let loc = scratch("short.zim");
    fs::File::create(&loc).unwrap().write_all(b"ZIM").unwrap();
    match Archive::open(&loc) {
        Err(Error::InvalidFormat(_, _)) => (),
        res => panic!("expected InvalidFormat, got {:?}", res.map(|_| ())),
    }

    // bad magic in an otherwise plausible 96-byte file.
    let loc = scratch("magic.zim");
    let mut bytes = vec![0_u8; 96];
    bytes[0..4].copy_from_slice(&0xdead_beef_u32.to_le_bytes());
    fs::File::create(&loc).unwrap().write_all(&bytes).unwrap();
    match Archive::open(&loc) {
        Err(Error::InvalidFormat(_, _)) => (),
        res => panic!("expected InvalidFormat, got {:?}", res.map(|_| ())),
    }

    // validate() folds construction failures into a false verdict.
    assert!(!validate(&loc, &ALL_CHECKS).unwrap());
}

#[test]
fn test_embedded_archive() {
    let loc = build_sample("embedded-src.zim");
    let zim_bytes = fs::read(&loc).unwrap();

    let container = scratch("container.bin");
    let mut fd = fs::File::create(&container).unwrap();
    fd.write_all(&vec![0xaa_u8; 512]).unwrap();
    fd.write_all(&zim_bytes).unwrap();
    fd.write_all(&vec![0xbb_u8; 256]).unwrap();
    std::mem::drop(fd);

    let fd = fs::OpenOptions::new().read(true).open(&container).unwrap();
    let archive = Archive::from_file_window(fd, 512, zim_bytes.len() as u64).unwrap();
    assert_eq!(archive.entry_count_user(), 6);
    assert!(archive.check());
    assert_eq!(
        archive
            .get_entry_by_path("art/beta")
            .unwrap()
            .item(false)
            .unwrap()
            .data()
            .unwrap(),
        b"beta body text".to_vec()
    );
}

#[test]
fn test_split_archive() {
    let loc = build_sample("split-src.zim");
    let zim_bytes = fs::read(&loc).unwrap();

    let dir = std::env::temp_dir().join("zimf-archive-test").join("split");
    fs::create_dir_all(&dir).unwrap();
    let chunk = zim_bytes.len() / 3 + 1;
    for (i, part) in zim_bytes.chunks(chunk).enumerate() {
        let name = format!("sample.zima{}", (b'a' + i as u8) as char);
        fs::File::create(dir.join(name)).unwrap().write_all(part).unwrap();
    }

    let archive = Archive::open(dir.join("sample.zim")).unwrap();
    assert!(archive.is_multipart());
    assert_eq!(archive.entry_count_user(), 6);
    assert!(archive.check());
    assert_eq!(
        archive
            .get_entry_by_path("art/gamma")
            .unwrap()
            .item(false)
            .unwrap()
            .data()
            .unwrap(),
        b"gamma body text".to_vec()
    );
}

#[test]
fn test_suggestions() {
    let archive = Archive::open(build_sample("suggest.zim")).unwrap();
    let searcher = SuggestionSearcher::new(archive);

    // only front articles are suggested; titles are matched by prefix.
    assert_eq!(searcher.estimated_matches("A").unwrap(), 1);
    let suggestions = searcher.suggest("A", 10).unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].title(), "Alpha article");
    assert_eq!(suggestions[0].path(), "art/alpha");

    assert_eq!(searcher.suggest("Zzz", 10).unwrap().len(), 0);
    assert!(searcher.suggest("", 2).unwrap().len() <= 2);
}

#[test]
fn test_direct_access_information() {
    let loc = build_sample("direct.zim");
    let archive = Archive::open(&loc).unwrap();

    // compressed html article: no direct access.
    let item = archive
        .get_entry_by_path("art/alpha")
        .unwrap()
        .item(false)
        .unwrap();
    assert!(item.direct_access_information().unwrap().is_none());

    // the v0 listing lives uncompressed; its direct window holds the
    // advertised bytes.
    let entry = archive.get_entry_by_path_ns('X', "listing/titleOrdered/v0").unwrap();
    let item = entry.item(false).unwrap();
    let (part_loc, off) = item.direct_access_information().unwrap().unwrap();
    let size: usize = usize::from(item.size().unwrap());
    let mut fd = fs::OpenOptions::new().read(true).open(&part_loc).unwrap();
    fd.seek(SeekFrom::Start(off)).unwrap();
    let mut direct = vec![0_u8; size];
    fd.read_exact(&mut direct).unwrap();
    assert_eq!(direct, item.data().unwrap());
}

#[test]
fn test_cache_tuning() {
    let archive = Archive::open(build_sample("cache.zim")).unwrap();

    archive.set_cluster_cache_max(2);
    assert_eq!(archive.cluster_cache_max(), 2);
    archive.set_dirent_cache_max(8);
    assert_eq!(archive.dirent_cache_max(), 8);

    // everything still resolves with tiny caches.
    for entry in archive.iter_by_path() {
        let entry = entry.unwrap();
        if !entry.is_redirect() {
            entry.item(false).unwrap().data().unwrap();
        }
    }
}

#[test]
fn test_clone_and_threads() {
    let archive = Archive::open(build_sample("threads.zim")).unwrap();

    let mut handles = vec![];
    for _ in 0..4 {
        let archive = archive.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..20 {
                let data = archive
                    .get_entry_by_path("art/beta")
                    .unwrap()
                    .item(false)
                    .unwrap()
                    .data()
                    .unwrap();
                assert_eq!(data, b"beta body text".to_vec());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
