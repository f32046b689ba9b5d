use super::*;

#[test]
fn test_path_title_packing() {
    let pt = PathTitle::new("foo/bar", "Foo Bar").unwrap();
    assert_eq!(pt.path(), "foo/bar");
    assert_eq!(pt.title(), "Foo Bar");
    assert_eq!(pt.stored_title(), "Foo Bar");

    // title equal to path is not stored.
    let pt = PathTitle::new("foo/bar", "foo/bar").unwrap();
    assert_eq!(pt.path(), "foo/bar");
    assert_eq!(pt.title(), "foo/bar");
    assert_eq!(pt.stored_title(), "");

    // empty title falls back to the path.
    let pt = PathTitle::new("Counter", "").unwrap();
    assert_eq!(pt.title(), "Counter");
    assert_eq!(pt.stored_title(), "");

    let long: String = std::iter::repeat('x').take(0xffff).collect();
    assert!(PathTitle::new(&long, "t").is_err());
    assert!(PathTitle::new("p", &long).is_err());
}

#[test]
fn test_ns_order() {
    // namespace enum order must match the byte order of the chars.
    assert!(Ns::C < Ns::M && Ns::M < Ns::W && Ns::W < Ns::X);
    assert_eq!(Ns::C.as_char(), 'C');
    assert_eq!(Ns::X.as_char(), 'X');
}

#[test]
fn test_pool_stable_ids() {
    let mut pool = DirentPool::new();
    let mut ids = vec![];
    for i in 0..100_000 {
        let path = format!("entry-{:06}", i);
        let dirent = WriterDirent::new_item(Ns::C, &path, &path, 0).unwrap();
        ids.push(pool.alloc(dirent));
    }
    assert_eq!(pool.len(), 100_000);

    // ids allocated before later blocks were added still resolve.
    assert_eq!(pool.get(ids[0]).path(), "entry-000000");
    assert_eq!(pool.get(ids[70_000]).path(), "entry-070000");
    pool.get_mut(ids[99_999]).removed = true;
    assert!(pool.get(ids[99_999]).removed);
}

#[test]
fn test_alias_shares_target_address() {
    let mut target = WriterDirent::new_item(Ns::C, "orig", "Orig", 7).unwrap();
    target.info = DirentInfo::Direct {
        cluster: None,
        blob: 5,
    };

    let alias = WriterDirent::new_alias("alias", "Alias", &target).unwrap();
    assert_eq!(alias.ns, Ns::C);
    assert_eq!(alias.mimetype, 7);
    match alias.info {
        DirentInfo::Direct { blob, .. } => assert_eq!(blob, 5),
        _ => panic!("alias must be a direct dirent"),
    }

    let redirect = WriterDirent::new_redirect(Ns::C, "r", "", Ns::C, "orig").unwrap();
    assert!(WriterDirent::new_alias("alias2", "", &redirect).is_err());
}
