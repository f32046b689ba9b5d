use arbitrary::Unstructured;
use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{
    cmp,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
    sync::Arc,
    thread,
};

use super::*;
use crate::{err_at, Error};

#[test]
fn test_lru_basic() {
    let lru: Lru<u32, String> = Lru::new(2);

    let a = lru.get_or_fetch(1, || Ok("one".to_string())).unwrap();
    assert_eq!(*a, "one");
    std::mem::drop(a);
    lru.get_or_fetch(2, || Ok("two".to_string())).unwrap();
    assert_eq!(lru.len(), 2);

    // touch 1, insert 3, expect 2 evicted.
    lru.get_or_fetch(1, || panic!("must be cached")).unwrap();
    lru.get_or_fetch(3, || Ok("three".to_string())).unwrap();
    assert_eq!(lru.len(), 2);

    let calls = AtomicUsize::new(0);
    lru.get_or_fetch(2, || {
        calls.fetch_add(1, SeqCst);
        Ok("two-again".to_string())
    })
    .unwrap();
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn test_lru_referenced_not_evicted() {
    let lru: Lru<u32, String> = Lru::new(1);

    let held = lru.get_or_fetch(1, || Ok("held".to_string())).unwrap();
    lru.get_or_fetch(2, || Ok("two".to_string())).unwrap();

    // key 1 is still referenced, so key 2 was the eviction victim.
    assert_eq!(lru.len(), 1);
    lru.get_or_fetch(1, || panic!("must still be cached")).unwrap();
    assert_eq!(*held, "held");
}

#[test]
fn test_lru_failed_fetch_retries() {
    let lru: Lru<u32, String> = Lru::new(4);

    let res = lru.get_or_fetch(9, || -> crate::Result<String> {
        err_at!(IOError, msg: "boom")
    });
    assert!(res.is_err());

    // the failed fetch left no residue; a later fetch succeeds.
    let val = lru.get_or_fetch(9, || Ok("fine".to_string())).unwrap();
    assert_eq!(*val, "fine");
}

#[test]
fn test_lru_coalesced_miss() {
    let lru: Arc<Lru<u32, u64>> = Arc::new(Lru::new(8));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..8 {
        let (lru, calls) = (Arc::clone(&lru), Arc::clone(&calls));
        handles.push(thread::spawn(move || {
            let val = lru
                .get_or_fetch(7, || {
                    calls.fetch_add(1, SeqCst);
                    thread::sleep(std::time::Duration::from_millis(20));
                    Ok(42_u64)
                })
                .unwrap();
            assert_eq!(*val, 42);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // concurrent misses for the same key coalesce to one computation.
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn test_lru_set_max() {
    let seed: u64 = random();
    println!("test_lru_set_max {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let lru: Lru<u32, u64> = Lru::new(16);
    for i in 0..16 {
        lru.get_or_fetch(i, || Ok(i as u64)).unwrap();
    }
    assert_eq!(lru.len(), 16);

    let max = {
        let bytes = rng.gen::<[u8; 32]>();
        let mut uns = Unstructured::new(&bytes);
        cmp::max(1, cmp::min(uns.arbitrary::<usize>().unwrap(), 8))
    };
    lru.set_max(max);
    assert_eq!(lru.len(), max);
    assert_eq!(lru.max(), max);

    lru.drop_key(&15);
    assert!(lru.len() <= max);
}
