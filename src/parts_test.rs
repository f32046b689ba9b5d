use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Write};

use super::*;

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("zimf-parts-test").join(name);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_single_part() {
    let seed: u64 = random();
    println!("test_single_part {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("single");
    let loc = dir.join("whole.zim");
    let data: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();
    fs::File::create(&loc).unwrap().write_all(&data).unwrap();

    let fc = FileCompound::open(&loc).unwrap();
    assert_eq!(fc.size(), 4096);
    assert!(!fc.is_multipart());

    let mut buf = vec![0; 100];
    fc.read_at(&mut buf, Offset(1000)).unwrap();
    assert_eq!(&buf[..], &data[1000..1100]);

    assert_eq!(fc.locate(Offset(0)).unwrap(), 0);
    assert_eq!(fc.locate(Offset(4095)).unwrap(), 0);
    assert!(fc.locate(Offset(4096)).is_err());

    let mut buf = vec![0; 10];
    assert!(fc.read_at(&mut buf, Offset(4090)).is_ok());
    assert!(fc.read_at(&mut buf, Offset(4091)).is_err());
}

#[test]
fn test_split_parts() {
    let seed: u64 = random();
    println!("test_split_parts {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("split");
    let data: Vec<u8> = (0..3000).map(|_| rng.gen()).collect();
    for (i, chunk) in data.chunks(1000).enumerate() {
        let suffix = format!("a{}", (b'a' + i as u8) as char);
        let loc = dir.join(format!("split.zim{}", suffix));
        fs::File::create(&loc).unwrap().write_all(chunk).unwrap();
    }

    // `split.zim` does not exist, parts are discovered.
    let fc = FileCompound::open(dir.join("split.zim")).unwrap();
    assert_eq!(fc.size(), 3000);
    assert!(fc.is_multipart());

    // read across a part boundary.
    let mut buf = vec![0; 200];
    fc.read_at(&mut buf, Offset(900)).unwrap();
    assert_eq!(&buf[..], &data[900..1100]);

    assert_eq!(fc.locate(Offset(999)).unwrap(), 0);
    assert_eq!(fc.locate(Offset(1000)).unwrap(), 1);
    assert_eq!(fc.locate_range(Offset(500), 2000).unwrap(), 0..3);
    assert_eq!(fc.locate_range(Offset(1000), 1000).unwrap(), 1..2);

    // opening via an explicit `aa` part works too.
    let fc = FileCompound::open(dir.join("split.zimaa")).unwrap();
    assert_eq!(fc.size(), 3000);
}

#[test]
fn test_missing_file() {
    let dir = scratch_dir("missing");
    assert!(FileCompound::open(dir.join("nope.zim")).is_err());
}

#[test]
fn test_embedded_window() {
    let seed: u64 = random();
    println!("test_embedded_window {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("window");
    let loc = dir.join("container.bin");
    let data: Vec<u8> = (0..2048).map(|_| rng.gen()).collect();
    fs::File::create(&loc).unwrap().write_all(&data).unwrap();

    let fd = fs::OpenOptions::new().read(true).open(&loc).unwrap();
    let fc = FileCompound::from_file_window(fd, 512, 1024);
    assert_eq!(fc.size(), 1024);

    let mut buf = vec![0; 64];
    fc.read_at(&mut buf, Offset(0)).unwrap();
    assert_eq!(&buf[..], &data[512..576]);
    fc.read_at(&mut buf, Offset(960)).unwrap();
    assert_eq!(&buf[..], &data[1472..1536]);
}
