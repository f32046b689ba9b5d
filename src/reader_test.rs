use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read, io::Write};

use super::*;

fn make_compound(name: &str, data: &[u8]) -> Arc<FileCompound> {
    let dir = std::env::temp_dir().join("zimf-reader-test");
    fs::create_dir_all(&dir).unwrap();
    let loc = dir.join(name);
    fs::File::create(&loc).unwrap().write_all(data).unwrap();
    Arc::new(FileCompound::open(&loc).unwrap())
}

#[test]
fn test_file_reader() {
    let seed: u64 = random();
    println!("test_file_reader {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let data: Vec<u8> = (0..1000).map(|_| rng.gen()).collect();
    let source = make_compound("file-reader.zim", &data);

    let reader = Reader::over(source);
    assert_eq!(reader.size(), Size(1000));
    assert_eq!(reader.offset(), Offset(0));

    let mut buf = vec![0; 100];
    reader.read(&mut buf, Offset(100)).unwrap();
    assert_eq!(&buf[..], &data[100..200]);
    assert_eq!(reader.read_byte(Offset(0)).unwrap(), data[0]);

    // out-of-bounds pre-checks.
    assert!(reader.read(&mut buf, Offset(950)).is_err());
    assert!(reader.read_byte(Offset(1000)).is_err());
    assert!(reader.sub_reader(Offset(500), Size(501)).is_err());

    // sub-reader re-bases offsets.
    let sub = reader.sub_reader(Offset(200), Size(300)).unwrap();
    assert_eq!(sub.size(), Size(300));
    assert_eq!(sub.offset(), Offset(200));
    let mut buf = vec![0; 50];
    sub.read(&mut buf, Offset(0)).unwrap();
    assert_eq!(&buf[..], &data[200..250]);
    assert!(sub.read(&mut buf, Offset(251)).is_err());

    // buffers are addressable views.
    let buffer = sub.get_buffer(Offset(10), Size(20)).unwrap();
    assert_eq!(&buffer[..], &data[210..230]);
}

#[test]
fn test_reader_uints() {
    let data = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
    let reader = Reader::from_bytes(data);

    assert_eq!(reader.read_u16(Offset(0)).unwrap(), 0x0201);
    assert_eq!(reader.read_u32(Offset(1)).unwrap(), 0x05040302);
    assert_eq!(reader.read_u64(Offset(1)).unwrap(), 0x0908070605040302);
    assert!(reader.read_u64(Offset(2)).is_err());
}

#[test]
fn test_mem_reader() {
    let data: Vec<u8> = (0..=255).collect();
    let reader = Reader::from_bytes(data.clone());
    assert_eq!(reader.size(), Size(256));

    let sub = reader.sub_reader(Offset(16), Size(64)).unwrap();
    let buffer = sub.get_buffer(Offset(0), Size(64)).unwrap();
    assert_eq!(&buffer[..], &data[16..80]);

    match buffer {
        Buffer::Shared { .. } => (),
        _ => panic!("expected shared buffer from mem reader"),
    }
}

#[test]
fn test_reader_stream() {
    let seed: u64 = random();
    println!("test_reader_stream {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let data: Vec<u8> = (0..10_000).map(|_| rng.gen()).collect();
    let reader = Reader::from_bytes(data.clone());

    let mut stream = ReaderStream::new(reader.sub_reader(Offset(100), Size(5000)).unwrap());
    let mut out = vec![];
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(&out[..], &data[100..5100]);
}

#[test]
fn test_multi_part_reader() {
    let seed: u64 = random();
    println!("test_multi_part_reader {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = std::env::temp_dir().join("zimf-reader-test").join("multi");
    fs::create_dir_all(&dir).unwrap();
    let data: Vec<u8> = (0..2500).map(|_| rng.gen()).collect();
    for (i, chunk) in data.chunks(1000).enumerate() {
        let loc = dir.join(format!("multi.zima{}", (b'a' + i as u8) as char));
        fs::File::create(&loc).unwrap().write_all(chunk).unwrap();
    }

    let source = Arc::new(FileCompound::open(dir.join("multi.zim")).unwrap());
    let reader = Reader::over(source);
    assert_eq!(reader.size(), Size(2500));

    let mut buf = vec![0; 1200];
    reader.read(&mut buf, Offset(900)).unwrap();
    assert_eq!(&buf[..], &data[900..2100]);

    // buffer across parts falls back to a heap copy.
    let buffer = reader.get_buffer(Offset(900), Size(1200)).unwrap();
    assert_eq!(&buffer[..], &data[900..2100]);
}
