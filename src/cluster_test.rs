use std::io::Write;

use super::*;

// Serialize a cluster the way the writer does: info byte, then the
// offset table and blob bytes, compressed in full as one unit.
fn make_cluster(compression: Compression, extended: bool, blobs: &[&[u8]]) -> Vec<u8> {
    let elem = if extended { 8 } else { 4 };
    let table = (blobs.len() as u64 + 1) * elem;

    let mut data = vec![];
    let mut off = table;
    for blob in blobs.iter().chain(std::iter::once(&&b""[..])) {
        if extended {
            data.extend_from_slice(&off.to_le_bytes());
        } else {
            data.extend_from_slice(&(off as u32).to_le_bytes());
        }
        off += blob.len() as u64;
    }
    for blob in blobs {
        data.extend_from_slice(blob);
    }

    let mut out = vec![compression.to_info_byte(extended)];
    match compression {
        Compression::None => out.extend_from_slice(&data),
        Compression::Zstd => {
            let bytes = zstd::encode_all(&data[..], 0).unwrap();
            out.extend_from_slice(&bytes);
        }
        Compression::Lzma => {
            let opts = xz2::stream::LzmaOptions::new_preset(6).unwrap();
            let stream = xz2::stream::Stream::new_lzma_encoder(&opts).unwrap();
            let mut encoder = xz2::write::XzEncoder::new_stream(vec![], stream);
            encoder.write_all(&data).unwrap();
            out.extend_from_slice(&encoder.finish().unwrap());
        }
        _ => unreachable!(),
    }
    out
}

#[test]
fn test_info_byte() {
    assert_eq!(Compression::from_info_byte(0x01).unwrap(), (Compression::None, false));
    assert_eq!(Compression::from_info_byte(0x11).unwrap(), (Compression::None, true));
    assert_eq!(Compression::from_info_byte(0x05).unwrap(), (Compression::Zstd, false));
    assert_eq!(Compression::from_info_byte(0x15).unwrap(), (Compression::Zstd, true));
    assert_eq!(Compression::from_info_byte(0x04).unwrap(), (Compression::Lzma, false));
    assert!(Compression::from_info_byte(0x00).is_err());
    assert!(Compression::from_info_byte(0x0f).is_err());

    assert_eq!(Compression::Zstd.to_info_byte(false), 0x05);
    assert_eq!(Compression::None.to_info_byte(true), 0x11);
}

#[test]
fn test_uncompressed_cluster() {
    let blobs: Vec<&[u8]> = vec![b"first blob", b"", b"third-blob-bytes"];
    let bytes = make_cluster(Compression::None, false, &blobs);
    let reader = Reader::from_bytes(bytes);

    let cluster = Cluster::read(&reader, Offset(0)).unwrap();
    assert_eq!(cluster.compression(), Compression::None);
    assert!(!cluster.is_compressed());
    assert!(!cluster.is_extended());
    assert_eq!(cluster.blob_count(), BlobIndex(3));

    for (i, blob) in blobs.iter().enumerate() {
        let i = BlobIndex(i as u32);
        assert_eq!(cluster.get_blob_size(i).unwrap(), Size(blob.len() as u64));
        assert_eq!(&cluster.get_blob(i).unwrap()[..], *blob);
    }

    // blob offsets count the info byte; the first blob starts right
    // after the 4-byte-element offset table.
    assert_eq!(cluster.get_blob_offset(BlobIndex(0)).unwrap(), Offset(1 + 16));

    assert!(cluster.get_blob(BlobIndex(3)).is_err());
    assert_eq!(
        &cluster.get_blob_range(BlobIndex(2), Offset(6), Size(4)).unwrap()[..],
        b"blob"
    );
    assert!(cluster
        .get_blob_range(BlobIndex(2), Offset(10), Size(10))
        .is_err());
}

#[test]
fn test_zstd_cluster() {
    let blobs: Vec<&[u8]> = vec![b"zstd blob one", b"zstd blob two"];
    let mut bytes = make_cluster(Compression::Zstd, false, &blobs);
    // trailing bytes of the next cluster must not confuse the decoder.
    bytes.extend_from_slice(b"NEXT-CLUSTER-GARBAGE");
    let reader = Reader::from_bytes(bytes);

    let cluster = Cluster::read(&reader, Offset(0)).unwrap();
    assert_eq!(cluster.compression(), Compression::Zstd);
    assert!(cluster.is_compressed());
    assert_eq!(cluster.blob_count(), BlobIndex(2));
    assert_eq!(&cluster.get_blob(BlobIndex(0)).unwrap()[..], b"zstd blob one");
    assert_eq!(&cluster.get_blob(BlobIndex(1)).unwrap()[..], b"zstd blob two");
}

#[test]
fn test_lzma_cluster() {
    let blobs: Vec<&[u8]> = vec![b"lzma-alone payload"];
    let bytes = make_cluster(Compression::Lzma, false, &blobs);
    let reader = Reader::from_bytes(bytes);

    let cluster = Cluster::read(&reader, Offset(0)).unwrap();
    assert_eq!(cluster.compression(), Compression::Lzma);
    assert_eq!(cluster.blob_count(), BlobIndex(1));
    assert_eq!(&cluster.get_blob(BlobIndex(0)).unwrap()[..], b"lzma-alone payload");
}

#[test]
fn test_extended_cluster() {
    let blobs: Vec<&[u8]> = vec![b"extended offsets", b"second"];
    let bytes = make_cluster(Compression::None, true, &blobs);
    let reader = Reader::from_bytes(bytes);

    let cluster = Cluster::read(&reader, Offset(0)).unwrap();
    assert!(cluster.is_extended());
    assert_eq!(cluster.blob_count(), BlobIndex(2));
    assert_eq!(&cluster.get_blob(BlobIndex(0)).unwrap()[..], b"extended offsets");
    assert_eq!(&cluster.get_blob(BlobIndex(1)).unwrap()[..], b"second");
}

#[test]
fn test_corrupt_offset_table() {
    // table head smaller than one element.
    let reader = Reader::from_bytes(vec![0x01, 2, 0, 0, 0]);
    assert!(Cluster::read(&reader, Offset(0)).is_err());

    // decreasing offsets.
    let mut bytes = vec![0x01];
    bytes.extend_from_slice(&12_u32.to_le_bytes());
    bytes.extend_from_slice(&20_u32.to_le_bytes());
    bytes.extend_from_slice(&15_u32.to_le_bytes());
    bytes.extend_from_slice(&vec![0; 16]);
    let reader = Reader::from_bytes(bytes);
    match Cluster::read(&reader, Offset(0)) {
        Err(Error::InvalidFormat(_, _)) => (),
        res => panic!("expected InvalidFormat, got {:?}", res.map(|_| ())),
    }

    // discontinued compression methods are rejected.
    let reader = Reader::from_bytes(vec![0x02, 4, 0, 0, 0]);
    assert!(Cluster::read(&reader, Offset(0)).is_err());
}
