use super::*;

#[test]
fn test_index_arithmetic() {
    let a = EntryIndex(10);
    assert_eq!(a + 5, EntryIndex(15));
    assert_eq!(EntryIndex(15) - a, 5);

    let mut b = ClusterIndex(0);
    b += 3;
    assert_eq!(b, ClusterIndex(3));
    assert!(ClusterIndex(3) > ClusterIndex(2));

    assert_eq!(u32::from(TitleIndex(7)), 7);
    assert_eq!(usize::from(BlobIndex(9)), 9);
}

#[test]
fn test_offset_size() {
    let off = Offset(1024);
    let size = Size(80);
    assert_eq!(off + size, Offset(1104));
    assert_eq!(Offset(1104) - off, size);
    assert_eq!(Size(100) - Size(20), Size(80));
    assert_eq!(Size(100) + Size(20), Size(120));

    let mut o = Offset(0);
    o += Size(16);
    assert_eq!(o, Offset(16));
}

#[test]
fn test_le_codecs() {
    let buf: Vec<u8> = vec![0x5a, 0x49, 0x4d, 0x04, 0xff, 0x00, 0x01, 0x02, 0x03, 0x04];
    assert_eq!(u16_at(&buf, 0).unwrap(), 0x495a);
    assert_eq!(u32_at(&buf, 0).unwrap(), 0x044d495a);
    assert_eq!(u64_at(&buf, 2).unwrap(), 0x04030201_00ff044d);

    assert!(u16_at(&buf, 9).is_err());
    assert!(u32_at(&buf, 7).is_err());
    assert!(u64_at(&buf, 3).is_err());
}
