//! Module `cluster` implement reader-side access to one cluster.
//!
//! A cluster is a contiguous group of blobs behind a one-byte info
//! prefix that encodes the compression method and whether the
//! blob-offset table uses 64-bit entries. Compressed clusters are
//! decompressed whole on first read and held decompressed; uncompressed
//! clusters stay on disk and blobs are sliced straight out of the
//! archive reader.

use std::{io::Read, sync::Arc};

use crate::{
    err_at,
    reader::{Buffer, Reader, ReaderStream},
    types::{u32_at, u64_at, BlobIndex, Offset, Size},
    Error, Result,
};

/// Compression methods appearing in the cluster info byte. The writer
/// emits only `None` and `Zstd` (and deprecated `Lzma`); the rest are
/// historical.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Compression {
    None = 1,
    /// Legacy, support discontinued.
    Zip = 2,
    /// Legacy, support discontinued.
    Bzip2 = 3,
    /// Read-only.
    Lzma = 4,
    Zstd = 5,
}

impl Compression {
    pub fn from_info_byte(info: u8) -> Result<(Compression, bool)> {
        let extended = (info & 0x10) != 0;
        let compression = match info & 0x0f {
            1 => Compression::None,
            2 => Compression::Zip,
            3 => Compression::Bzip2,
            4 => Compression::Lzma,
            5 => Compression::Zstd,
            c => err_at!(InvalidFormat, msg: "invalid cluster compression {}", c)?,
        };
        Ok((compression, extended))
    }

    pub fn to_info_byte(self, extended: bool) -> u8 {
        (self as u8) | if extended { 0x10 } else { 0 }
    }
}

enum ClusterData {
    /// Uncompressed cluster: the archive bytes right after the info
    /// byte, to the end of the archive region. The offset table bounds
    /// the blobs.
    Raw(Reader),
    /// Decompressed payload of a compressed cluster.
    Decompressed(Arc<Vec<u8>>),
}

/// One parsed cluster: its offset table plus raw or decompressed data.
pub struct Cluster {
    compression: Compression,
    extended: bool,
    data: ClusterData,
    // blob boundaries relative to the start of the (decompressed) data,
    // N+1 entries for N blobs.
    offsets: Vec<u64>,
}

impl Cluster {
    /// Parse the cluster starting at `offset` of `zim_reader`.
    pub fn read(zim_reader: &Reader, offset: Offset) -> Result<Cluster> {
        let info = zim_reader.read_byte(offset)?;
        let (compression, extended) = Compression::from_info_byte(info)?;

        let body = Offset(offset.0 + 1);
        let body_size = Size(zim_reader.size().0 - body.0);
        let inner = zim_reader.sub_reader(body, body_size)?;

        let data = match compression {
            Compression::None => ClusterData::Raw(inner),
            Compression::Lzma => {
                let stream =
                    err_at!(InvalidFormat, xz2::stream::Stream::new_lzma_decoder(u64::MAX))?;
                let mut decoder =
                    xz2::read::XzDecoder::new_stream(ReaderStream::new(inner), stream);
                let mut out = vec![];
                err_at!(InvalidFormat, decoder.read_to_end(&mut out), "lzma cluster")?;
                ClusterData::Decompressed(Arc::new(out))
            }
            Compression::Zstd => {
                let mut decoder =
                    err_at!(InvalidFormat, zstd::stream::read::Decoder::new(ReaderStream::new(inner)))?
                        .single_frame();
                let mut out = vec![];
                err_at!(InvalidFormat, decoder.read_to_end(&mut out), "zstd cluster")?;
                ClusterData::Decompressed(Arc::new(out))
            }
            Compression::Zip | Compression::Bzip2 => err_at!(
                InvalidFormat, msg: "cluster compression {:?} is discontinued", compression
            )?,
        };

        let offsets = Self::read_offsets(&data, extended)?;

        Ok(Cluster {
            compression,
            extended,
            data,
            offsets,
        })
    }

    fn data_size(data: &ClusterData) -> u64 {
        match data {
            ClusterData::Raw(reader) => reader.size().0,
            ClusterData::Decompressed(buf) => buf.len() as u64,
        }
    }

    fn read_uint_at(data: &ClusterData, off: u64, elem: u64) -> Result<u64> {
        match data {
            ClusterData::Raw(reader) => match elem {
                4 => Ok(reader.read_u32(Offset(off))? as u64),
                _ => reader.read_u64(Offset(off)),
            },
            ClusterData::Decompressed(buf) => match elem {
                4 => Ok(u32_at(buf, off as usize)? as u64),
                _ => u64_at(buf, off as usize),
            },
        }
    }

    fn read_offsets(data: &ClusterData, extended: bool) -> Result<Vec<u64>> {
        let elem: u64 = if extended { 8 } else { 4 };

        let first = Self::read_uint_at(data, 0, elem)?;
        if first < elem || first % elem != 0 || first > Self::data_size(data) {
            err_at!(InvalidFormat, msg: "bad cluster offset table head {}", first)?
        }
        let n = first / elem; // offsets in the table, blobs + 1

        let mut offsets = Vec::with_capacity(n as usize);
        offsets.push(first);
        for i in 1..n {
            let off = Self::read_uint_at(data, i * elem, elem)?;
            if off < offsets[i as usize - 1] {
                err_at!(InvalidFormat, msg: "cluster offsets decreasing at {}", i)?
            }
            offsets.push(off);
        }

        if *offsets.last().unwrap() > Self::data_size(data) {
            err_at!(
                InvalidFormat, msg: "cluster offsets run past data, {} > {}",
                offsets.last().unwrap(), Self::data_size(data)
            )?
        }
        Ok(offsets)
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != Compression::None
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn blob_count(&self) -> BlobIndex {
        BlobIndex((self.offsets.len() - 1) as u32)
    }

    fn check_blob(&self, blob: BlobIndex) -> Result<usize> {
        let n = blob.0 as usize;
        if n + 1 >= self.offsets.len() {
            err_at!(OutOfRange, msg: "blob {} out of {}", blob, self.blob_count())?
        }
        Ok(n)
    }

    pub fn get_blob_size(&self, blob: BlobIndex) -> Result<Size> {
        let n = self.check_blob(blob)?;
        Ok(Size(self.offsets[n + 1] - self.offsets[n]))
    }

    /// Offset of the blob within the whole cluster, counting the info
    /// byte. For uncompressed clusters this lets callers compute the
    /// blob's absolute position in the archive.
    pub fn get_blob_offset(&self, blob: BlobIndex) -> Result<Offset> {
        let n = self.check_blob(blob)?;
        Ok(Offset(1 + self.offsets[n]))
    }

    pub fn get_blob(&self, blob: BlobIndex) -> Result<Buffer> {
        let size = self.get_blob_size(blob)?;
        self.get_blob_range(blob, Offset(0), size)
    }

    /// A sub-range of the blob's bytes.
    pub fn get_blob_range(&self, blob: BlobIndex, offset: Offset, size: Size) -> Result<Buffer> {
        let n = self.check_blob(blob)?;
        let blob_size = self.offsets[n + 1] - self.offsets[n];
        if offset.0 + size.0 > blob_size {
            err_at!(
                OutOfRange, msg: "blob range {}+{} beyond blob size {}",
                offset.0, size.0, blob_size
            )?
        }
        let start = self.offsets[n] + offset.0;
        match &self.data {
            ClusterData::Raw(reader) => reader.get_buffer(Offset(start), size),
            ClusterData::Decompressed(buf) => Ok(Buffer::Shared {
                data: Arc::clone(buf),
                start: start as usize,
                len: size.0 as usize,
            }),
        }
    }
}

#[cfg(test)]
#[path = "cluster_test.rs"]
mod cluster_test;
