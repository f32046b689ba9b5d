//! Module `cluster` implement writer-side cluster building.
//!
//! A [ClusterBuilder] accumulates content providers and their offsets
//! on the user thread. When a builder reaches the target size it is
//! closed: its contents move into the shared [ClusterHandle], a worker
//! serializes and compresses them, and the single writer thread stamps
//! the final byte offset while appending the bytes to the output file.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering::SeqCst},
    Arc, Condvar, Mutex,
};

use crate::{
    cluster::Compression,
    creator::provider::ContentProvider,
    err_at, Error, Result,
};

pub(crate) enum ClusterWork {
    /// Contents still owned by the open builder.
    Open,
    /// Closed, waiting for a worker to serialize and compress.
    Task {
        compression: Compression,
        level: i32,
        offsets: Vec<u64>,
        providers: Vec<Box<dyn ContentProvider>>,
    },
    /// Final on-disk bytes, ready for the writer thread.
    Ready(Vec<u8>),
    /// Appended to the output; bytes dropped.
    Written,
    /// Serialization or compression failed; the error is parked in the
    /// creator's failure slot.
    Failed,
}

/// Shared view of one closed cluster, crossing the user thread, the
/// worker pool and the writer thread.
pub(crate) struct ClusterHandle {
    /// Cluster number, assigned when the builder is closed.
    pub(crate) index: AtomicU32,
    /// Byte offset in the output file, stamped by the writer thread.
    pub(crate) offset: AtomicU64,
    /// Bytes from cluster start to the data area: info byte plus the
    /// offset table. Meaningful for uncompressed clusters.
    pub(crate) data_offset: AtomicU64,
    pub(crate) work: Mutex<ClusterWork>,
    pub(crate) done: Condvar,
}

impl ClusterHandle {
    fn new() -> ClusterHandle {
        ClusterHandle {
            index: AtomicU32::new(u32::MAX),
            offset: AtomicU64::new(0),
            data_offset: AtomicU64::new(0),
            work: Mutex::new(ClusterWork::Open),
            done: Condvar::new(),
        }
    }

    pub(crate) fn to_index(&self) -> u32 {
        self.index.load(SeqCst)
    }

    pub(crate) fn to_offset(&self) -> u64 {
        self.offset.load(SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(
            *self.work.lock().unwrap(),
            ClusterWork::Ready(_) | ClusterWork::Written | ClusterWork::Failed
        )
    }
}

/// One open cluster under construction, user thread only.
pub(crate) struct ClusterBuilder {
    compression: Compression,
    level: i32,
    // blob boundaries relative to the data area, N+1 entries.
    offsets: Vec<u64>,
    providers: Vec<Box<dyn ContentProvider>>,
    handle: Arc<ClusterHandle>,
}

impl ClusterBuilder {
    pub(crate) fn new(compression: Compression, level: i32) -> ClusterBuilder {
        ClusterBuilder {
            compression,
            level,
            offsets: vec![0],
            providers: vec![],
            handle: Arc::new(ClusterHandle::new()),
        }
    }

    pub(crate) fn compression(&self) -> Compression {
        self.compression
    }

    pub(crate) fn count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Accumulated blob bytes, before the offset table.
    pub(crate) fn size(&self) -> u64 {
        *self.offsets.last().unwrap()
    }

    pub(crate) fn handle(&self) -> Arc<ClusterHandle> {
        Arc::clone(&self.handle)
    }

    /// Offset of a blob relative to the data area.
    pub(crate) fn blob_offset(&self, blob: u32) -> u64 {
        self.offsets[blob as usize]
    }

    /// Append a blob; its bytes are pulled from the provider when the
    /// cluster is serialized. Returns the blob index.
    pub(crate) fn add_content(&mut self, provider: Box<dyn ContentProvider>) -> u32 {
        let blob = self.count();
        let next = self.offsets.last().unwrap() + provider.size();
        self.offsets.push(next);
        self.providers.push(provider);
        blob
    }

    /// Close this builder under cluster number `index`, making it
    /// eligible for background compression and writing.
    pub(crate) fn close(self, index: u32) -> Arc<ClusterHandle> {
        self.handle.index.store(index, SeqCst);
        {
            let mut work = self.handle.work.lock().unwrap();
            *work = ClusterWork::Task {
                compression: self.compression,
                level: self.level,
                offsets: self.offsets,
                providers: self.providers,
            };
        }
        self.handle
    }
}

/// Serialize and compress closed-cluster contents into their final
/// on-disk bytes. Returns `(bytes, data_offset)`.
pub(crate) fn serialize_cluster(
    compression: Compression,
    level: i32,
    offsets: Vec<u64>,
    mut providers: Vec<Box<dyn ContentProvider>>,
) -> Result<(Vec<u8>, u64)> {
    let n = offsets.len() as u64; // blobs + 1

    // promote to 64-bit offsets once any table entry would overflow.
    let extended = offsets.last().unwrap() + n * 4 > u32::MAX as u64;
    let elem: u64 = if extended { 8 } else { 4 };
    let table_bytes = n * elem;

    let mut data = Vec::with_capacity((table_bytes + offsets.last().unwrap()) as usize);
    for off in offsets.iter() {
        match extended {
            true => data.extend_from_slice(&(off + table_bytes).to_le_bytes()),
            false => data.extend_from_slice(&((off + table_bytes) as u32).to_le_bytes()),
        }
    }

    for (i, provider) in providers.iter_mut().enumerate() {
        let declared = offsets[i + 1] - offsets[i];
        let mut fed = 0_u64;
        loop {
            let chunk = provider.feed()?;
            if chunk.is_empty() {
                break;
            }
            fed += chunk.len() as u64;
            if fed > declared {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        if fed != declared {
            err_at!(
                Incoherent, msg: "provider for blob {} fed {} bytes, declared {}",
                i, fed, declared
            )?
        }
    }

    let payload = match compression {
        Compression::None => data,
        Compression::Zstd => err_at!(IOError, zstd::encode_all(&data[..], level), "zstd")?,
        Compression::Lzma => {
            use std::io::Write;

            let preset = level.max(0).min(9) as u32;
            let opts = err_at!(IOError, xz2::stream::LzmaOptions::new_preset(preset))?;
            let stream = err_at!(IOError, xz2::stream::Stream::new_lzma_encoder(&opts))?;
            let mut encoder = xz2::write::XzEncoder::new_stream(vec![], stream);
            err_at!(IOError, encoder.write_all(&data), "lzma")?;
            err_at!(IOError, encoder.finish(), "lzma")?
        }
        _ => err_at!(InvalidInput, msg: "unsupported write compression {:?}", compression)?,
    };

    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(compression.to_info_byte(extended));
    out.extend_from_slice(&payload);
    Ok((out, 1 + table_bytes))
}

#[cfg(test)]
#[path = "cluster_test.rs"]
mod cluster_test;
