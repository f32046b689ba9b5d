//! Module `workers` implement the creator's background threads.
//!
//! N workers drain a bounded task queue, serializing and compressing
//! closed clusters. One writer thread drains the to-write queue in
//! strict FIFO order, waiting on each cluster to finish compressing
//! before appending its bytes, so cluster bytes land in the file in the
//! order the clusters were closed. Errors raised on any thread are
//! parked in a shared slot and re-raised on the user thread.

use fs2::FileExt;
use log::debug;

use std::{
    fs,
    sync::{atomic::Ordering::SeqCst, mpsc, Arc, Mutex},
    thread,
};

use crate::{
    creator::cluster::{serialize_cluster, ClusterHandle, ClusterWork},
    err_at,
    util::thread::Rx,
    write_file, Error, Result,
};

/// Bound on both queues, backpressuring the user thread.
pub(crate) const MAX_QUEUE_SIZE: usize = 10;

pub(crate) enum Task {
    Cluster(Arc<ClusterHandle>),
    Shutdown,
}

/// Compression worker pool over one shared task queue.
pub(crate) struct Workers {
    threads: Vec<thread::JoinHandle<()>>,
    tx: Option<mpsc::SyncSender<Task>>,
}

impl Workers {
    pub(crate) fn new(nb_workers: usize, fail: Arc<Mutex<Option<Error>>>) -> Workers {
        let (tx, rx) = mpsc::sync_channel(MAX_QUEUE_SIZE);
        let rx = Arc::new(Mutex::new(rx));

        let mut threads = vec![];
        for _ in 0..std::cmp::max(1, nb_workers) {
            let (rx, fail) = (Arc::clone(&rx), Arc::clone(&fail));
            threads.push(thread::spawn(move || worker(rx, fail)));
        }

        Workers {
            threads,
            tx: Some(tx),
        }
    }

    pub(crate) fn post(&self, handle: Arc<ClusterHandle>) -> Result<()> {
        match &self.tx {
            Some(tx) => err_at!(IPCFail, tx.send(Task::Cluster(handle))),
            None => err_at!(IPCFail, msg: "workers already shut down"),
        }
    }

    /// Drain the pool: one shutdown sentinel per worker, then join.
    pub(crate) fn close_wait(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            for _ in 0..self.threads.len() {
                err_at!(IPCFail, tx.send(Task::Shutdown))?
            }
        }
        for handle in self.threads.drain(..) {
            match handle.join() {
                Ok(()) => (),
                Err(err) => err_at!(ThreadFail, msg: "worker panicked {:?}", err)?,
            }
        }
        Ok(())
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.close_wait().ok();
    }
}

fn worker(rx: Arc<Mutex<mpsc::Receiver<Task>>>, fail: Arc<Mutex<Option<Error>>>) {
    loop {
        let task = { rx.lock().unwrap().recv() };
        match task {
            Ok(Task::Cluster(handle)) => run_task(handle, &fail),
            Ok(Task::Shutdown) | Err(_) => break,
        }
    }
}

fn run_task(handle: Arc<ClusterHandle>, fail: &Arc<Mutex<Option<Error>>>) {
    let work = {
        let mut work = handle.work.lock().unwrap();
        std::mem::replace(&mut *work, ClusterWork::Open)
    };
    let (compression, level, offsets, providers) = match work {
        ClusterWork::Task {
            compression,
            level,
            offsets,
            providers,
        } => (compression, level, offsets, providers),
        other => {
            *handle.work.lock().unwrap() = other;
            return;
        }
    };

    debug!(
        target: "zimw  ",
        "compressing cluster {} with {} blobs", handle.to_index(), offsets.len() - 1
    );

    match serialize_cluster(compression, level, offsets, providers) {
        Ok((bytes, data_offset)) => {
            handle.data_offset.store(data_offset, SeqCst);
            *handle.work.lock().unwrap() = ClusterWork::Ready(bytes);
        }
        Err(err) => {
            fail.lock().unwrap().get_or_insert(err);
            *handle.work.lock().unwrap() = ClusterWork::Failed;
        }
    }
    handle.done.notify_all();
}

/// Writer thread main loop: pop cluster handles FIFO, wait for each to
/// finish compressing, stamp its byte offset and append its bytes.
/// Returns the output handle and the final write position.
pub(crate) fn cluster_writer(
    mut fd: fs::File,
    rx: Rx<Arc<ClusterHandle>, ()>,
    fail: Arc<Mutex<Option<Error>>>,
    mut fpos: u64,
) -> Result<(fs::File, u64)> {
    let mut failure: Option<Error> = None;

    if let Err(err) = fd.lock_shared() {
        let prefix = format!("{}:{}", file!(), line!());
        failure = Some(Error::IOError(prefix, format!("{}", err)));
    }

    for (handle, _) in rx {
        if failure.is_some() {
            // drain the queue so the user thread never blocks on a
            // bounded channel to a dead writer.
            continue;
        }

        let bytes: Result<Vec<u8>> = {
            let mut work = handle.work.lock().unwrap();
            loop {
                match &*work {
                    ClusterWork::Ready(_) => {
                        match std::mem::replace(&mut *work, ClusterWork::Written) {
                            ClusterWork::Ready(bytes) => break Ok(bytes),
                            _ => unreachable!(),
                        }
                    }
                    ClusterWork::Failed => {
                        break err_at!(
                            Fatal, msg: "cluster {} failed to compress", handle.to_index()
                        )
                    }
                    _ => work = handle.done.wait(work).unwrap(),
                }
            }
        };

        match bytes {
            Ok(bytes) => {
                handle.offset.store(fpos, SeqCst);
                debug!(
                    target: "zimw  ",
                    "writing cluster {} at {} ({} bytes)",
                    handle.to_index(), fpos, bytes.len()
                );
                match write_file!(fd, &bytes, "zim-tmpfile", "writing cluster") {
                    Ok(_) => fpos += bytes.len() as u64,
                    Err(err) => {
                        fail.lock().unwrap().get_or_insert(err.clone());
                        failure = Some(err);
                    }
                }
            }
            Err(err) => {
                fail.lock().unwrap().get_or_insert(err.clone());
                failure = Some(err);
            }
        }
    }

    fd.unlock().ok();
    match failure {
        Some(err) => Err(err),
        None => Ok((fd, fpos)),
    }
}
