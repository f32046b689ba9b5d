//! Module `thread` implement a generic multi-threading pattern.
//!
//! Inspired from the gen-server model, where every thread holds onto its
//! own state and all inter-thread communication is handled via channels
//! and message queues.

use std::{mem, sync::mpsc, thread};

use crate::{err_at, Error, Result};

/// Thread type, providing gen-server pattern to do multi-threading.
///
/// When a thread value is dropped, it is made sure that there are no
/// dangling thread routines. To achieve this, the thread's main loop
/// should handle the _disconnect_ signal on its [Rx] channel, and
/// callers should use `join()` to get the thread's final result.
pub struct Thread<Q, R = (), T = ()> {
    name: String,
    inner: Option<Inner<Q, R, T>>,
}

struct Inner<Q, R, T> {
    handle: thread::JoinHandle<T>,
    tx: Option<Tx<Q, R>>,
}

impl<Q, R, T> Inner<Q, R, T> {
    fn join(mut self) -> Result<T> {
        mem::drop(self.tx.take());

        match self.handle.join() {
            Ok(val) => Ok(val),
            Err(err) => err_at!(ThreadFail, msg: "fail {:?}", err),
        }
    }
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.join().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Create a new Thread instance, using an asynchronous channel with
    /// infinite buffer. `main_loop` shall be called with the rx side of
    /// the channel and shall return a function that can be spawned using
    /// thread::spawn.
    pub fn new<F, N>(name: &str, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(main_loop(rx));

        Thread {
            name: name.to_string(),
            inner: Some(Inner {
                handle,
                tx: Some(Tx::N(tx)),
            }),
        }
    }

    /// Create a new Thread instance, using a synchronous channel with
    /// finite buffer.
    pub fn new_sync<F, N>(name: &str, chan_size: usize, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::sync_channel(chan_size);
        let handle = thread::spawn(main_loop(rx));

        Thread {
            name: name.to_string(),
            inner: Some(Inner {
                handle,
                tx: Some(Tx::S(tx)),
            }),
        }
    }

    /// Recommended way to exit/shutdown the thread. Note that all [Tx]
    /// clones of this thread must also be dropped for this call to
    /// return.
    pub fn join(mut self) -> Result<T> {
        self.inner.take().unwrap().join()
    }

    /// Return name of this thread.
    pub fn to_name(&self) -> String {
        self.name.to_string()
    }

    /// Return a clone of the tx channel.
    pub fn to_tx(&self) -> Tx<Q, R> {
        match self.inner.as_ref() {
            Some(inner) => inner.tx.as_ref().unwrap().clone(),
            None => unreachable!(),
        }
    }
}

/// IPC type, that enumerates as either [mpsc::Sender] or
/// [mpsc::SyncSender] channel.
pub enum Tx<Q, R = ()> {
    N(mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>),
    S(mpsc::SyncSender<(Q, Option<mpsc::Sender<R>>)>),
}

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        match self {
            Tx::N(tx) => Tx::N(tx.clone()),
            Tx::S(tx) => Tx::S(tx.clone()),
        }
    }
}

impl<Q, R> Tx<Q, R> {
    /// Post a message to thread and don't wait for response.
    pub fn post(&self, msg: Q) -> Result<()> {
        match self {
            Tx::N(tx) => err_at!(IPCFail, tx.send((msg, None)))?,
            Tx::S(tx) => err_at!(IPCFail, tx.send((msg, None)))?,
        };
        Ok(())
    }

    /// Send a request message to thread and wait for a response.
    pub fn request(&self, request: Q) -> Result<R> {
        let (stx, srx) = mpsc::channel();
        match self {
            Tx::N(tx) => err_at!(IPCFail, tx.send((request, Some(stx))))?,
            Tx::S(tx) => err_at!(IPCFail, tx.send((request, Some(stx))))?,
        }
        err_at!(IPCFail, srx.recv())
    }
}

/// IPC type, that shall be passed to the thread's main loop.
///
/// Refer to [Thread::new] for details.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;
