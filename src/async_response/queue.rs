//! FIFO write queue with readiness-gated draining.
//!
//! Any number of threads may [`push`](WriteQueue::push); draining is
//! triggered both by producers right after they enqueue and by the channel's
//! readiness callback. A `draining` flag guarantees at most one drain runs at
//! a time, so chunks reach the channel in exactly the order they were pushed.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::server::transport::OutputChannel;

pub struct WriteQueue {
    chunks: Mutex<VecDeque<Bytes>>,
    draining: AtomicBool,
    closed: AtomicBool,
    channel: Arc<dyn OutputChannel>,
    auto_flush: bool,
}

impl WriteQueue {
    pub fn new(channel: Arc<dyn OutputChannel>, auto_flush: bool) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channel,
            auto_flush,
        }
    }

    /// Append a chunk. Returns `false` once the queue is closed.
    pub fn push(&self, chunk: Bytes) -> bool {
        let mut chunks = self.chunks.lock();
        // checked under the lock so close() cannot interleave with the push
        if self.is_closed() {
            return false;
        }
        chunks.push_back(chunk);
        true
    }

    /// Write queued chunks while the channel is ready.
    ///
    /// Returns the number of chunks written by this call. Returns early when
    /// another drain is in progress; that drain re-checks the queue before it
    /// exits, so nothing pushed in the meantime is stranded.
    ///
    /// # Errors
    ///
    /// Any channel error other than `WouldBlock`. The failed chunk is dropped.
    pub fn drain(&self) -> io::Result<usize> {
        let mut written = 0;
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Ok(written);
            }
            let result = self.drain_ready(&mut written);
            self.draining.store(false, Ordering::SeqCst);
            result?;

            if self.is_closed() || self.is_empty() || !self.channel.is_ready() {
                return Ok(written);
            }
        }
    }

    fn drain_ready(&self, written: &mut usize) -> io::Result<()> {
        while !self.is_closed() && self.channel.is_ready() {
            let Some(chunk) = self.chunks.lock().pop_front() else {
                break;
            };
            match self.channel.write(&chunk) {
                Ok(()) => *written += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // readiness dropped between the check and the write
                    self.chunks.lock().push_front(chunk);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if self.auto_flush && self.channel.is_ready() {
            self.channel.flush()?;
        }
        trace!(written = *written, queued = self.len(), "drain pass finished");
        Ok(())
    }

    /// Stop accepting and writing chunks. Returns how many were discarded.
    pub fn close(&self) -> usize {
        let mut chunks = self.chunks.lock();
        self.closed.store(true, Ordering::SeqCst);
        let discarded = chunks.len();
        chunks.clear();
        discarded
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}
