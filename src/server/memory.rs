//! In-process transport.
//!
//! Records everything the dispatch layer does to an exchange so that tests and
//! the demo binary can run requests without a socket. The output channel's
//! readiness is controlled by the caller, which makes it possible to exercise
//! partial drains and readiness callbacks deterministically.

use bytes::Bytes;
use may::coroutine;
use parking_lot::Mutex;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::transport::{AsyncContext, AsyncListener, Exchange, OutputChannel, WriteListener};

/// Output channel backed by memory.
///
/// Starts ready. Once a write listener is registered the channel behaves
/// like a non-blocking socket: writes issued while not ready fail with
/// `WouldBlock`.
pub struct MemoryChannel {
    ready: AtomicBool,
    chunks: Mutex<Vec<Bytes>>,
    listener: Mutex<Option<Arc<dyn WriteListener>>>,
    fail_next_write: AtomicBool,
    write_calls: AtomicUsize,
    flushes: AtomicUsize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            chunks: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            fail_next_write: AtomicBool::new(false),
            write_calls: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }
}

impl MemoryChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle readiness. A not-ready to ready edge notifies the write listener
    /// on the calling thread.
    pub fn set_ready(&self, ready: bool) {
        let was_ready = self.ready.swap(ready, Ordering::SeqCst);
        if ready && !was_ready {
            if let Some(listener) = self.listener() {
                listener.on_writable();
            }
        }
    }

    /// Make the next write fail with `BrokenPipe`.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Report a transport-side error to the write listener.
    pub fn report_error(&self, error: io::Error) {
        if let Some(listener) = self.listener() {
            listener.on_error(error);
        }
    }

    /// Every successful write, in order.
    #[must_use]
    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().clone()
    }

    /// All written bytes concatenated.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.chunks.lock().iter().flat_map(|c| c.iter().copied()).collect()
    }

    /// Number of write calls that reached the channel, including failed ones.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    fn listener(&self) -> Option<Arc<dyn WriteListener>> {
        self.listener.lock().clone()
    }
}

impl OutputChannel for MemoryChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
        }
        if self.has_listener() && !self.is_ready() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "write issued while channel not ready",
            ));
        }
        self.chunks.lock().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_write_listener(&self, listener: Arc<dyn WriteListener>) {
        *self.listener.lock() = Some(Arc::clone(&listener));
        if self.is_ready() {
            listener.on_writable();
        }
    }
}

/// Async context of a [`MemoryExchange`].
///
/// Completion is idempotent: listeners see `on_complete` exactly once no
/// matter how many times `complete` is called or from which thread.
pub struct MemoryAsyncContext {
    state: Arc<ContextState>,
}

struct ContextState {
    completed: AtomicBool,
    completions: AtomicUsize,
    timeouts: AtomicUsize,
    timer_generation: AtomicU64,
    listeners: Mutex<Vec<Arc<dyn AsyncListener>>>,
}

impl ContextState {
    fn listeners(&self) -> Vec<Arc<dyn AsyncListener>> {
        self.listeners.lock().clone()
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.completions.fetch_add(1, Ordering::SeqCst);
        debug!("memory exchange completed");
        for listener in self.listeners() {
            listener.on_complete();
        }
    }

    fn fire_timeout(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        self.timeouts.fetch_add(1, Ordering::SeqCst);
        for listener in self.listeners() {
            listener.on_timeout();
        }
        // Containers complete a timed-out exchange nobody completed.
        self.complete();
    }
}

impl MemoryAsyncContext {
    fn new() -> Self {
        Self {
            state: Arc::new(ContextState {
                completed: AtomicBool::new(false),
                completions: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
                timer_generation: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fire the timeout now, as if the armed timer elapsed.
    pub fn fire_timeout(&self) {
        self.state.fire_timeout();
    }

    /// Report a transport error to the lifecycle listeners.
    pub fn report_error(&self, error: &io::Error) {
        for listener in self.state.listeners() {
            listener.on_error(error);
        }
    }

    /// Number of times completion actually took effect (0 or 1).
    #[must_use]
    pub fn completions(&self) -> usize {
        self.state.completions.load(Ordering::SeqCst)
    }

    /// Number of times the timeout fired on an open exchange.
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.state.timeouts.load(Ordering::SeqCst)
    }

    fn notify_restart(&self) {
        for listener in self.state.listeners() {
            listener.on_start_async();
        }
    }
}

impl AsyncContext for MemoryAsyncContext {
    fn set_timeout(&self, timeout: Duration) {
        let generation = self.state.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if timeout.is_zero() || self.is_completed() {
            return;
        }
        let state: Weak<ContextState> = Arc::downgrade(&self.state);
        // SAFETY: may::coroutine::spawn() is marked unsafe by the may runtime.
        // Safe because: the closure is Send + 'static and only holds a Weak
        // reference, so a dropped exchange simply ends the timer.
        let spawned = unsafe {
            coroutine::Builder::new()
                .name("jsgi-async-timeout".to_string())
                .spawn(move || {
                    coroutine::sleep(timeout);
                    if let Some(state) = state.upgrade() {
                        if state.timer_generation.load(Ordering::SeqCst) == generation {
                            state.fire_timeout();
                        }
                    }
                })
        };
        if let Err(e) = spawned {
            warn!(error = %e, "failed to arm async timeout");
        }
    }

    fn add_listener(&self, listener: Arc<dyn AsyncListener>) {
        self.state.listeners.lock().push(listener);
    }

    fn complete(&self) {
        self.state.complete();
    }

    fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ResponseRecord {
    status: Option<u16>,
    headers: Vec<(String, String)>,
}

/// Exchange backed by memory.
pub struct MemoryExchange {
    response: Mutex<ResponseRecord>,
    committed: AtomicBool,
    input: Vec<u8>,
    channel: Arc<MemoryChannel>,
    context: Mutex<Option<Arc<MemoryAsyncContext>>>,
    input_opens: AtomicUsize,
}

impl Default for MemoryExchange {
    fn default() -> Self {
        Self::with_input(Vec::new())
    }
}

impl MemoryExchange {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchange whose request body is `input`.
    #[must_use]
    pub fn with_input(input: impl Into<Vec<u8>>) -> Self {
        Self {
            response: Mutex::new(ResponseRecord::default()),
            committed: AtomicBool::new(false),
            input: input.into(),
            channel: Arc::new(MemoryChannel::new()),
            context: Mutex::new(None),
            input_opens: AtomicUsize::new(0),
        }
    }

    /// Mark status and headers as already sent, as if the application wrote
    /// to the transport directly.
    pub fn mark_committed(&self) {
        self.committed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response.lock().status
    }

    /// Header lines in the order they were added.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.response.lock().headers.clone()
    }

    /// All values of a header, case-insensitive on the name.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.response
            .lock()
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    #[must_use]
    pub fn channel(&self) -> Arc<MemoryChannel> {
        Arc::clone(&self.channel)
    }

    /// The async context, once async mode was entered.
    #[must_use]
    pub fn async_context(&self) -> Option<Arc<MemoryAsyncContext>> {
        self.context.lock().clone()
    }

    /// How many times the raw input stream was opened.
    #[must_use]
    pub fn input_opens(&self) -> usize {
        self.input_opens.load(Ordering::SeqCst)
    }

    /// True once anything observable was sent: status, headers or body bytes.
    #[must_use]
    pub fn touched(&self) -> bool {
        let record = self.response.lock();
        record.status.is_some() || !record.headers.is_empty() || self.channel.write_calls() > 0
    }
}

impl Exchange for MemoryExchange {
    fn start_async(&self) -> io::Result<Arc<dyn AsyncContext>> {
        let mut slot = self.context.lock();
        if let Some(existing) = slot.as_ref() {
            let existing = Arc::clone(existing);
            drop(slot);
            existing.notify_restart();
            return Ok(existing);
        }
        let context = Arc::new(MemoryAsyncContext::new());
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    fn is_async_started(&self) -> bool {
        self.context.lock().is_some()
    }

    fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: u16) {
        self.response.lock().status = Some(status);
    }

    fn add_header(&self, name: &str, value: &str) {
        self.response
            .lock()
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn output(&self) -> Arc<dyn OutputChannel> {
        Arc::clone(&self.channel) as Arc<dyn OutputChannel>
    }

    fn open_input(&self) -> io::Result<Box<dyn Read + Send>> {
        self.input_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(self.input.clone())))
    }
}
