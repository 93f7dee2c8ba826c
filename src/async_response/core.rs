use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::queue::WriteQueue;
use crate::dispatcher::request::Request;
use crate::dispatcher::response::{Chunk, Headers};
use crate::error::{DispatchError, Result};
use crate::ids::RequestId;
use crate::runtime_config::{RuntimeConfig, DEFAULT_ASYNC_TIMEOUT_MS};
use crate::server::response::{chunk_bytes, write_headers, Charset};
use crate::server::transport::{
    AsyncContext, AsyncListener, Exchange, OutputChannel, WriteListener,
};

/// Lifecycle state of an [`AsyncResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsyncState {
    Created = 0,
    Started = 1,
    Writing = 2,
    Closed = 3,
    Errored = 4,
}

impl AsyncState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => AsyncState::Created,
            1 => AsyncState::Started,
            2 => AsyncState::Writing,
            3 => AsyncState::Closed,
            _ => AsyncState::Errored,
        }
    }

    /// Closed or errored; nothing is accepted anymore.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AsyncState::Closed | AsyncState::Errored)
    }
}

/// Options for a new [`AsyncResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncOptions {
    /// Completion timeout; `None` never times out
    pub timeout: Option<Duration>,
    /// Flush the channel after each drain while it is ready
    pub auto_flush: bool,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(DEFAULT_ASYNC_TIMEOUT_MS)),
            auto_flush: false,
        }
    }
}

impl AsyncOptions {
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            timeout: config.async_timeout,
            auto_flush: config.auto_flush,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }
}

/// Streaming response written out-of-band after the handler returned.
///
/// Cheap to clone; all clones drive the same exchange. Every method may be
/// called from any thread.
///
/// ```rust,no_run
/// use jsgi_dispatch::async_response::{AsyncOptions, AsyncResponse};
/// use jsgi_dispatch::dispatcher::{Headers, Reply, Request};
///
/// fn handler(req: &Request) -> anyhow::Result<Option<Reply>> {
///     let response = AsyncResponse::new(req, AsyncOptions::default())?;
///     let mut headers = Headers::new();
///     headers.append("Content-Type", "text/plain");
///     response.start(200, &headers)?;
///
///     let writer = response.clone();
///     std::thread::spawn(move || {
///         let _ = writer.write_str("later");
///         writer.close();
///     });
///     Ok(Some(Reply::Async(response)))
/// }
/// ```
#[derive(Clone)]
pub struct AsyncResponse {
    shared: Arc<Shared>,
}

struct Shared {
    request_id: RequestId,
    exchange: Arc<dyn Exchange>,
    context: Arc<dyn AsyncContext>,
    channel: Arc<dyn OutputChannel>,
    queue: OnceCell<WriteQueue>,
    options: AsyncOptions,
    state: AtomicU8,
    links: Mutex<Vec<Arc<Link>>>,
}

impl AsyncResponse {
    /// Switch the request's exchange into async mode.
    ///
    /// Arms the timeout (when finite) and registers a lifecycle listener that
    /// forces completion on timeout and logs everything else.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when the request carries no transport; `Io` when the
    /// transport refuses async mode.
    pub fn new(request: &Request, options: AsyncOptions) -> Result<Self> {
        let exchange = request.exchange().cloned().ok_or_else(|| {
            DispatchError::InvalidRequest(format!(
                "request {} has no transport environment",
                request.request_id
            ))
        })?;

        let context = exchange.start_async()?;
        let channel = exchange.output();
        let shared = Arc::new(Shared {
            request_id: request.request_id,
            exchange,
            context: Arc::clone(&context),
            channel,
            queue: OnceCell::new(),
            options,
            state: AtomicU8::new(AsyncState::Created as u8),
            links: Mutex::new(Vec::new()),
        });

        if let Some(timeout) = options.timeout {
            context.set_timeout(timeout);
        }
        context.add_listener(Arc::new(Lifecycle {
            request_id: request.request_id,
            link: Shared::link(&shared),
        }));

        info!(
            request_id = %request.request_id,
            timeout_ms = options.timeout.map(|t| t.as_millis() as u64),
            auto_flush = options.auto_flush,
            "async response created"
        );
        Ok(Self { shared })
    }

    /// Set the status and send the headers. Only legal right after creation.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` once started or written to, `ResponseClosed` once
    /// closed. Nothing is sent to the transport in either case.
    pub fn start(&self, status: u16, headers: &Headers) -> Result<&Self> {
        if let Err(current) = self.shared.transition(AsyncState::Created, AsyncState::Started) {
            return Err(if current.is_terminal() {
                DispatchError::ResponseClosed
            } else {
                DispatchError::AlreadyStarted
            });
        }
        self.shared.exchange.set_status(status);
        write_headers(&*self.shared.exchange, headers);
        debug!(request_id = %self.shared.request_id, status, "async response started");
        Ok(self)
    }

    /// Queue `data` for the output channel.
    ///
    /// Binary chunks are passed through; text is encoded with `encoding`.
    /// The first write installs the queue as the channel's readiness
    /// callback; later writes also try to drain right away.
    ///
    /// # Errors
    ///
    /// `ResponseClosed` after close, timeout or a channel error.
    pub fn write(&self, data: impl Into<Chunk>, encoding: Charset) -> Result<&Self> {
        self.shared.enter_writing()?;
        self.enqueue(chunk_bytes(data.into(), encoding))?;
        Ok(self)
    }

    fn enqueue(&self, bytes: bytes::Bytes) -> Result<()> {
        let mut created = false;
        let queue = self.shared.queue.get_or_init(|| {
            created = true;
            self.shared.new_queue()
        });
        if !queue.push(bytes) {
            return Err(DispatchError::ResponseClosed);
        }

        if created {
            self.shared.channel.set_write_listener(Arc::new(Drainer {
                link: Shared::link(&self.shared),
            }));
        } else {
            self.shared.drain();
        }
        Ok(())
    }

    /// Queue UTF-8 text.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_str(&self, text: &str) -> Result<&Self> {
        self.write(text, Charset::Utf8)
    }

    /// Queue raw bytes.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_bytes(&self, data: impl Into<bytes::Bytes>) -> Result<&Self> {
        self.write(Chunk::Bytes(data.into()), Charset::Utf8)
    }

    /// Queue a value serialized as JSON text.
    ///
    /// # Errors
    ///
    /// `Handler` when serialization fails, otherwise see [`write`](Self::write).
    pub fn write_json<T: serde::Serialize>(&self, value: &T) -> Result<&Self> {
        let text = serde_json::to_string(value).map_err(anyhow::Error::from)?;
        self.write(text, Charset::Utf8)
    }

    /// Flush the channel if it is ready; never blocks.
    ///
    /// # Errors
    ///
    /// `ResponseClosed` once closed; `Io` when the flush fails, which also
    /// moves the response to `Errored`.
    pub fn flush(&self) -> Result<&Self> {
        if self.state().is_terminal() {
            return Err(DispatchError::ResponseClosed);
        }
        if self.shared.channel.is_ready() {
            if let Err(e) = self.shared.channel.flush() {
                let kind = e.kind();
                self.shared.fail(e);
                return Err(io::Error::new(kind, "flush failed").into());
            }
        }
        Ok(self)
    }

    /// Complete the exchange. Chunks the channel can take right now are
    /// written first; anything still queued is discarded. Idempotent.
    pub fn close(&self) {
        if !self.state().is_terminal() {
            self.shared.drain();
        }
        if self.shared.finish(AsyncState::Closed) {
            debug!(request_id = %self.shared.request_id, "async response closed");
        }
    }

    #[must_use]
    pub fn state(&self) -> AsyncState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Chunks waiting for the channel to become ready.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.get().map_or(0, WriteQueue::len)
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.shared.request_id
    }

    #[must_use]
    pub fn options(&self) -> AsyncOptions {
        self.shared.options
    }
}

impl fmt::Debug for AsyncResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResponse")
            .field("request_id", &self.shared.request_id)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> AsyncState {
        AsyncState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: AsyncState, to: AsyncState) -> std::result::Result<(), AsyncState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(AsyncState::from_u8)
    }

    fn enter_writing(&self) -> Result<()> {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if AsyncState::from_u8(v).is_terminal() {
                    None
                } else {
                    Some(AsyncState::Writing as u8)
                }
            })
            .map(|_| ())
            .map_err(|_| DispatchError::ResponseClosed)
    }

    fn new_queue(&self) -> WriteQueue {
        WriteQueue::new(Arc::clone(&self.channel), self.options.auto_flush)
    }

    /// Strong reference for a transport callback, released on completion.
    fn link(this: &Arc<Self>) -> Arc<Link> {
        let link = Arc::new(Link(Mutex::new(Some(Arc::clone(this)))));
        this.links.lock().push(Arc::clone(&link));
        // finish() may have collected the links before this one was added
        if this.state().is_terminal() {
            link.release();
        }
        link
    }

    fn drain(&self) {
        let Some(queue) = self.queue.get() else {
            return;
        };
        if let Err(e) = queue.drain() {
            self.fail(e);
        }
    }

    /// Move to a terminal state and complete the exchange. Returns `false`
    /// when another path already finished it.
    fn finish(&self, terminal: AsyncState) -> bool {
        let previous = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (!AsyncState::from_u8(v).is_terminal()).then_some(terminal as u8)
            });
        if previous.is_err() {
            return false;
        }
        // a queue first created by a racing write is born closed
        let discarded = self.queue.get_or_init(|| self.new_queue()).close();
        if discarded > 0 {
            warn!(request_id = %self.request_id, discarded, "queued chunks discarded on completion");
        }
        self.context.complete();

        let links = std::mem::take(&mut *self.links.lock());
        for link in links {
            link.release();
        }
        true
    }

    fn fail(&self, e: io::Error) {
        error!(request_id = %self.request_id, error = %e, "async response channel error");
        self.finish(AsyncState::Errored);
    }

    fn expire(&self) {
        if self.finish(AsyncState::Closed) {
            warn!(request_id = %self.request_id, "async response timed out");
        }
    }
}

/// Keeps the response alive from the transport side until it completes.
struct Link(Mutex<Option<Arc<Shared>>>);

impl Link {
    fn get(&self) -> Option<Arc<Shared>> {
        self.0.lock().clone()
    }

    fn release(&self) {
        let shared = self.0.lock().take();
        drop(shared);
    }
}

/// Readiness callback installed on the output channel by the first write.
struct Drainer {
    link: Arc<Link>,
}

impl WriteListener for Drainer {
    fn on_writable(&self) {
        if let Some(shared) = self.link.get() {
            shared.drain();
        }
    }

    fn on_error(&self, error: io::Error) {
        match self.link.get() {
            Some(shared) => shared.fail(error),
            None => debug!(error = %error, "channel error after async response completed"),
        }
    }
}

/// Async lifecycle listener; only the timeout changes state.
struct Lifecycle {
    request_id: RequestId,
    link: Arc<Link>,
}

impl AsyncListener for Lifecycle {
    fn on_complete(&self) {
        debug!(request_id = %self.request_id, "async exchange complete");
    }

    fn on_error(&self, error: &io::Error) {
        warn!(request_id = %self.request_id, error = %error, "async exchange error");
    }

    fn on_start_async(&self) {
        debug!(request_id = %self.request_id, "async mode re-entered");
    }

    fn on_timeout(&self) {
        if let Some(shared) = self.link.get() {
            shared.expire();
        }
    }
}
