//! Boundary with the connection-oriented transport.
//!
//! The transport owns sockets, TLS and HTTP parsing. This crate only needs the
//! handful of operations below, modeled after a servlet container: an exchange
//! that can switch into async mode, an async context with timeout and
//! lifecycle listeners, and a non-blocking output channel gated by readiness.
//!
//! All methods take `&self`; implementations are shared between the handling
//! thread, the transport's callback thread and application writer threads.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

/// One request/response exchange on the transport.
pub trait Exchange: Send + Sync {
    /// Switch the exchange into async mode. Calling it again returns the
    /// existing context and notifies listeners with `on_start_async`.
    fn start_async(&self) -> io::Result<Arc<dyn AsyncContext>>;

    /// Whether the exchange is in async mode.
    fn is_async_started(&self) -> bool;

    /// Whether status and headers have already been sent.
    fn is_committed(&self) -> bool;

    fn set_status(&self, status: u16);

    /// Append a header line; repeated names produce repeated lines.
    fn add_header(&self, name: &str, value: &str);

    /// The response output channel.
    fn output(&self) -> Arc<dyn OutputChannel>;

    /// Open the raw request input stream.
    fn open_input(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// Context of an exchange in async mode.
pub trait AsyncContext: Send + Sync {
    /// Arm the completion timeout. Has no effect once completed.
    fn set_timeout(&self, timeout: Duration);

    fn add_listener(&self, listener: Arc<dyn AsyncListener>);

    /// Finish the exchange. Repeated calls are no-ops.
    fn complete(&self);

    fn is_completed(&self) -> bool;
}

/// Lifecycle notifications for an async exchange.
pub trait AsyncListener: Send + Sync {
    fn on_complete(&self) {}
    fn on_error(&self, _error: &io::Error) {}
    fn on_start_async(&self) {}
    fn on_timeout(&self) {}
}

/// Non-blocking response output channel.
pub trait OutputChannel: Send + Sync {
    /// Whether a write can be issued now without blocking.
    fn is_ready(&self) -> bool;

    fn write(&self, data: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()>;

    /// Register the readiness callback. Implementations call
    /// [`WriteListener::on_writable`] once on registration if the channel is
    /// already ready, and again on every not-ready to ready transition.
    fn set_write_listener(&self, listener: Arc<dyn WriteListener>);
}

/// Readiness callback for an [`OutputChannel`].
pub trait WriteListener: Send + Sync {
    fn on_writable(&self);
    fn on_error(&self, error: io::Error);
}
