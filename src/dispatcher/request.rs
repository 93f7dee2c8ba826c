//! Request descriptor handed to handlers and middleware.

use http::Method;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::warn;

use super::response::MAX_INLINE_HEADERS;
use crate::ids::RequestId;
use crate::server::transport::Exchange;

/// Request header list (stack-allocated for the common case)
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request descriptor.
///
/// Fixed after construction except for the per-request [`Env`] state that
/// middleware may set, the lazily opened input stream and the error sink,
/// each of which is initialized at most once.
pub struct Request {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    pub method: Method,
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub headers: HeaderVec,
    pub env: Env,
    input: OnceCell<Input>,
    errors: OnceCell<ErrorSink>,
}

/// Transport handles and per-request state set by middleware.
#[derive(Default)]
pub struct Env {
    exchange: Option<Arc<dyn Exchange>>,
    state: RwLock<HashMap<String, Value>>,
}

impl Env {
    #[must_use]
    pub fn exchange(&self) -> Option<&Arc<dyn Exchange>> {
        self.exchange.as_ref()
    }

    /// Store a value under `key`, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.state.write().insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.read().contains_key(key)
    }
}

/// Lazily opened request body stream.
pub struct Input {
    reader: Mutex<Box<dyn Read + Send>>,
}

impl Input {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }

    /// Read from the underlying stream.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().read(buf)
    }

    /// Read the remainder of the stream.
    pub fn read_to_end(&self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.reader.lock().read_to_end(buf)
    }
}

/// Error output of a request (`jsgi.errors`).
///
/// Every complete line written is emitted as a `warn!` event on the
/// `jsgi::errors` target, tagged with the request id.
#[derive(Clone)]
pub struct ErrorSink {
    request_id: RequestId,
    pending: Arc<Mutex<Vec<u8>>>,
}

impl ErrorSink {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        warn!(target: "jsgi::errors", request_id = %self.request_id, "{}", line.trim_end());
    }
}

impl io::Write for ErrorSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(buf);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            self.emit(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            let line: Vec<u8> = pending.drain(..).collect();
            self.emit(&line);
        }
        Ok(())
    }
}

impl Request {
    #[must_use]
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Bind the error sink. Returns `false` when the request was already
    /// initialized, which happens when the same descriptor is dispatched again.
    pub fn init(&self) -> bool {
        let mut fresh = false;
        self.errors.get_or_init(|| {
            fresh = true;
            ErrorSink::new(self.request_id)
        });
        fresh
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.errors.get().is_some()
    }

    /// The request body stream, opened from the transport on first access.
    ///
    /// A request without a transport reads as empty.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the stream cannot be opened; the
    /// next call tries again.
    pub fn input(&self) -> io::Result<&Input> {
        self.input.get_or_try_init(|| {
            let reader: Box<dyn Read + Send> = match self.env.exchange() {
                Some(exchange) => exchange.open_input()?,
                None => Box::new(io::empty()),
            };
            Ok(Input::new(reader))
        })
    }

    /// Whether the input stream has been opened.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.input.get().is_some()
    }

    /// The error sink; binds it first if `init` was never called.
    #[must_use]
    pub fn errors(&self) -> ErrorSink {
        self.errors
            .get_or_init(|| ErrorSink::new(self.request_id))
            .clone()
    }

    #[must_use]
    pub fn exchange(&self) -> Option<&Arc<dyn Exchange>> {
        self.env.exchange()
    }

    /// Get a header by name (case-insensitive)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Script name and path info joined.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}{}", self.script_name, self.path_info)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("script_name", &self.script_name)
            .field("path_info", &self.path_info)
            .field("query_string", &self.query_string)
            .field("has_transport", &self.env.exchange.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder {
    method: Method,
    script_name: String,
    path_info: String,
    query_string: String,
    scheme: String,
    host: String,
    port: u16,
    headers: HeaderVec,
    exchange: Option<Arc<dyn Exchange>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            method: Method::GET,
            script_name: String::new(),
            path_info: "/".to_string(),
            query_string: String::new(),
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 80,
            headers: HeaderVec::new(),
            exchange: None,
        }
    }
}

impl RequestBuilder {
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self
    }

    /// Path info; a `?query` suffix is split off into the query string.
    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        match path.split_once('?') {
            Some((p, q)) => {
                self.path_info = p.to_string();
                self.query_string = q.to_string();
            }
            None => self.path_info = path.to_string(),
        }
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    #[must_use]
    pub fn exchange(mut self, exchange: Arc<dyn Exchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    #[must_use]
    pub fn build(self) -> Request {
        let request_id = RequestId::from_header_or_new(
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("x-request-id"))
                .map(|(_, v)| v.as_str()),
        );
        Request {
            request_id,
            method: self.method,
            script_name: self.script_name,
            path_info: self.path_info,
            query_string: self.query_string,
            scheme: self.scheme,
            host: self.host,
            port: self.port,
            headers: self.headers,
            env: Env {
                exchange: self.exchange,
                state: RwLock::new(HashMap::new()),
            },
            input: OnceCell::new(),
            errors: OnceCell::new(),
        }
    }
}
