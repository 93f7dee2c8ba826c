//! Response descriptors returned by handlers.
//!
//! Handlers build a [`ResponseParts`]; the committer turns it into a
//! [`Response`] through [`Response::from_parts`], the only place where the
//! presence of status, headers and body is checked.

use bytes::Bytes;
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::async_response::AsyncResponse;
use crate::error::{DispatchError, Result};

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Ordered header mapping of name to a JSON value.
///
/// Strings may carry several lines separated by `\n`, arrays carry one line
/// per element. Other values are kept as given and skipped on commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(SmallVec<[(Arc<str>, Value); MAX_INLINE_HEADERS]>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header without replacing earlier entries of the same name.
    pub fn append(&mut self, name: &str, value: impl Into<Value>) {
        self.0.push((Arc::from(name), value.into()));
    }

    /// Replace all entries of `name` (case-insensitive) with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.append(name, value);
    }

    /// First value of `name`, case-insensitive.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value of `name` when it is a string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

/// One piece of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Binary data, written as-is
    Bytes(Bytes),
    /// Text, encoded with the response charset
    Text(String),
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Text(s.to_string())
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Text(s)
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Bytes(b)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(b: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(b))
    }
}

/// Sink a body writes its chunks into.
pub type ChunkSink<'a> = dyn FnMut(Chunk) -> io::Result<()> + 'a;

/// A lazily produced sequence of body chunks.
pub trait BodyStream: Send {
    /// Feed every chunk, in order, into `sink`.
    fn for_each(&mut self, sink: &mut ChunkSink<'_>) -> io::Result<()>;

    /// Called after iteration finished; may emit trailing chunks.
    fn close(&mut self, _sink: &mut ChunkSink<'_>) -> io::Result<()> {
        Ok(())
    }
}

/// [`BodyStream`] over any iterator of chunks.
pub struct IterBody<I> {
    iter: I,
}

impl<I> BodyStream for IterBody<I>
where
    I: Iterator<Item = Chunk> + Send,
{
    fn for_each(&mut self, sink: &mut ChunkSink<'_>) -> io::Result<()> {
        for chunk in self.iter.by_ref() {
            sink(chunk)?;
        }
        Ok(())
    }
}

/// Response body.
pub enum Body {
    Stream(Box<dyn BodyStream>),
    /// A JSON array iterates its elements as text chunks; any other value
    /// cannot be iterated.
    Value(Value),
}

impl Body {
    /// Body from an iterator of anything convertible to [`Chunk`].
    pub fn chunks<I, C>(iter: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        C: Into<Chunk> + 'static,
    {
        Body::Stream(Box::new(IterBody {
            iter: iter.into_iter().map(Into::into),
        }))
    }

    /// Single text chunk body.
    pub fn text(s: impl Into<String>) -> Self {
        Body::chunks(std::iter::once(Chunk::Text(s.into())))
    }

    pub fn stream(stream: impl BodyStream + 'static) -> Self {
        Body::Stream(Box::new(stream))
    }

    /// Feed the body into `sink`, then run its close hook.
    ///
    /// # Errors
    ///
    /// `BodyNotIterable` for a non-array value body, before anything reaches
    /// `sink`; `Io` when the sink fails.
    pub fn write_to(self, sink: &mut ChunkSink<'_>) -> Result<()> {
        match self {
            Body::Stream(mut stream) => {
                stream.for_each(sink)?;
                stream.close(sink)?;
                Ok(())
            }
            Body::Value(Value::Array(items)) => {
                for item in items {
                    let chunk = match item {
                        Value::String(s) => Chunk::Text(s),
                        other => Chunk::Text(other.to_string()),
                    };
                    sink(chunk)?;
                }
                Ok(())
            }
            Body::Value(other) => Err(DispatchError::BodyNotIterable(other.to_string())),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
            Body::Value(v) => write!(f, "Body::Value({})", v),
        }
    }
}

/// Unvalidated response descriptor as returned by a handler.
#[derive(Debug, Default)]
pub struct ResponseParts {
    pub status: Option<u16>,
    pub headers: Option<Headers>,
    pub body: Option<Body>,
}

impl ResponseParts {
    /// Parts with a status, empty headers and no body yet.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status: Some(status),
            headers: Some(Headers::new()),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.headers.get_or_insert_with(Headers::new).append(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Complete text response with a `Content-Type` header.
    #[must_use]
    pub fn text(status: u16, content_type: &str, text: impl Into<String>) -> Self {
        Self::new(status)
            .header("Content-Type", content_type)
            .body(Body::text(text))
    }
}

/// Validated response descriptor.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    /// Validate that status, headers and body are all present.
    ///
    /// # Errors
    ///
    /// `InvalidResponse` naming the descriptor when a field is missing.
    pub fn from_parts(parts: ResponseParts) -> Result<Self> {
        match parts {
            ResponseParts {
                status: Some(status),
                headers: Some(headers),
                body: Some(body),
            } => Ok(Response {
                status,
                headers,
                body,
            }),
            incomplete => Err(DispatchError::InvalidResponse(describe(&incomplete))),
        }
    }
}

fn describe(parts: &ResponseParts) -> String {
    let mut missing = Vec::new();
    if parts.status.is_none() {
        missing.push("status");
    }
    if parts.headers.is_none() {
        missing.push("headers");
    }
    if parts.body.is_none() {
        missing.push("body");
    }
    format!("{:?} (missing {})", parts, missing.join(", "))
}

/// What a handler hands back to the dispatcher.
#[derive(Debug)]
pub enum Reply {
    /// Commit this response synchronously
    Response(ResponseParts),
    /// The handler switched to async mode and owns output from now on
    Async(AsyncResponse),
}

impl From<ResponseParts> for Reply {
    fn from(parts: ResponseParts) -> Self {
        Reply::Response(parts)
    }
}

impl From<AsyncResponse> for Reply {
    fn from(response: AsyncResponse) -> Self {
        Reply::Async(response)
    }
}
