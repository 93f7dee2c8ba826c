use serde_json::Value;
use tracing::{debug, warn};

use super::transport::Exchange;
use crate::dispatcher::request::Request;
use crate::dispatcher::response::{Chunk, Headers, Response, ResponseParts};
use crate::error::{DispatchError, Result};

/// Presence of this response header (any value) leaves output to whatever the
/// application already wrote to the transport.
pub const SKIP_RESPONSE_HEADER: &str = "X-JSGI-Skip-Response";

/// Character encodings usable for text body chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    /// Charset from a charset name; unknown names fall back to UTF-8.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Charset::Latin1,
            "us-ascii" | "ascii" => Charset::Ascii,
            _ => Charset::Utf8,
        }
    }

    /// Charset named by the `charset` parameter of a `Content-Type` value.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        content_type
            .and_then(|ct| {
                ct.split(';').skip(1).find_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    key.trim()
                        .eq_ignore_ascii_case("charset")
                        .then(|| Charset::from_name(value))
                })
            })
            .unwrap_or_default()
    }

    /// Encode text; characters outside the charset become `?`.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        let limit = match self {
            Charset::Utf8 => return text.as_bytes().to_vec(),
            Charset::Latin1 => 0xFF,
            Charset::Ascii => 0x7F,
        };
        text.chars()
            .map(|c| if (c as u32) <= limit { c as u8 } else { b'?' })
            .collect()
    }
}

/// Convert a chunk to bytes, passing binary data through unchanged.
#[must_use]
pub fn chunk_bytes(chunk: Chunk, charset: Charset) -> bytes::Bytes {
    match chunk {
        Chunk::Bytes(b) => b,
        Chunk::Text(s) => bytes::Bytes::from(charset.encode(&s)),
    }
}

/// Write headers to the exchange.
///
/// A string value is split on `\n` into repeated header lines. An array value
/// emits one line per element. Any other value is skipped.
pub fn write_headers(exchange: &dyn Exchange, headers: &Headers) {
    for (name, value) in headers.iter() {
        match value {
            Value::String(s) => {
                for line in s.split('\n') {
                    exchange.add_header(name, line);
                }
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => exchange.add_header(name, s),
                        other => exchange.add_header(name, &other.to_string()),
                    }
                }
            }
            other => {
                debug!(header = %name, value = %other, "skipping non-string header value");
            }
        }
    }
}

/// Commit a handler's response to the request's transport in one pass.
///
/// No-op when the exchange already switched to async mode, when the
/// transport reports the response committed, or when the headers carry
/// [`SKIP_RESPONSE_HEADER`].
///
/// # Errors
///
/// - `InvalidRequest` when the request has no transport
/// - `InvalidResponse` when status, headers or body is missing; nothing is written
/// - `BodyNotIterable` when the body cannot be iterated; status and headers
///   are already set at that point but no body byte is written
/// - `Io` when the output channel fails
pub fn commit(request: &Request, parts: ResponseParts) -> Result<()> {
    let exchange = request
        .exchange()
        .ok_or_else(|| DispatchError::InvalidRequest("request has no transport".to_string()))?;

    if exchange.is_async_started() {
        debug!(request_id = %request.request_id, "exchange is async, skipping commit");
        return Ok(());
    }

    let Response {
        status,
        headers,
        body,
    } = Response::from_parts(parts)?;

    if exchange.is_committed() || headers.contains(SKIP_RESPONSE_HEADER) {
        debug!(
            request_id = %request.request_id,
            committed = exchange.is_committed(),
            "response already written by application"
        );
        return Ok(());
    }

    exchange.set_status(status);
    write_headers(&**exchange, &headers);

    let charset = Charset::from_content_type(headers.get_str("Content-Type"));
    let output = exchange.output();
    let mut written = 0usize;
    let result = body.write_to(&mut |chunk| {
        let bytes = chunk_bytes(chunk, charset);
        written += bytes.len();
        output.write(&bytes)
    });
    if let Err(e) = &result {
        warn!(request_id = %request.request_id, status, error = %e, "response commit failed");
    }
    result?;
    output.flush()?;

    debug!(request_id = %request.request_id, status, bytes = written, "response committed");
    Ok(())
}
