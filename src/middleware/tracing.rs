use std::time::Instant;

use tracing::{field, info_span};

use super::Middleware;
use crate::dispatcher::{Handler, Reply};

/// Wraps a handler in a `request` span recording method, path, status and
/// latency.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn wrap(&self, inner: Handler) -> Handler {
        let label = format!("tracing({})", inner.name());
        Handler::named(&label, move |req| {
            let span = info_span!(
                "request",
                request_id = %req.request_id,
                method = %req.method,
                path = %req.path(),
                handler = %inner.name(),
                status = field::Empty,
                mode = field::Empty,
                latency_ms = field::Empty,
            );
            let _guard = span.enter();
            let start = Instant::now();

            let result = inner.call(req);

            match &result {
                Ok(Some(Reply::Response(parts))) => {
                    if let Some(status) = parts.status {
                        span.record("status", status);
                    }
                    span.record("mode", "sync");
                }
                Ok(Some(Reply::Async(_))) => {
                    span.record("mode", "async");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "handler failed"),
            }
            span.record("latency_ms", start.elapsed().as_millis() as u64);
            result
        })
    }
}
