use std::sync::Arc;
use std::time::Duration;

use may::coroutine;
use tracing::warn;

use crate::async_response::{AsyncOptions, AsyncResponse};
use crate::dispatcher::{App, Handler, Headers, Reply, ResponseParts};
use crate::middleware::{around, MiddlewareRef, TracingMiddleware};
use crate::registry::{Module, ModuleRegistry};

/// Id of the module registered by [`demo_registry`].
pub const DEMO_MODULE: &str = "demo";

const CHUNK_INTERVAL: Duration = Duration::from_millis(5);

/// Registry holding the demo module.
///
/// Exports `hello` (synchronous text response) and `stream` (async response
/// writing `chunks` lines from a coroutine). Its middleware list wraps every
/// export in request tracing and a `X-Powered-By` header.
#[must_use]
pub fn demo_registry(chunks: usize) -> ModuleRegistry {
    let registry = ModuleRegistry::new();
    let hello = hello_handler();
    registry.register(
        Module::new(DEMO_MODULE)
            .with_path("demo.rs")
            .with_handle_request(hello.clone())
            .with_middleware(vec![
                App::Middleware(Arc::new(TracingMiddleware)),
                App::Middleware(powered_by()),
            ])
            .with_export("hello", hello)
            .with_export("stream", stream_handler(chunks)),
    );
    registry
}

fn hello_handler() -> Handler {
    Handler::named("hello", |req| {
        let body = format!("Hello from {}\n", req.path());
        Ok(Some(Reply::Response(ResponseParts::text(
            200,
            "text/plain; charset=utf-8",
            body,
        ))))
    })
}

fn powered_by() -> MiddlewareRef {
    around("powered-by", |req, next| {
        let reply = next.call(req)?;
        Ok(reply.map(|reply| match reply {
            Reply::Response(parts) => Reply::Response(parts.header("X-Powered-By", "jsgi-dispatch")),
            other => other,
        }))
    })
}

fn stream_handler(chunks: usize) -> Handler {
    Handler::named("stream", move |req| {
        let response = AsyncResponse::new(req, AsyncOptions::default().auto_flush(true))?;
        let headers: Headers = [("Content-Type", "text/plain; charset=utf-8")]
            .into_iter()
            .collect();
        response.start(200, &headers)?;

        let writer = response.clone();
        // SAFETY: may::coroutine::spawn() is marked unsafe by the may runtime.
        // Safe because: the closure owns a cloned handle whose state is
        // Send + Sync, and no thread-local state is touched.
        let _stream = unsafe {
            coroutine::Builder::new()
                .name("jsgi-demo-stream".to_string())
                .spawn(move || {
                    for i in 0..chunks {
                        if let Err(e) = writer.write_str(&format!("chunk {i}\n")) {
                            warn!(error = %e, "demo stream stopped");
                            break;
                        }
                        coroutine::sleep(CHUNK_INTERVAL);
                    }
                    writer.close();
                })
        }?;

        Ok(Some(Reply::Async(response)))
    })
}
