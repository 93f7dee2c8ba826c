//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use jsgi_dispatch::dispatcher::{Handler, Reply, Request, ResponseParts};
use jsgi_dispatch::middleware::{around, MiddlewareRef};
use jsgi_dispatch::registry::ModuleRegistry;
use jsgi_dispatch::runtime_config::RuntimeConfig;
use jsgi_dispatch::server::{Exchange, MemoryExchange};
use jsgi_dispatch::Dispatcher;
use parking_lot::Mutex;

/// Call log shared between middleware and handlers under test.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Exchange plus a request bound to it.
pub fn exchange_request(path: &str) -> (Arc<MemoryExchange>, Request) {
    let exchange = Arc::new(MemoryExchange::new());
    let request = Request::builder()
        .path(path)
        .exchange(Arc::clone(&exchange) as Arc<dyn Exchange>)
        .build();
    (exchange, request)
}

/// Dispatcher with default configuration, independent of the environment.
pub fn dispatcher(registry: Arc<ModuleRegistry>) -> Dispatcher {
    Dispatcher::with_config(registry, RuntimeConfig::default())
}

pub fn text_handler(name: &str, status: u16, body: &'static str) -> Handler {
    Handler::named(name, move |_req| {
        Ok(Some(Reply::Response(ResponseParts::text(
            status,
            "text/plain",
            body,
        ))))
    })
}

/// Handler that records its invocation before answering 200.
pub fn logging_handler(log: &CallLog) -> Handler {
    let log = Arc::clone(log);
    Handler::named("handler", move |_req| {
        log.lock().push("handler".to_string());
        Ok(Some(Reply::Response(ResponseParts::text(200, "text/plain", "ok"))))
    })
}

/// Middleware that records `name:before` and `name:after` around the inner
/// handler.
pub fn recording_middleware(name: &'static str, log: &CallLog) -> MiddlewareRef {
    let log = Arc::clone(log);
    around(name, move |req, next| {
        log.lock().push(format!("{name}:before"));
        let out = next.call(req);
        log.lock().push(format!("{name}:after"));
        out
    })
}
