//! # Dispatcher Module
//!
//! Resolves an application, runs it on the calling transport thread and
//! commits whatever it returns.
//!
//! ## Overview
//!
//! - [`resolve`] turns an [`App`] (module name, handler, middleware or a
//!   middleware stack) into a [`Handler`] or a middleware
//! - [`Dispatcher::handle`] is the per-request entry point: it initializes
//!   the request, resolves the module target, invokes the handler and hands
//!   a synchronous [`Reply::Response`] to the response committer
//! - A handler that returns [`Reply::Async`] owns the output from then on;
//!   the dispatcher returns immediately
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use jsgi_dispatch::dispatcher::{Dispatcher, Handler, Reply, Request, ResponseParts, Target};
//! use jsgi_dispatch::registry::{Module, ModuleRegistry};
//! use jsgi_dispatch::server::MemoryExchange;
//!
//! let registry = Arc::new(ModuleRegistry::new());
//! registry.register(Module::new("hello").with_export(
//!     "index",
//!     Handler::named("index", |_req| {
//!         Ok(Some(Reply::Response(ResponseParts::text(200, "text/plain", "hi"))))
//!     }),
//! ));
//!
//! let exchange = Arc::new(MemoryExchange::new());
//! let request = Request::builder().path("/").exchange(exchange.clone()).build();
//!
//! let dispatcher = Dispatcher::new(registry);
//! dispatcher.handle("hello", Target::from("index"), &request).unwrap();
//! assert_eq!(exchange.status(), Some(200));
//! assert_eq!(exchange.channel().written(), b"hi");
//! ```
//!
//! ## Errors
//!
//! Resolution failures are configuration errors (`InvalidApplication`,
//! `ModuleNotFound`). Handler errors propagate to the caller unchanged. An
//! empty handler result is an `InvalidResponse`.

mod core;
pub mod request;
mod resolve;
pub mod response;

pub use self::core::{Dispatcher, Handler, HandlerResult, Target};
pub use self::request::{Env, ErrorSink, HeaderVec, Input, Request, RequestBuilder};
pub use self::resolve::{resolve, App, Resolved};
pub use self::response::{
    Body, BodyStream, Chunk, ChunkSink, Headers, IterBody, Reply, Response, ResponseParts,
    MAX_INLINE_HEADERS,
};
