//! # jsgi-dispatch
//!
//! Request dispatch from a "handler takes a request, returns a response"
//! application model onto a servlet-like transport that can answer either
//! synchronously or with a long-lived, push-style async response.
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - Request descriptor, response descriptor, handler
//!   resolution and the per-request [`Dispatcher`](dispatcher::Dispatcher)
//! - **[`middleware`]** - Handler-wrapping middleware and right-to-left
//!   composition
//! - **[`registry`]** - Module lookup by id, injected into the dispatcher
//! - **[`server`]** - Transport traits, the synchronous response committer
//!   and an in-memory transport
//! - **[`async_response`]** - Async response handle with a thread-safe,
//!   readiness-gated write queue
//! - **[`logging`]**, **[`runtime_config`]** - Environment-driven setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant T as Transport thread
//!     participant D as Dispatcher
//!     participant R as Registry
//!     participant H as Handler
//!     participant C as Committer
//!     participant A as AsyncResponse
//!
//!     T->>D: handle(module, target, request)
//!     D->>D: request.init()
//!     D->>R: resolve(module)
//!     R-->>D: Module { exports, middleware }
//!     D->>D: compose middleware, apply profile
//!     D->>H: call(request)
//!     alt synchronous
//!         H-->>D: Reply::Response(parts)
//!         D->>C: commit(request, parts)
//!         C->>T: status, headers, body chunks
//!     else async
//!         H->>A: AsyncResponse::new(request)
//!         H-->>D: Reply::Async(handle)
//!         D-->>T: return
//!         Note over A,T: any thread writes; the queue drains<br/>whenever the channel is ready
//!         A->>T: complete() on close, timeout or error
//!     end
//! ```
//!
//! ## Runtime Considerations
//!
//! The crate uses the `may` coroutine runtime for timers and background
//! writers, not tokio. Handlers run on the calling transport thread; only
//! [`AsyncResponse`](async_response::AsyncResponse) is meant to be shared
//! across threads after the handler returns.

pub mod async_response;
pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod registry;
pub mod runtime_config;
pub mod server;

pub use async_response::{AsyncOptions, AsyncResponse, AsyncState};
pub use dispatcher::{App, Dispatcher, Handler, Reply, Request, ResponseParts, Target};
pub use error::{DispatchError, Result};
pub use ids::RequestId;
pub use registry::{Module, ModuleRegistry, Registry};
pub use runtime_config::RuntimeConfig;
