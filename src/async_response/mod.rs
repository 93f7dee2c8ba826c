//! # Async Response Module
//!
//! Long-lived, push-style responses. A handler creates an [`AsyncResponse`],
//! which switches the exchange into async mode, and returns it as
//! [`Reply::Async`](crate::dispatcher::Reply::Async). From then on the
//! response is written out-of-band from any thread until it is closed, times
//! out, or the channel fails.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Started -> Writing* -> Closed | Errored
//! ```
//!
//! Writes go through a [`WriteQueue`]: producers enqueue, and the queue drains
//! onto the non-blocking output channel whenever it reports ready, either
//! right after an enqueue or from the channel's readiness callback.

mod core;
mod queue;

pub use self::core::{AsyncOptions, AsyncResponse, AsyncState};
pub use self::queue::WriteQueue;
