//! # CLI Module
//!
//! The `jsgi-dispatch` binary: registers a demo module, dispatches a single
//! request over the in-memory transport and prints what the transport
//! recorded.
//!
//! ```bash
//! jsgi-dispatch --path '/greet?name=x'
//! jsgi-dispatch --async --chunks 5 --log-format json
//! ```
//!
//! The demo module exports `hello` (synchronous) and `stream` (an async
//! response written from a coroutine) and carries a middleware list of
//! request tracing plus an `X-Powered-By` header.

mod commands;
mod demo;

#[cfg(test)]
mod tests;

pub use commands::{run, run_cli, Cli, DemoOutput, LogFormatArg};
pub use demo::{demo_registry, DEMO_MODULE};
