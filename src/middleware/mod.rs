mod core;
mod tracing;

pub use self::core::{around, compose, Chain, Middleware, MiddlewareRef};
pub use self::tracing::TracingMiddleware;
