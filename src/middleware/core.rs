use std::fmt;
use std::sync::Arc;

use crate::dispatcher::{Handler, HandlerResult, Request};

/// Handler-transforming function: receives the inner handler and returns the
/// handler that wraps it.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn wrap(&self, inner: Handler) -> Handler;
}

/// Shared middleware reference, as stored in stacks and module exports
pub type MiddlewareRef = Arc<dyn Middleware>;

/// Middleware built from a closure over the request and the inner handler.
///
/// ```rust
/// use jsgi_dispatch::middleware::around;
///
/// let mw = around("request-counter", |req, next| {
///     req.env.insert("counted", true);
///     next.call(req)
/// });
/// ```
pub fn around<F>(name: &str, f: F) -> MiddlewareRef
where
    F: Fn(&Request, &Handler) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(Around {
        name: name.to_string(),
        f: Arc::new(f),
    })
}

type AroundFn = dyn Fn(&Request, &Handler) -> HandlerResult + Send + Sync;

struct Around {
    name: String,
    f: Arc<AroundFn>,
}

impl Middleware for Around {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, inner: Handler) -> Handler {
        let f = Arc::clone(&self.f);
        let label = format!("{}({})", self.name, inner.name());
        Handler::named(&label, move |req| f(req, &inner))
    }
}

/// Apply `stack` to `handler` right-to-left, so the first middleware is the
/// outermost: `[m1, m2, m3]` yields `m1(m2(m3(handler)))`.
#[must_use]
pub fn compose(stack: &[MiddlewareRef], handler: Handler) -> Handler {
    stack.iter().rev().fold(handler, |inner, mw| mw.wrap(inner))
}

/// Ordered middleware stack that acts as a single middleware.
#[derive(Clone, Default)]
pub struct Chain {
    stack: Vec<MiddlewareRef>,
}

impl Chain {
    #[must_use]
    pub fn new(stack: Vec<MiddlewareRef>) -> Self {
        Self { stack }
    }

    /// Add a middleware inside all existing ones.
    pub fn push(&mut self, mw: MiddlewareRef) {
        self.stack.push(mw);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl Middleware for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    fn wrap(&self, inner: Handler) -> Handler {
        compose(&self.stack, inner)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stack.iter().map(|m| m.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Reply, ResponseParts};
    use parking_lot::Mutex;

    fn tracer(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> MiddlewareRef {
        around(name, move |req, next| {
            log.lock().push(format!("{name}:before"));
            let out = next.call(req);
            log.lock().push(format!("{name}:after"));
            out
        })
    }

    #[test]
    fn test_first_listed_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = Arc::clone(&log);
        let handler = Handler::new(move |_req| {
            inner_log.lock().push("handler".to_string());
            Ok(Some(Reply::Response(ResponseParts::new(204))))
        });
        let stack = vec![
            tracer("m1", Arc::clone(&log)),
            tracer("m2", Arc::clone(&log)),
            tracer("m3", Arc::clone(&log)),
        ];

        let composed = compose(&stack, handler);
        composed.call(&Request::builder().build()).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "m1:before", "m2:before", "m3:before", "handler", "m3:after", "m2:after",
                "m1:after"
            ]
        );
        assert_eq!(composed.name(), "m1(m2(m3(anonymous)))");
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let handler = Handler::new(|_req| Ok(None));
        let wrapped = Chain::default().wrap(handler.clone());
        assert!(wrapped.ptr_eq(&handler));
    }
}
