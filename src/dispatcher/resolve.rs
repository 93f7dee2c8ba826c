use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::core::Handler;
use crate::error::{DispatchError, Result};
use crate::middleware::{compose, Chain, MiddlewareRef};
use crate::registry::Registry;

/// Anything the resolver can turn into a handler or a middleware.
#[derive(Clone)]
pub enum App {
    /// Module id looked up in the registry
    Name(String),
    Handler(Handler),
    Middleware(MiddlewareRef),
    /// Middleware stack; the last element is the innermost app
    Stack(Vec<App>),
}

impl App {
    pub fn name(id: impl Into<String>) -> Self {
        App::Name(id.into())
    }
}

impl From<Handler> for App {
    fn from(handler: Handler) -> Self {
        App::Handler(handler)
    }
}

impl From<MiddlewareRef> for App {
    fn from(mw: MiddlewareRef) -> Self {
        App::Middleware(mw)
    }
}

impl From<Vec<App>> for App {
    fn from(stack: Vec<App>) -> Self {
        App::Stack(stack)
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            App::Name(id) => f.debug_tuple("Name").field(id).finish(),
            App::Handler(h) => f.debug_tuple("Handler").field(&h.name()).finish(),
            App::Middleware(mw) => f.debug_tuple("Middleware").field(&mw.name()).finish(),
            App::Stack(items) => f.debug_tuple("Stack").field(items).finish(),
        }
    }
}

/// Outcome of resolving an [`App`].
#[derive(Clone)]
pub enum Resolved {
    Handler(Handler),
    Middleware(MiddlewareRef),
}

impl Resolved {
    /// The handler, or `InvalidApplication` naming the middleware.
    ///
    /// # Errors
    ///
    /// When this resolved to a middleware.
    pub fn into_handler(self) -> Result<Handler> {
        match self {
            Resolved::Handler(h) => Ok(h),
            Resolved::Middleware(mw) => Err(DispatchError::InvalidApplication(format!(
                "middleware {} is not a handler",
                mw.name()
            ))),
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Handler(h) => f.debug_tuple("Handler").field(&h.name()).finish(),
            Resolved::Middleware(mw) => f.debug_tuple("Middleware").field(&mw.name()).finish(),
        }
    }
}

/// Resolve `app` against `registry`.
///
/// - A handler is returned unchanged.
/// - A name is looked up; a module's non-empty middleware list is preferred
///   over its `handle_request` handler.
/// - A stack is folded right-to-left: every element except the last must
///   resolve to a middleware and wraps the accumulated app.
///
/// # Errors
///
/// `ModuleNotFound` for unknown names and `InvalidApplication` for anything
/// that cannot be turned into a handler or middleware.
pub fn resolve(app: &App, registry: &dyn Registry) -> Result<Resolved> {
    match app {
        App::Handler(h) => Ok(Resolved::Handler(h.clone())),
        App::Middleware(mw) => Ok(Resolved::Middleware(Arc::clone(mw))),
        App::Name(id) => {
            let module = registry
                .resolve(id)
                .ok_or_else(|| DispatchError::ModuleNotFound(id.clone()))?;
            if !module.middleware().is_empty() {
                debug!(module = %id, entries = module.middleware().len(), "resolving module middleware list");
                return resolve_stack(module.middleware(), registry, id);
            }
            module
                .handle_request()
                .cloned()
                .map(Resolved::Handler)
                .ok_or_else(|| {
                    DispatchError::InvalidApplication(format!(
                        "module {id} has neither handle_request nor middleware"
                    ))
                })
        }
        App::Stack(items) => resolve_stack(items, registry, "stack"),
    }
}

fn resolve_stack(items: &[App], registry: &dyn Registry, label: &str) -> Result<Resolved> {
    let Some((last, outer)) = items.split_last() else {
        return Err(DispatchError::InvalidApplication(format!(
            "{label}: empty middleware stack"
        )));
    };

    let mut wrappers = Vec::with_capacity(outer.len());
    for item in outer {
        match resolve(item, registry)? {
            Resolved::Middleware(mw) => wrappers.push(mw),
            Resolved::Handler(h) => {
                return Err(DispatchError::InvalidApplication(format!(
                    "{label}: {} is a handler but is not the innermost entry",
                    h.name()
                )))
            }
        }
    }

    Ok(match resolve(last, registry)? {
        Resolved::Handler(h) => Resolved::Handler(compose(&wrappers, h)),
        Resolved::Middleware(mw) => {
            wrappers.push(mw);
            Resolved::Middleware(Arc::new(Chain::new(wrappers)))
        }
    })
}
