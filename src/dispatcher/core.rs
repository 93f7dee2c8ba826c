use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::request::Request;
use super::resolve::{resolve, App, Resolved};
use super::response::Reply;
use crate::error::{DispatchError, Result};
use crate::registry::{Module, Registry};
use crate::runtime_config::RuntimeConfig;
use crate::server;

/// Result of invoking a handler. `Ok(None)` is an empty result and is
/// rejected by the dispatcher as an invalid response.
pub type HandlerResult = anyhow::Result<Option<Reply>>;

type HandlerFn = dyn Fn(&Request) -> HandlerResult + Send + Sync;
type ProfileFn = dyn Fn(&str) -> Handler + Send + Sync;

const ANONYMOUS: &str = "anonymous";

/// A callable application: takes a request, returns a response description,
/// the async sentinel, or an error.
///
/// Cloning is cheap; clones share the underlying function and compare equal
/// under [`Handler::ptr_eq`].
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    call: Arc<HandlerFn>,
    profiles: Option<Arc<ProfileFn>>,
}

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        Self::named(ANONYMOUS, f)
    }

    pub fn named<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            call: Arc::new(f),
            profiles: None,
        }
    }

    /// Attach an environment-profile hook. When a runtime profile is
    /// configured the dispatcher replaces this handler with `hook(profile)`.
    #[must_use]
    pub fn with_profiles<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Handler + Send + Sync + 'static,
    {
        self.profiles = Some(Arc::new(hook));
        self
    }

    /// Invoke the handler.
    ///
    /// # Errors
    ///
    /// Whatever the application returns.
    pub fn call(&self, req: &Request) -> HandlerResult {
        (self.call)(req)
    }

    /// Handler for `profile`, or `None` when no profile hook is attached.
    #[must_use]
    pub fn for_profile(&self, profile: &str) -> Option<Handler> {
        self.profiles.as_ref().map(|hook| hook(profile))
    }

    #[must_use]
    pub fn has_profiles(&self) -> bool {
        self.profiles.is_some()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when both handles point at the same function.
    #[must_use]
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("profiles", &self.profiles.is_some())
            .finish()
    }
}

/// What to run inside a module: a handler object or an export name.
#[derive(Debug, Clone)]
pub enum Target {
    Function(Handler),
    Export(String),
}

impl From<Handler> for Target {
    fn from(handler: Handler) -> Self {
        Target::Function(handler)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Export(name.to_string())
    }
}

/// Entry point tying resolution, invocation and commit together.
///
/// The module registry is injected; the dispatcher holds no global state
/// and can be shared across transport threads.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn Registry>,
    config: RuntimeConfig,
}

impl Dispatcher {
    /// Dispatcher with configuration read from the environment.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self::with_config(registry, RuntimeConfig::from_env())
    }

    pub fn with_config(registry: Arc<dyn Registry>, config: RuntimeConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Resolve a module target to the handler that will serve the request.
    ///
    /// The module's middleware list wraps the target with its first element
    /// outermost. Afterwards, if a runtime profile is configured and the
    /// composed handler has a profile hook, the hook's handler is returned.
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound` for an export target in an unknown module
    /// - `InvalidApplication` for a missing export or a middleware list
    ///   element that is not a middleware
    pub fn resolve_target(&self, module_id: &str, target: Target) -> Result<Handler> {
        let module = self.registry.resolve(module_id);
        let handler = match target {
            Target::Function(handler) => handler,
            Target::Export(name) => {
                let module = module
                    .as_ref()
                    .ok_or_else(|| DispatchError::ModuleNotFound(module_id.to_string()))?;
                module.export(&name).cloned().ok_or_else(|| {
                    DispatchError::InvalidApplication(format!("{module_id}.{name}"))
                })?
            }
        };

        let handler = match module {
            Some(module) => self.wrap_module(&module, handler)?,
            None => handler,
        };

        Ok(self.apply_profile(handler))
    }

    fn wrap_module(&self, module: &Module, handler: Handler) -> Result<Handler> {
        let mut handler = handler;
        for app in module.middleware().iter().rev() {
            match resolve(app, &*self.registry)? {
                Resolved::Middleware(mw) => handler = mw.wrap(handler),
                Resolved::Handler(h) => {
                    return Err(DispatchError::InvalidApplication(format!(
                        "{}: middleware list entry {} is a handler",
                        module.id(),
                        h.name()
                    )))
                }
            }
        }
        Ok(handler)
    }

    fn apply_profile(&self, handler: Handler) -> Handler {
        let Some(profile) = self.config.profile.as_deref() else {
            return handler;
        };
        match handler.for_profile(profile) {
            Some(profiled) => {
                debug!(profile, handler = %handler.name(), "applied environment profile");
                profiled
            }
            None => handler,
        }
    }

    /// Resolve `target` in `module_id`, run it and commit its response.
    ///
    /// The request's lazy input is initialized first; dispatching the same
    /// request again skips that step.
    ///
    /// # Errors
    ///
    /// Resolution errors, handler errors (propagated unchanged),
    /// `InvalidResponse` for an empty result, and commit errors.
    pub fn handle(&self, module_id: &str, target: Target, request: &Request) -> Result<()> {
        prepare(request);
        let handler = self.resolve_target(module_id, target)?;
        self.invoke(&handler, request)
    }

    /// Like [`Dispatcher::handle`], for any resolvable [`App`].
    ///
    /// # Errors
    ///
    /// As [`Dispatcher::handle`]; an app resolving to a bare middleware is
    /// an `InvalidApplication`.
    pub fn handle_app(&self, app: &App, request: &Request) -> Result<()> {
        prepare(request);
        let handler = resolve(app, &*self.registry)?.into_handler()?;
        let handler = self.apply_profile(handler);
        self.invoke(&handler, request)
    }

    fn invoke(&self, handler: &Handler, request: &Request) -> Result<()> {
        debug!(
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path(),
            handler = %handler.name(),
            "dispatching request"
        );

        let reply = handler.call(request).map_err(|e| match e.downcast::<DispatchError>() {
            Ok(dispatch) => dispatch,
            Err(other) => {
                error!(
                    request_id = %request.request_id,
                    handler = %handler.name(),
                    error = %other,
                    "handler failed"
                );
                DispatchError::Handler(other)
            }
        })?;

        match reply {
            None => Err(DispatchError::InvalidResponse(format!(
                "{} returned no response",
                handler.name()
            ))),
            Some(Reply::Async(response)) => {
                info!(
                    request_id = %request.request_id,
                    state = ?response.state(),
                    "handler switched to async response"
                );
                Ok(())
            }
            Some(Reply::Response(parts)) => server::commit(request, parts),
        }
    }
}

fn prepare(request: &Request) {
    if !request.init() {
        debug!(request_id = %request.request_id, "request already initialized, dispatching again");
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_clone_is_same_function() {
        let h = Handler::named("hello", |_req| Ok(None));
        let other = Handler::named("hello", |_req| Ok(None));
        assert!(h.ptr_eq(&h.clone()));
        assert!(!h.ptr_eq(&other));
        assert_eq!(h.name(), "hello");
    }

    #[test]
    fn test_profile_hook() {
        let prod = Handler::named("prod", |_req| Ok(None));
        let prod_clone = prod.clone();
        let h = Handler::new(|_req| Ok(None)).with_profiles(move |profile| {
            assert_eq!(profile, "production");
            prod_clone.clone()
        });
        assert!(h.has_profiles());
        assert!(h.for_profile("production").unwrap().ptr_eq(&prod));
        assert!(Handler::new(|_req| Ok(None)).for_profile("x").is_none());
    }

    #[test]
    fn test_target_from() {
        assert!(matches!(Target::from("main"), Target::Export(ref n) if n == "main"));
        let h = Handler::new(|_req| Ok(None));
        assert!(matches!(Target::from(h), Target::Function(_)));
    }
}
