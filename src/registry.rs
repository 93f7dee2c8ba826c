use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::dispatcher::{App, Handler};

/// Module lookup by id.
pub trait Registry: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Arc<Module>>;
}

/// A loaded application module: metadata, an optional `handle_request`
/// entry point, a middleware list and named exported handlers.
#[derive(Clone, Default)]
pub struct Module {
    id: String,
    path: Option<String>,
    uri: Option<String>,
    handle_request: Option<Handler>,
    middleware: Vec<App>,
    exports: HashMap<String, Handler>,
}

impl Module {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_handle_request(mut self, handler: Handler) -> Self {
        self.handle_request = Some(handler);
        self
    }

    /// Set the middleware list. The first entry is the outermost.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Vec<App>) -> Self {
        self.middleware = middleware;
        self
    }

    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.exports.insert(name.into(), handler);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    #[must_use]
    pub fn handle_request(&self) -> Option<&Handler> {
        self.handle_request.as_ref()
    }

    #[must_use]
    pub fn middleware(&self) -> &[App] {
        &self.middleware
    }

    #[must_use]
    pub fn export(&self, name: &str) -> Option<&Handler> {
        self.exports.get(name)
    }

    /// Exported names, sorted.
    #[must_use]
    pub fn export_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("uri", &self.uri)
            .field("handle_request", &self.handle_request.is_some())
            .field("middleware", &self.middleware.len())
            .field("exports", &self.export_names())
            .finish()
    }
}

/// In-memory registry.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<Module>>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its id, replacing any previous module.
    pub fn register(&self, module: Module) -> Option<Arc<Module>> {
        let id = module.id().to_string();
        let previous = self.modules.write().insert(id.clone(), Arc::new(module));
        if previous.is_some() {
            warn!(module = %id, "replacing registered module");
        } else {
            debug!(module = %id, "registered module");
        }
        previous
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Module>> {
        self.modules.read().get(id).map(Arc::clone)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Module>> {
        self.modules.write().remove(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl Registry for ModuleRegistry {
    fn resolve(&self, id: &str) -> Option<Arc<Module>> {
        self.get(id)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_register_replaces_and_warns() {
        let registry = ModuleRegistry::new();
        assert!(registry.register(Module::new("app").with_path("/srv/app.js")).is_none());
        let previous = registry.register(Module::new("app").with_uri("file:///srv/app.js"));

        assert_eq!(previous.unwrap().path(), Some("/srv/app.js"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("app").unwrap().uri(), Some("file:///srv/app.js"));
        assert!(logs_contain("replacing registered module"));
    }

    #[test]
    fn test_remove() {
        let registry = ModuleRegistry::new();
        registry.register(Module::new("a"));
        registry.register(Module::new("b"));
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert!(registry.remove("a").is_some());
        assert!(registry.resolve("a").is_none());
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_exports() {
        let module = Module::new("m")
            .with_export("b", Handler::new(|_req| Ok(None)))
            .with_export("a", Handler::new(|_req| Ok(None)));
        assert_eq!(module.export_names(), vec!["a", "b"]);
        assert!(module.export("c").is_none());
    }
}
