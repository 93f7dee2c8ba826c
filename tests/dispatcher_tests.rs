//! Tests for handler resolution and request dispatch
//!
//! # Test Coverage
//!
//! - Resolution of names, handlers and middleware stacks against a registry
//! - `Dispatcher::handle` for function and export targets
//! - Module middleware lists and environment profiles
//! - Empty results, handler errors and configuration errors
//! - Re-dispatching an already initialized request

mod common;

use std::sync::Arc;

use common::{call_log, dispatcher, exchange_request, logging_handler, recording_middleware, text_handler};
use jsgi_dispatch::dispatcher::{resolve, App, Handler, Reply, Resolved, Target};
use jsgi_dispatch::registry::{Module, ModuleRegistry, Registry};
use jsgi_dispatch::runtime_config::RuntimeConfig;
use jsgi_dispatch::{DispatchError, Dispatcher};

#[test]
fn test_resolve_name_returns_handle_request_unchanged() {
    let registry = ModuleRegistry::new();
    let handler = text_handler("main", 200, "hi");
    registry.register(Module::new("app").with_handle_request(handler.clone()));

    match resolve(&App::name("app"), &registry).unwrap() {
        Resolved::Handler(resolved) => assert!(resolved.ptr_eq(&handler)),
        other => panic!("expected handler, got {other:?}"),
    }
}

#[test]
fn test_resolve_prefers_middleware_list() {
    let log = call_log();
    let registry = ModuleRegistry::new();
    registry.register(
        Module::new("app")
            .with_handle_request(text_handler("unused", 500, "wrong"))
            .with_middleware(vec![
                App::Middleware(recording_middleware("outer", &log)),
                App::Handler(logging_handler(&log)),
            ]),
    );

    let handler = resolve(&App::name("app"), &registry)
        .unwrap()
        .into_handler()
        .unwrap();
    let (exchange, request) = exchange_request("/");
    let reply = handler.call(&request).unwrap();

    assert!(matches!(reply, Some(Reply::Response(ref parts)) if parts.status == Some(200)));
    assert_eq!(*log.lock(), vec!["outer:before", "handler", "outer:after"]);
    assert!(!exchange.touched());
}

#[test]
fn test_resolve_nested_stacks_and_names() {
    let log = call_log();
    let registry = ModuleRegistry::new();
    registry.register(Module::new("auth").with_middleware(vec![App::Middleware(
        recording_middleware("auth", &log),
    )]));

    let app = App::Stack(vec![
        App::name("auth"),
        App::Stack(vec![
            App::Middleware(recording_middleware("inner", &log)),
            App::Handler(logging_handler(&log)),
        ]),
    ]);
    let handler = resolve(&app, &registry).unwrap().into_handler().unwrap();
    let (_exchange, request) = exchange_request("/");
    handler.call(&request).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["auth:before", "inner:before", "handler", "inner:after", "auth:after"]
    );
}

#[test]
fn test_resolve_rejects_handler_in_outer_position() {
    let registry = ModuleRegistry::new();
    let app = App::Stack(vec![
        App::Handler(text_handler("a", 200, "a")),
        App::Handler(text_handler("b", 200, "b")),
    ]);
    let err = resolve(&app, &registry).unwrap_err();
    assert!(matches!(err, DispatchError::InvalidApplication(_)));
}

#[test]
fn test_handle_export_commits_response() {
    let registry = Arc::new(ModuleRegistry::new());
    registry.register(Module::new("site").with_export("index", text_handler("index", 201, "made")));

    let (exchange, request) = exchange_request("/items");
    dispatcher(registry)
        .handle("site", Target::from("index"), &request)
        .unwrap();

    assert_eq!(exchange.status(), Some(201));
    assert_eq!(exchange.header_values("Content-Type"), vec!["text/plain"]);
    assert_eq!(exchange.channel().written(), b"made");
}

#[test]
fn test_handle_function_target_wrapped_by_module_middleware() {
    let log = call_log();
    let registry = Arc::new(ModuleRegistry::new());
    registry.register(Module::new("site").with_middleware(vec![
        App::Middleware(recording_middleware("m1", &log)),
        App::Middleware(recording_middleware("m2", &log)),
    ]));

    let (exchange, request) = exchange_request("/");
    dispatcher(registry)
        .handle("site", Target::Function(logging_handler(&log)), &request)
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec!["m1:before", "m2:before", "handler", "m2:after", "m1:after"]
    );
    assert_eq!(exchange.status(), Some(200));
}

#[test]
fn test_handle_missing_export_is_invalid_application() {
    let registry = Arc::new(ModuleRegistry::new());
    registry.register(Module::new("site"));

    let (exchange, request) = exchange_request("/");
    let err = dispatcher(registry)
        .handle("site", Target::from("nope"), &request)
        .unwrap_err();

    match err {
        DispatchError::InvalidApplication(what) => assert_eq!(what, "site.nope"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!exchange.touched());
}

#[test]
fn test_handle_unknown_module() {
    let (_exchange, request) = exchange_request("/");
    let err = dispatcher(Arc::new(ModuleRegistry::new()))
        .handle("ghost", Target::from("main"), &request)
        .unwrap_err();
    assert!(matches!(err, DispatchError::ModuleNotFound(ref id) if id == "ghost"));
    assert!(err.is_configuration());
}

#[test]
fn test_empty_result_is_invalid_response() {
    let registry = Arc::new(ModuleRegistry::new());
    let (exchange, request) = exchange_request("/");
    let err = dispatcher(registry)
        .handle("any", Target::Function(Handler::named("empty", |_req| Ok(None))), &request)
        .unwrap_err();

    assert!(matches!(err, DispatchError::InvalidResponse(ref msg) if msg.contains("empty")));
    assert!(!exchange.touched());
}

#[test]
fn test_handler_error_propagates() {
    let registry = Arc::new(ModuleRegistry::new());
    let (_exchange, request) = exchange_request("/");
    let failing = Handler::new(|_req| Err(anyhow::anyhow!("database unavailable")));

    let err = dispatcher(registry)
        .handle("any", Target::Function(failing), &request)
        .unwrap_err();

    assert!(matches!(err, DispatchError::Handler(_)));
    assert_eq!(err.to_string(), "database unavailable");
}

#[test]
fn test_dispatch_error_from_handler_keeps_its_kind() {
    let registry = Arc::new(ModuleRegistry::new());
    let (_exchange, request) = exchange_request("/");
    let failing = Handler::new(|_req| Err(DispatchError::InvalidRequest("bad".into()).into()));

    let err = dispatcher(registry)
        .handle("any", Target::Function(failing), &request)
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));
}

#[test]
fn test_profile_hook_selects_handler() {
    let registry = Arc::new(ModuleRegistry::new());
    let handler = text_handler("default", 200, "default").with_profiles(|profile| {
        assert_eq!(profile, "staging");
        text_handler("staging", 200, "staging")
    });
    registry.register(Module::new("site").with_export("main", handler));

    let config = RuntimeConfig::default().with_profile("staging");
    let dispatcher = Dispatcher::with_config(Arc::clone(&registry) as Arc<dyn Registry>, config);
    let (exchange, request) = exchange_request("/");
    dispatcher.handle("site", Target::from("main"), &request).unwrap();
    assert_eq!(exchange.channel().written(), b"staging");

    let (exchange, request) = exchange_request("/");
    common::dispatcher(registry)
        .handle("site", Target::from("main"), &request)
        .unwrap();
    assert_eq!(exchange.channel().written(), b"default");
}

#[test]
fn test_redispatch_skips_initialization() {
    let registry = Arc::new(ModuleRegistry::new());
    registry.register(Module::new("site").with_export("index", text_handler("index", 200, "x")));
    let dispatcher = dispatcher(registry);

    let (_exchange, request) = exchange_request("/");
    assert!(!request.is_initialized());
    dispatcher.handle("site", Target::from("index"), &request).unwrap();
    assert!(request.is_initialized());
    dispatcher.handle("site", Target::from("index"), &request).unwrap();
    assert!(request.is_initialized());
}

#[test]
fn test_handle_app_with_stack() {
    let log = call_log();
    let registry = Arc::new(ModuleRegistry::new());
    let app = App::Stack(vec![
        App::Middleware(recording_middleware("only", &log)),
        App::Handler(logging_handler(&log)),
    ]);

    let (exchange, request) = exchange_request("/");
    dispatcher(registry).handle_app(&app, &request).unwrap();

    assert_eq!(*log.lock(), vec!["only:before", "handler", "only:after"]);
    assert_eq!(exchange.channel().written(), b"ok");
}

#[test]
fn test_handle_app_bare_middleware_is_invalid() {
    let log = call_log();
    let registry = Arc::new(ModuleRegistry::new());
    let app = App::Middleware(recording_middleware("lonely", &log));
    let (_exchange, request) = exchange_request("/");

    let err = dispatcher(registry).handle_app(&app, &request).unwrap_err();
    assert!(matches!(err, DispatchError::InvalidApplication(_)));
    assert!(log.lock().is_empty());
}
