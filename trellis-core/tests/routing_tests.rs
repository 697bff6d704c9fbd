use parking_lot::Mutex;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use trellis_core::{Config, Context, Engine, HttpRequest, Result};

type Log = Arc<Mutex<Vec<String>>>;

fn tag(log: &Log, name: &str) -> impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static {
    let log = log.clone();
    let name = name.to_string();
    move |ctx: &mut Context| {
        log.lock().push(name.clone());
        ctx.next()
    }
}

#[test]
fn test_group_inheritance_is_snapshot() {
    let log: Log = Arc::default();
    let mut engine = Engine::default();

    engine.use_middleware(tag(&log, "root-early"));
    let api = engine.new_group("/api");
    api.get("/users", tag(&log, "users"));
    engine.use_middleware(tag(&log, "root-late"));

    let service = engine.handler().unwrap();
    service.serve(HttpRequest::new("GET", "/api/users"));

    assert_eq!(*log.lock(), vec!["root-early", "users"]);
}

#[test]
fn test_router_middleware_applies_to_earlier_routes() {
    let log: Log = Arc::default();
    let mut engine = Engine::default();

    engine.get("/", tag(&log, "index"));
    engine.use_middleware(tag(&log, "registered-later"));

    let service = engine.handler().unwrap();
    service.serve(HttpRequest::new("GET", "/"));

    assert_eq!(*log.lock(), vec!["registered-later", "index"]);
}

#[test]
fn test_nested_groups_and_params() {
    let mut engine = Engine::default();
    engine
        .new_group("/api")
        .new_group("v2")
        .get("/users/:id/files/*rest", |ctx| {
            let body = format!(
                "{}:{}",
                ctx.param("id").unwrap_or("-"),
                ctx.param("rest").unwrap_or("-")
            );
            ctx.text(body, 200)
        });

    let service = engine.handler().unwrap();
    let resp = service.serve(HttpRequest::new("GET", "/api/v2/users/17/files/a/b.txt"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "17:a/b.txt");
}

#[test]
fn test_not_found_and_method_not_allowed() {
    let mut engine = Engine::default();
    engine.get("/items", |ctx| ctx.text("list", 200));
    engine.post("/items", |ctx| ctx.text("create", 201));

    let service = engine.handler().unwrap();

    let resp = service.serve(HttpRequest::new("GET", "/nothing"));
    assert_eq!((resp.status, resp.text()), (404, "Not Found".to_string()));

    let resp = service.serve(HttpRequest::new("DELETE", "/items"));
    assert_eq!(resp.status, 405);
    assert_eq!(resp.text(), "Method Not Allowed");
    assert_eq!(resp.header("allow"), Some("GET, POST"));
}

#[test]
fn test_global_options() {
    let mut engine = Engine::default();
    engine.get("/items", |ctx| ctx.next());
    engine.put("/items", |ctx| ctx.next());

    let service = engine.handler().unwrap();
    let resp = service.serve(HttpRequest::new("OPTIONS", "/items"));
    assert_eq!(resp.status, 204);
    assert_eq!(resp.header("allow"), Some("GET, PUT, OPTIONS"));
}

#[test]
fn test_custom_hooks() {
    let mut engine = Engine::default();
    engine.get("/only-get", |ctx| ctx.next());
    engine.on_not_found(|ctx| ctx.text("nope", 404));
    engine.on_method_not_allowed(|ctx| ctx.text("wrong verb", 405));
    engine.on_global_options(|ctx| {
        ctx.set_header("x-options", "1");
        ctx.text("", 200)
    });

    let service = engine.handler().unwrap();
    assert_eq!(service.serve(HttpRequest::new("GET", "/x")).text(), "nope");
    assert_eq!(
        service.serve(HttpRequest::new("POST", "/only-get")).text(),
        "wrong verb"
    );
    let opts = service.serve(HttpRequest::new("OPTIONS", "/only-get"));
    assert_eq!(opts.status, 200);
    assert_eq!(opts.header("x-options"), Some("1"));
}

#[test]
fn test_disabled_method_handling_falls_to_not_found() {
    let config = Config {
        handle_method_not_allowed: false,
        handle_options: false,
        redirect_trailing_slash: false,
        ..Config::default()
    };
    let mut engine = Engine::new(config);
    engine.get("/items", |ctx| ctx.next());

    let service = engine.handler().unwrap();
    assert_eq!(service.serve(HttpRequest::new("POST", "/items")).status, 404);
    assert_eq!(service.serve(HttpRequest::new("OPTIONS", "/items")).status, 404);
    assert_eq!(service.serve(HttpRequest::new("GET", "/items/")).status, 404);
}

#[test]
fn test_trailing_slash_redirect_status() {
    let mut engine = Engine::default();
    engine.get("/a", |ctx| ctx.next());
    engine.post("/b/", |ctx| ctx.next());

    let service = engine.handler().unwrap();

    let resp = service.serve(HttpRequest::new("GET", "/a/"));
    assert_eq!(resp.status, 301);
    assert_eq!(resp.header("location"), Some("/a"));

    let resp = service.serve(HttpRequest::new("POST", "/b"));
    assert_eq!(resp.status, 308);
    assert_eq!(resp.header("location"), Some("/b/"));
}

#[test]
fn test_conflicting_routes_rejected() {
    let mut engine = Engine::default();
    engine.get("/users/:id", |ctx| ctx.next());
    engine.get("/users/:name", |ctx| ctx.next());
    assert_err!(engine.handler());

    let mut engine = Engine::default();
    engine.get("/users/:id", |ctx| ctx.next());
    engine.get("/users/me", |ctx| ctx.next());
    assert_ok!(engine.handler());
}
