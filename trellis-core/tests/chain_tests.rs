use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_core::{BasicError, Context, Engine, Error, HttpRequest, Result};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn step(
    log: &Log,
    name: &'static str,
    cont: bool,
) -> impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static {
    let log = log.clone();
    move |ctx: &mut Context| {
        log.lock().push(name);
        if cont { ctx.next() } else { Ok(()) }
    }
}

#[test]
fn test_after_middleware_error_reaches_error_handler_once() {
    let errors = Arc::new(AtomicUsize::new(0));
    let past_error = Arc::new(AtomicUsize::new(0));

    let mut engine = Engine::default();
    let seen = errors.clone();
    engine.handle_error(move |ctx: &mut Context, err: Error| {
        seen.fetch_add(1, Ordering::SeqCst);
        assert_eq!(err.status_code(), 200);
        assert_eq!(err.to_string(), "test");
        ctx.set_status(299);
    });

    let ran = past_error.clone();
    engine
        .get("/test", |ctx| ctx.next())
        .after(|_| Err(BasicError::new(200, "test").into()))
        .after(move |ctx| {
            ran.fetch_add(1, Ordering::SeqCst);
            ctx.next()
        });

    let service = engine.handler().unwrap();
    let resp = service.serve(HttpRequest::new("GET", "/test"));

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(past_error.load(Ordering::SeqCst), 0);
    assert_eq!(resp.status, 299);
}

#[test]
fn test_full_composition_order() {
    let log: Log = Arc::default();
    let mut engine = Engine::default();

    engine.use_middleware(step(&log, "router-pre", true));
    engine.after(step(&log, "router-post", true));
    engine
        .get("/order", step(&log, "main-1", true))
        .handle(step(&log, "main-2", true))
        .use_middleware(step(&log, "route-pre", true))
        .after(step(&log, "route-post", true));

    let service = engine.handler().unwrap();
    service.serve(HttpRequest::new("GET", "/order"));

    assert_eq!(
        *log.lock(),
        vec![
            "router-pre",
            "route-pre",
            "main-1",
            "main-2",
            "route-post",
            "router-post"
        ]
    );
}

#[test]
fn test_missing_continuation_stops_without_error() {
    let log: Log = Arc::default();
    let errors = Arc::new(AtomicUsize::new(0));

    let mut engine = Engine::default();
    let seen = errors.clone();
    engine.handle_error(move |_: &mut Context, _: Error| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    engine
        .get("/stop", step(&log, "first", true))
        .handle(step(&log, "second", false))
        .handle(step(&log, "third", true));

    let service = engine.handler().unwrap();
    service.serve(HttpRequest::new("GET", "/stop"));

    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[test]
fn test_route_error_handler_overrides_router() {
    let mut engine = Engine::default();
    engine.handle_error(|ctx: &mut Context, _: Error| ctx.set_status(501));
    engine
        .get("/own", |_| Err(Error::Internal("boom".into())))
        .handle_error(|ctx: &mut Context, _: Error| ctx.set_status(418));
    engine.get("/shared", |_| Err(Error::Internal("boom".into())));

    let service = engine.handler().unwrap();
    assert_eq!(service.serve(HttpRequest::new("GET", "/own")).status, 418);
    assert_eq!(service.serve(HttpRequest::new("GET", "/shared")).status, 501);
}

#[test]
fn test_deferred_runs_in_order_after_chain() {
    let log: Log = Arc::default();
    let mut engine = Engine::default();

    let l = log.clone();
    engine.get("/defer", move |ctx| {
        let first = l.clone();
        let second = l.clone();
        ctx.defer(move || first.lock().push("deferred-1"));
        ctx.defer(move || second.lock().push("deferred-2"));
        l.lock().push("handler");
        ctx.next()
    })
    .after(step(&log, "post", true));

    let service = engine.handler().unwrap();
    service.serve(HttpRequest::new("GET", "/defer"));

    assert_eq!(
        *log.lock(),
        vec!["handler", "post", "deferred-1", "deferred-2"]
    );
}

#[test]
fn test_basic_error_default_response_and_pool() {
    let mut engine = Engine::default();
    engine.get("/fail", |ctx| {
        Err(ctx.basic_error(409, "already exists"))
    });

    let service = engine.handler().unwrap();
    let resp = service.serve(HttpRequest::new("GET", "/fail"));

    assert_eq!(resp.status, 409);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(resp.text(), r#"{"message":"already exists","code":null}"#);
    assert_eq!(service.error_pool().idle(), 1);

    service.serve(HttpRequest::new("GET", "/fail"));
    assert_eq!(service.error_pool().idle(), 1);
}
