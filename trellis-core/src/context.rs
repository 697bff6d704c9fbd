//! Per-request context and the pool that recycles it.
//!
//! A [`Context`] wraps one in-flight request/response pair together with the
//! chain bookkeeping (continuation flag, error flag, deferred callbacks), the
//! matched [`Route`], the owning [`Service`], path parameters and typed locals.
//!
//! Contexts are acquired from a [`ContextPool`] when a request is dispatched
//! and released when its chain is done. Release takes the context by value
//! and clears every field, so nothing from one request can leak into the next.

use crate::binder::{Binder, DefaultBinder};
use crate::http::{CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML, HttpRequest, HttpResponse};
use crate::{BasicError, Config, Error, Locals, Result, Route, Service};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::cell::OnceCell;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Deferred = Box<dyn FnOnce() + Send>;

/// Parsed view of the request URL, built on first use and cached for the
/// lifetime of the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestUrl {
    pub scheme: String,
    pub host: Option<String>,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestUrl {
    fn parse(req: &HttpRequest) -> Self {
        let query = req
            .query
            .as_deref()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();

        Self {
            scheme: "http".to_string(),
            host: req.host().map(str::to_string),
            path: req.path.clone(),
            query,
        }
    }

    /// First query value for `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Mutable state threaded through one handler chain.
pub struct Context {
    pub(crate) request: HttpRequest,
    pub(crate) response: HttpResponse,
    pub(crate) next: bool,
    pub(crate) err: bool,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) route: Option<Arc<Route>>,
    pub(crate) service: Option<Service>,
    pub(crate) params: Vec<(String, String)>,
    url: OnceCell<RequestUrl>,
    locals: Locals,
}

impl Context {
    /// Create a detached context around `request`, bound to no route or service.
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: HttpResponse::ok(),
            next: false,
            err: false,
            deferred: Vec::new(),
            route: None,
            service: None,
            params: Vec::new(),
            url: OnceCell::new(),
            locals: Locals::new(),
        }
    }

    /// Ask the executor to run the next chain entry after this one returns.
    ///
    /// Written as `return ctx.next();` at the end of a handler.
    #[inline]
    pub fn next(&mut self) -> Result<()> {
        self.next = true;
        Ok(())
    }

    /// Whether the current handler requested continuation.
    #[inline]
    pub fn is_next(&self) -> bool {
        self.next
    }

    /// Whether a chain entry has returned an error for this request.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.err
    }

    /// Register a callback that runs once the chain finishes, in registration order.
    pub fn defer<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.deferred.push(Box::new(f));
    }

    pub(crate) fn run_deferred(&mut self) {
        for f in self.deferred.drain(..) {
            f();
        }
    }

    pub(crate) fn reset(&mut self) {
        self.request = HttpRequest::default();
        self.response = HttpResponse::ok();
        self.next = false;
        self.err = false;
        self.deferred.clear();
        self.route = None;
        self.service = None;
        self.params.clear();
        self.url = OnceCell::new();
        self.locals.clear();
    }

    pub(crate) fn take_response(&mut self) -> HttpResponse {
        std::mem::take(&mut self.response)
    }

    pub(crate) fn take_request(&mut self) -> HttpRequest {
        std::mem::take(&mut self.request)
    }

    // ========== Request ==========

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn host(&self) -> Option<&str> {
        self.request.host()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.request.remote_addr
    }

    /// Parsed URL, computed once per request.
    pub fn url(&self) -> &RequestUrl {
        self.url.get_or_init(|| RequestUrl::parse(&self.request))
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.url().query_value(name)
    }

    /// Path parameter captured by the matched route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    // ========== Route / service ==========

    /// The matched route, absent for not-found and other fallback hooks.
    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    pub fn config(&self) -> Option<&Config> {
        self.service.as_ref().map(Service::config)
    }

    /// Decode the request into `T` with the route's binder.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        let bindings = match &self.route {
            Some(route) => route.binder().bind(self)?,
            None => DefaultBinder.bind(self)?,
        };
        bindings.deserialize()
    }

    /// Run the route's validator over `value`.
    pub fn validate<T: Any>(&self, value: &T) -> Result<()> {
        match self.route.as_ref().and_then(|r| r.validator()) {
            Some(validator) => validator.validate(value),
            None => Err(Error::Validation("no validator configured".to_string())),
        }
    }

    /// A [`BasicError`] drawn from the service's error pool when one is bound.
    pub fn basic_error(&self, status: u16, message: impl Into<String>) -> Error {
        match &self.service {
            Some(service) => Error::Basic(service.error_pool().acquire(status, message)),
            None => Error::basic(status, message),
        }
    }

    /// Hand a [`BasicError`] back to the service's error pool.
    pub fn release_basic_error(&self, err: Box<BasicError>) {
        if let Some(service) = &self.service {
            service.error_pool().release(err);
        }
    }

    // ========== Response ==========

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.response.status = status;
    }

    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.response.set_header(name, value);
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.response.set_header("content-type", content_type);
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.response.body = body.into();
    }

    /// Write a plain-text body with the given status.
    pub fn text(&mut self, body: impl Into<String>, status: u16) -> Result<()> {
        self.set_status(status);
        self.set_content_type(CONTENT_TYPE_TEXT);
        self.set_body(body.into().into_bytes());
        Ok(())
    }

    /// Serialize `value` as the JSON response body.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.set_content_type(CONTENT_TYPE_JSON);
        self.set_body(body);
        Ok(())
    }

    /// Serialize `value` as the XML response body.
    pub fn xml<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = quick_xml::se::to_string(value).map_err(Error::other)?;
        self.set_content_type(CONTENT_TYPE_XML);
        self.set_body(body.into_bytes());
        Ok(())
    }

    pub fn redirect(&mut self, location: impl Into<String>, status: u16) -> Result<()> {
        self.set_status(status);
        self.set_header("location", location);
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("next", &self.next)
            .field("err", &self.err)
            .field("deferred", &self.deferred.len())
            .field("route", &self.route.as_ref().map(|r| r.path()))
            .finish()
    }
}

/// Counters for a [`ContextPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
}

/// Free list of reusable contexts.
///
/// Ownership moves in and out of the list, so an instance is never reachable
/// from two requests at once. Released contexts beyond `capacity` are dropped.
pub struct ContextPool {
    free: Mutex<Vec<Context>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Take an idle context (or allocate one) and bind it to `request`.
    pub fn acquire(&self, request: HttpRequest) -> Context {
        let pooled = self.free.lock().pop();
        match pooled {
            Some(mut ctx) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ctx.request = request;
                ctx
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Context::new(request)
            }
        }
    }

    /// Clear `ctx` and return it to the free list.
    pub fn release(&self, mut ctx: Context) {
        ctx.reset();
        self.releases.fetch_add(1, Ordering::Relaxed);

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(ctx);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_next_sets_flag() {
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        assert!(!ctx.is_next());
        assert!(ctx.next().is_ok());
        assert!(ctx.is_next());
    }

    #[test]
    fn test_url_is_parsed_once() {
        let ctx = Context::new(
            HttpRequest::new("GET", "/search?q=rust+lang&page=2&q=again")
                .with_header("Host", "example.com"),
        );

        let url = ctx.url();
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.path, "/search");
        assert_eq!(ctx.query("q"), Some("rust lang"));
        assert_eq!(ctx.query("page"), Some("2"));
        assert_eq!(ctx.query("missing"), None);
        assert!(std::ptr::eq(ctx.url(), url));
    }

    #[test]
    fn test_response_helpers() {
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        ctx.text("hello", 201).unwrap();
        assert_eq!(ctx.status(), 201);
        assert_eq!(ctx.response().text(), "hello");
        assert_eq!(ctx.response().header("content-type"), Some(CONTENT_TYPE_TEXT));

        ctx.json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(ctx.response().text(), r#"{"a":1}"#);
        assert_eq!(ctx.response().header("content-type"), Some(CONTENT_TYPE_JSON));
    }

    #[test]
    fn test_validate_without_validator() {
        let ctx = Context::new(HttpRequest::new("GET", "/"));
        let err = ctx.validate(&1u32).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_release_clears_everything() {
        let pool = ContextPool::new(8);
        let ran = Arc::new(AtomicBool::new(false));

        let mut ctx = pool.acquire(HttpRequest::new("POST", "/a?x=1").with_body("payload"));
        ctx.next = true;
        ctx.err = true;
        ctx.params.push(("id".to_string(), "7".to_string()));
        ctx.locals_mut().insert(5u8);
        ctx.set_status(418);
        ctx.set_header("x-custom", "1");
        let flag = ran.clone();
        ctx.defer(move || flag.store(true, Ordering::SeqCst));
        let _ = ctx.url();
        pool.release(ctx);

        let ctx = pool.acquire(HttpRequest::new("GET", "/b"));
        assert_eq!(ctx.path(), "/b");
        assert!(ctx.body().is_empty());
        assert!(!ctx.is_next());
        assert!(!ctx.has_error());
        assert!(ctx.params().is_empty());
        assert!(ctx.locals().is_empty());
        assert!(ctx.deferred.is_empty());
        assert!(ctx.route().is_none());
        assert!(ctx.service().is_none());
        assert_eq!(ctx.status(), 200);
        assert!(ctx.response().headers.is_empty());
        assert!(ctx.url().query.is_empty());
        // dropped on release, never run
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pool_reuses_instances() {
        let pool = ContextPool::new(2);

        let a = pool.acquire(HttpRequest::default());
        let b = pool.acquire(HttpRequest::default());
        let c = pool.acquire(HttpRequest::default());
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.idle(), 2);

        let _d = pool.acquire(HttpRequest::default());
        let stats = pool.stats();
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.releases, 3);
    }

    #[test]
    fn test_pool_concurrent_acquire_release() {
        let pool = Arc::new(ContextPool::new(16));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let path = format!("/t{}/{}", i, n);
                        let mut ctx = pool.acquire(HttpRequest::new("GET", &path));
                        assert_eq!(ctx.path(), path);
                        assert!(ctx.locals().is_empty());
                        ctx.locals_mut().insert(n);
                        pool.release(ctx);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 1600);
        assert_eq!(stats.releases, 1600);
        assert!(pool.idle() <= 16);
    }
}
