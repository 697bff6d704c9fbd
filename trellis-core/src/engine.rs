//! Engine (registration) and Service (serving).
//!
//! An [`Engine`] collects routes on its root [`Router`] (it dereferences to
//! one), per-host routers and the fallback hooks. [`Engine::handler`]
//! consumes it and compiles everything into a [`Service`], a cheap-to-clone
//! handle that serves requests from any thread:
//!
//! ```
//! use trellis_core::{Config, Engine, HttpRequest};
//!
//! let mut engine = Engine::new(Config::default());
//! engine.get("/hello", |ctx| ctx.text("hello", 200));
//!
//! let service = engine.handler().unwrap();
//! let response = service.serve(HttpRequest::new("GET", "/hello"));
//! assert_eq!(response.status, 200);
//! assert_eq!(response.text(), "hello");
//! ```

use crate::compress::{self, Encoding};
use crate::context::ContextPool;
use crate::defaults;
use crate::handler::panic_message;
use crate::http::CONTENT_TYPE_TEXT;
use crate::matcher::{Lookup, MatchOptions, Matcher};
use crate::server::Server;
use crate::vhost::VirtualHosts;
use crate::{
    BasicErrorPool, Config, Context, ErrorHandler, Handler, HttpRequest, HttpResponse,
    PanicHandler, Result, Router,
};
use std::any::Any;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Registration-time builder.
pub struct Engine {
    config: Config,
    router: Router,
    hosts: HashMap<String, Router>,
    not_found: Handler,
    method_not_allowed: Handler,
    global_options: Handler,
    panic_handler: PanicHandler,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            router: Router::new(),
            hosts: HashMap::new(),
            not_found: defaults::not_found_handler(),
            method_not_allowed: defaults::method_not_allowed_handler(),
            global_options: defaults::global_options_handler(),
            panic_handler: defaults::panic_handler(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Independent router for requests whose `Host` header equals `hostname`.
    ///
    /// A new host starts with the root router's error handler, binder and
    /// validator; calling this again for the same host returns the same router.
    pub fn virtual_host(&mut self, hostname: &str) -> &mut Router {
        let root = &self.router;
        self.hosts
            .entry(hostname.to_string())
            .or_insert_with(|| Router::inheriting(root))
    }

    pub fn on_not_found<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.not_found = Arc::new(f);
        self
    }

    pub fn on_method_not_allowed<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.method_not_allowed = Arc::new(f);
        self
    }

    /// Runs for OPTIONS requests without an explicit route, after the
    /// `Allow` header has been set.
    pub fn on_global_options<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.global_options = Arc::new(f);
        self
    }

    pub fn on_panic<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Arc::new(f);
        self
    }

    /// Compile every routing tree into a [`Service`].
    pub fn handler(self) -> Result<Service> {
        self.config.validate()?;

        let mut default = Matcher::new();
        self.router.compile(&mut default)?;
        let hosts = VirtualHosts::compile(&self.hosts)?;

        info!(
            name = %self.config.name,
            routes = default.len(),
            virtual_hosts = hosts.len(),
            "Routes compiled"
        );

        let inner = ServiceInner {
            match_options: self.config.match_options(),
            contexts: ContextPool::new(self.config.max_pooled_contexts),
            errors: BasicErrorPool::default(),
            error_handler: self.router.default_error_handler(),
            config: self.config,
            default,
            hosts,
            not_found: self.not_found,
            method_not_allowed: self.method_not_allowed,
            global_options: self.global_options,
            panic_handler: self.panic_handler,
        };

        Ok(Service {
            inner: Arc::new(inner),
        })
    }
}

impl Deref for Engine {
    type Target = Router;

    fn deref(&self) -> &Router {
        &self.router
    }
}

impl DerefMut for Engine {
    fn deref_mut(&mut self) -> &mut Router {
        &mut self.router
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

struct ServiceInner {
    config: Config,
    match_options: MatchOptions,
    default: Matcher,
    hosts: VirtualHosts,
    contexts: ContextPool,
    errors: BasicErrorPool,
    error_handler: ErrorHandler,
    not_found: Handler,
    method_not_allowed: Handler,
    global_options: Handler,
    panic_handler: PanicHandler,
}

/// Compiled engine. Clones share the same routing trees and pools.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn error_pool(&self) -> &BasicErrorPool {
        &self.inner.errors
    }

    pub fn context_pool(&self) -> &ContextPool {
        &self.inner.contexts
    }

    pub fn virtual_hosts(&self) -> &VirtualHosts {
        &self.inner.hosts
    }

    /// Bind `config.addr` and serve until shutdown.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let server = Server::bind(&self.inner.config.addr).await?;
        server.serve(self.clone()).await
    }

    /// Serve one request to completion.
    ///
    /// Panics raised by handlers are caught here and handed to the panic
    /// handler; the faulted context is cleared before it is pooled again.
    pub fn serve(&self, request: HttpRequest) -> HttpResponse {
        let accept_encoding = if self.inner.config.compress {
            request.header("accept-encoding").map(str::to_string)
        } else {
            None
        };
        let mut ctx = self.inner.contexts.acquire(request);
        ctx.service = Some(self.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&mut ctx)));

        let mut response = match outcome {
            Ok(()) => {
                let response = ctx.take_response();
                self.inner.contexts.release(ctx);
                response
            }
            Err(payload) => self.recover(ctx, payload),
        };

        self.finalize(&mut response, accept_encoding.as_deref());
        trace!(status = response.status, "Request served");
        response
    }

    fn dispatch(&self, ctx: &mut Context) {
        let (matcher, error_handler) = match self.inner.hosts.select(ctx.request.host()) {
            Some(site) => (&site.matcher, &site.error_handler),
            None => (&self.inner.default, &self.inner.error_handler),
        };

        match matcher.lookup(&ctx.request.method, &ctx.request.path, self.inner.match_options) {
            Lookup::Found { route, params } => {
                ctx.params = params;
                route.execute(ctx);
            }
            Lookup::Redirect { location, status } => {
                let location = match &ctx.request.query {
                    Some(query) => format!("{}?{}", location, query),
                    None => location,
                };
                debug!(location = %location, status, "Redirecting");
                ctx.set_status(status);
                ctx.set_header("location", location);
            }
            Lookup::Options { allow } => {
                ctx.set_header("allow", allow);
                self.run_hook(&self.inner.global_options, error_handler, ctx);
            }
            Lookup::MethodNotAllowed { allow } => {
                ctx.set_header("allow", allow);
                self.run_hook(&self.inner.method_not_allowed, error_handler, ctx);
            }
            Lookup::NotFound => {
                debug!(method = %ctx.request.method, path = %ctx.request.path, "No route matched");
                self.run_hook(&self.inner.not_found, error_handler, ctx);
            }
        }
    }

    fn run_hook(&self, hook: &Handler, error_handler: &ErrorHandler, ctx: &mut Context) {
        if let Err(err) = hook(ctx) {
            ctx.err = true;
            warn!(error = %err, "Fallback handler returned error");
            error_handler(ctx, err);
        }
        ctx.run_deferred();
    }

    fn recover(&self, mut ctx: Context, payload: Box<dyn Any + Send>) -> HttpResponse {
        warn!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            panic = %panic_message(payload.as_ref()),
            "Handler panicked"
        );

        let deferred = std::mem::take(&mut ctx.deferred);
        if panic::catch_unwind(AssertUnwindSafe(move || {
            for f in deferred {
                f();
            }
        }))
        .is_err()
        {
            error!("Deferred callback panicked during recovery");
        }

        let request = ctx.take_request();
        self.inner.contexts.release(ctx);

        let mut fresh = self.inner.contexts.acquire(request);
        fresh.service = Some(self.clone());

        let panic_handler = &self.inner.panic_handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| panic_handler(&mut fresh, payload)));

        let response = match outcome {
            Ok(()) => fresh.take_response(),
            Err(second) => {
                error!(
                    panic = %panic_message(second.as_ref()),
                    "Panic handler panicked"
                );
                HttpResponse::internal_server_error()
            }
        };
        self.inner.contexts.release(fresh);
        response
    }

    /// Default headers, then compression when enabled and accepted.
    pub(crate) fn finalize(&self, response: &mut HttpResponse, accept_encoding: Option<&str>) {
        let config = &self.inner.config;

        if !config.no_default_server_header && response.header("server").is_none() {
            response.set_header("server", config.name.clone());
        }

        if !config.no_default_content_type
            && !response.body.is_empty()
            && response.header("content-type").is_none()
        {
            response.set_header("content-type", CONTENT_TYPE_TEXT);
        }

        if config.compress
            && let Some(encoding) = accept_encoding.and_then(Encoding::negotiate)
        {
            compress::compress_response(response, encoding);
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.config.name)
            .field("routes", &self.inner.default.len())
            .field("virtual_hosts", &self.inner.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_server_header_and_default_content_type() {
        let mut engine = Engine::default();
        engine.get("/raw", |ctx| {
            ctx.set_body("raw");
            Ok(())
        });
        let service = engine.handler().unwrap();

        let resp = service.serve(HttpRequest::new("GET", "/raw"));
        assert_eq!(resp.header("server"), Some("trellis"));
        assert_eq!(resp.header("content-type"), Some(CONTENT_TYPE_TEXT));
    }

    #[test]
    fn test_suppressed_defaults() {
        let config = Config {
            no_default_server_header: true,
            no_default_content_type: true,
            ..Config::default()
        };
        let mut engine = Engine::new(config);
        engine.get("/raw", |ctx| {
            ctx.set_body("raw");
            Ok(())
        });
        let service = engine.handler().unwrap();

        let resp = service.serve(HttpRequest::new("GET", "/raw"));
        assert!(resp.header("server").is_none());
        assert!(resp.header("content-type").is_none());
    }

    #[test]
    fn test_redirect_keeps_query() {
        let mut engine = Engine::default();
        engine.get("/docs", |ctx| ctx.text("docs", 200));
        let service = engine.handler().unwrap();

        let resp = service.serve(HttpRequest::new("GET", "/docs/?page=2"));
        assert_eq!(resp.status, 301);
        assert_eq!(resp.header("location"), Some("/docs?page=2"));
    }

    #[test]
    fn test_hook_error_goes_to_error_handler() {
        let mut engine = Engine::default();
        engine.on_not_found(|_| Err(Error::basic(410, "gone")));
        let service = engine.handler().unwrap();

        let resp = service.serve(HttpRequest::new("GET", "/missing"));
        assert_eq!(resp.status, 410);
        assert_eq!(resp.text(), r#"{"message":"gone","code":null}"#);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            addr: String::new(),
            ..Config::default()
        };
        assert!(Engine::new(config).handler().is_err());
    }

    #[test]
    fn test_virtual_host_same_router_returned() {
        let mut engine = Engine::default();
        engine.virtual_host("a.test").get("/one", |ctx| ctx.next());
        engine.virtual_host("a.test").get("/two", |ctx| ctx.next());
        assert_eq!(engine.virtual_host("a.test").routes().len(), 2);
    }
}
