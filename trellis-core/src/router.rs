//! Route registry with hierarchical groups.
//!
//! A [`Router`] owns routes, child groups, a path prefix and router-scoped
//! pre/post middleware. Groups snapshot their parent when created:
//!
//! ```
//! use trellis_core::Router;
//!
//! let mut root = Router::new();
//! root.use_middleware(|ctx| ctx.next());
//!
//! let api = root.new_group("/api/v1");
//! api.get("/users", |ctx| ctx.text("users", 200));
//! assert_eq!(api.prefix(), "/api/v1");
//!
//! // Not inherited by `/api/v1`: the group copied the list above.
//! root.use_middleware(|ctx| ctx.next());
//! ```

use crate::binder::{Binder, DefaultBinder};
use crate::chain::CompiledRoute;
use crate::defaults;
use crate::http::{
    METHOD_DELETE, METHOD_GET, METHOD_HEAD, METHOD_OPTIONS, METHOD_PATCH, METHOD_POST, METHOD_PUT,
    METHOD_TRACE,
};
use crate::matcher::Matcher;
use crate::validator::Validator;
use crate::{Context, Error, ErrorHandler, Handler, Result, Route};
use std::sync::Arc;
use tracing::debug;

pub struct Router {
    prefix: String,
    routes: Vec<Route>,
    groups: Vec<Router>,
    middlewares: Vec<Handler>,
    after_middlewares: Vec<Handler>,
    error_handler: ErrorHandler,
    binder: Arc<dyn Binder>,
    validator: Option<Arc<dyn Validator>>,
}

impl Router {
    pub fn new() -> Self {
        Self::with_error_handler(defaults::error_handler())
    }

    pub(crate) fn with_error_handler(error_handler: ErrorHandler) -> Self {
        Self {
            prefix: String::new(),
            routes: Vec::new(),
            groups: Vec::new(),
            middlewares: Vec::new(),
            after_middlewares: Vec::new(),
            error_handler,
            binder: Arc::new(DefaultBinder),
            validator: None,
        }
    }

    /// Router seeded with another router's error handler, binder and validator.
    pub(crate) fn inheriting(parent: &Router) -> Self {
        let mut router = Self::with_error_handler(parent.error_handler.clone());
        router.binder = parent.binder.clone();
        router.validator = parent.validator.clone();
        router
    }

    /// Register a route and return it for further configuration.
    pub fn handle<F>(&mut self, method: &str, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        let mut route = Route::new(
            method.to_ascii_uppercase(),
            self.apply_prefix(path),
            self.error_handler.clone(),
            self.binder.clone(),
            self.validator.clone(),
        );
        route.handlers.push(Arc::new(f));

        let idx = self.routes.len();
        self.routes.push(route);
        &mut self.routes[idx]
    }

    pub fn get<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_GET, path, f)
    }

    pub fn post<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_POST, path, f)
    }

    pub fn put<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_PUT, path, f)
    }

    pub fn patch<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_PATCH, path, f)
    }

    pub fn delete<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_DELETE, path, f)
    }

    pub fn head<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_HEAD, path, f)
    }

    pub fn trace<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_TRACE, path, f)
    }

    pub fn options<F>(&mut self, path: &str, f: F) -> &mut Route
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(METHOD_OPTIONS, path, f)
    }

    /// Append a router-scoped middleware that runs before every route's own list.
    pub fn use_middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.middlewares.push(Arc::new(f));
        self
    }

    /// Append a router-scoped middleware that runs after every route's own list.
    pub fn after<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.after_middlewares.push(Arc::new(f));
        self
    }

    /// Error handler captured by routes registered from now on.
    pub fn handle_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Error) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(f);
        self
    }

    /// Binder captured by routes registered from now on.
    pub fn bind<B: Binder + 'static>(&mut self, binder: B) -> &mut Self {
        self.binder = Arc::new(binder);
        self
    }

    /// Validator captured by routes registered from now on.
    pub fn validate<V: Validator + 'static>(&mut self, validator: V) -> &mut Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Create a child group under `path`.
    ///
    /// The child starts with copies of this router's middleware lists, error
    /// handler, binder and validator as they are right now.
    pub fn new_group(&mut self, path: &str) -> &mut Router {
        let group = Router {
            prefix: normalize_prefix(&self.apply_prefix(path)),
            routes: Vec::new(),
            groups: Vec::new(),
            middlewares: self.middlewares.clone(),
            after_middlewares: self.after_middlewares.clone(),
            error_handler: self.error_handler.clone(),
            binder: self.binder.clone(),
            validator: self.validator.clone(),
        };

        let idx = self.groups.len();
        self.groups.push(group);
        &mut self.groups[idx]
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn groups(&self) -> &[Router] {
        &self.groups
    }

    pub(crate) fn default_error_handler(&self) -> ErrorHandler {
        self.error_handler.clone()
    }

    /// Join the group prefix and a route path.
    pub fn apply_prefix(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            }
        } else {
            let path = path.trim_start_matches('/');
            if path.is_empty() {
                self.prefix.clone()
            } else {
                format!("{}/{}", self.prefix, path)
            }
        }
    }

    /// Compose every route's chain and register it, recursing into groups.
    ///
    /// Chain order: router pre-middlewares, route pre-middlewares, route
    /// handlers, route post-middlewares, router post-middlewares.
    pub(crate) fn compile(&self, matcher: &mut Matcher) -> Result<()> {
        for route in &self.routes {
            let chain: Vec<Handler> = self
                .middlewares
                .iter()
                .chain(&route.middlewares)
                .chain(&route.handlers)
                .chain(&route.after_middlewares)
                .chain(&self.after_middlewares)
                .cloned()
                .collect();

            debug!(
                method = %route.method,
                path = %route.path,
                chain_len = chain.len(),
                "Compiling route"
            );

            matcher.insert(CompiledRoute::new(route.clone(), chain))?;
        }

        for group in &self.groups {
            group.compile(matcher)?;
        }

        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes)
            .field("groups", &self.groups)
            .field("middlewares", &self.middlewares.len())
            .field("after_middlewares", &self.after_middlewares.len())
            .finish()
    }
}

/// Leading slash, no trailing slash; the root prefix is empty.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
