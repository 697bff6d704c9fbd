// Route definition: one (method, path) endpoint and its handler lists

use crate::binder::Binder;
use crate::validator::Validator;
use crate::{Context, Error, ErrorHandler, Handler, Result};
use std::sync::Arc;

/// A registered endpoint.
///
/// A route carries its own pre-middlewares, main handlers and
/// post-middlewares, plus the error handler, binder and validator captured
/// from its router when it was registered. Everything can be changed through
/// the returned `&mut Route` until the engine is compiled.
#[derive(Clone)]
pub struct Route {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) middlewares: Vec<Handler>,
    pub(crate) handlers: Vec<Handler>,
    pub(crate) after_middlewares: Vec<Handler>,
    pub(crate) error_handler: ErrorHandler,
    pub(crate) binder: Arc<dyn Binder>,
    pub(crate) validator: Option<Arc<dyn Validator>>,
}

impl Route {
    pub(crate) fn new(
        method: String,
        path: String,
        error_handler: ErrorHandler,
        binder: Arc<dyn Binder>,
        validator: Option<Arc<dyn Validator>>,
    ) -> Self {
        Self {
            method,
            path,
            middlewares: Vec::new(),
            handlers: Vec::new(),
            after_middlewares: Vec::new(),
            error_handler,
            binder,
            validator,
        }
    }

    /// Append a middleware that runs before the main handlers.
    pub fn use_middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.middlewares.push(Arc::new(f));
        self
    }

    /// Append a middleware that runs after the main handlers.
    pub fn after<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.after_middlewares.push(Arc::new(f));
        self
    }

    /// Append another main handler.
    pub fn handle<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(f));
        self
    }

    pub fn handle_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context, Error) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(f);
        self
    }

    pub fn bind<B: Binder + 'static>(&mut self, binder: B) -> &mut Self {
        self.binder = Arc::new(binder);
        self
    }

    pub fn validate<V: Validator + 'static>(&mut self, validator: V) -> &mut Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn binder(&self) -> &dyn Binder {
        self.binder.as_ref()
    }

    pub fn validator(&self) -> Option<&dyn Validator> {
        self.validator.as_deref()
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Lengths of the (pre, main, post) handler lists.
    pub fn handler_counts(&self) -> (usize, usize, usize) {
        (
            self.middlewares.len(),
            self.handlers.len(),
            self.after_middlewares.len(),
        )
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .field("handlers", &self.handlers.len())
            .field("after_middlewares", &self.after_middlewares.len())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
