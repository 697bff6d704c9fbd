// Middleware chain executor

use crate::{Context, Handler, Route};
use std::sync::Arc;
use tracing::{debug, trace};

/// A route together with its composed handler chain.
///
/// The chain is built once, when the engine is compiled, and shared
/// read-only by every request that matches the route.
pub struct CompiledRoute {
    route: Arc<Route>,
    chain: Arc<[Handler]>,
}

impl CompiledRoute {
    pub(crate) fn new(route: Route, chain: Vec<Handler>) -> Self {
        Self {
            route: Arc::new(route),
            chain: chain.into(),
        }
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Run the chain against `ctx`.
    ///
    /// The continuation flag is cleared before every entry. An entry that
    /// returns without setting it ends the chain; an entry that returns an
    /// error ends the chain after the route's error handler has seen the
    /// error. Deferred callbacks run afterwards in registration order.
    pub fn execute(&self, ctx: &mut Context) {
        ctx.route = Some(self.route.clone());

        debug!(
            chain_len = self.chain.len(),
            method = %ctx.request.method,
            path = %ctx.request.path,
            "Executing handler chain"
        );

        for (index, handler) in self.chain.iter().enumerate() {
            ctx.next = false;
            trace!(handler_index = index, "Executing handler");

            if let Err(err) = handler(ctx) {
                ctx.err = true;
                debug!(handler_index = index, error = %err, "Handler returned error");
                (self.route.error_handler)(ctx, err);
                break;
            }

            if !ctx.next {
                trace!(handler_index = index, "Chain stopped");
                break;
            }
        }

        ctx.run_deferred();
    }
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("route", &self.route)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, HttpRequest, Router};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(
        log: &Log,
        name: &'static str,
        next: bool,
    ) -> impl Fn(&mut Context) -> crate::Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |ctx: &mut Context| {
            log.lock().push(name);
            if next { ctx.next() } else { Ok(()) }
        }
    }

    fn compile_single(router: &Router) -> CompiledRoute {
        let route = &router.routes()[0];
        let chain = route
            .middlewares
            .iter()
            .chain(&route.handlers)
            .chain(&route.after_middlewares)
            .cloned()
            .collect();
        CompiledRoute::new(route.clone(), chain)
    }

    #[test]
    fn test_all_continue_runs_in_order() {
        let log: Log = Arc::default();
        let mut router = Router::new();
        router
            .get("/", recorder(&log, "main", true))
            .use_middleware(recorder(&log, "pre", true))
            .after(recorder(&log, "post", true));

        let compiled = compile_single(&router);
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        compiled.execute(&mut ctx);

        assert_eq!(*log.lock(), vec!["pre", "main", "post"]);
        assert!(!ctx.has_error());
        assert_eq!(ctx.route().map(|r| r.path()), Some("/"));
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let log: Log = Arc::default();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();

        let mut router = Router::new();
        router.handle_error(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        router
            .get("/", recorder(&log, "main", false))
            .after(recorder(&log, "post", true));

        let compiled = compile_single(&router);
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        compiled.execute(&mut ctx);

        assert_eq!(*log.lock(), vec!["main"]);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_invokes_handler_once_and_stops() {
        let log: Log = Arc::default();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = seen.clone();

        let mut router = Router::new();
        router
            .get("/", recorder(&log, "main", true))
            .handle(|_| Err(Error::basic(409, "conflict")))
            .after(recorder(&log, "post", true))
            .handle_error(move |ctx, err| {
                sink.lock().push(err.to_string());
                ctx.set_status(err.status_code());
            });

        let compiled = compile_single(&router);
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        compiled.execute(&mut ctx);

        assert_eq!(*log.lock(), vec!["main"]);
        assert_eq!(*seen.lock(), vec!["conflict".to_string()]);
        assert!(ctx.has_error());
        assert_eq!(ctx.status(), 409);
    }

    #[test]
    fn test_next_flag_reset_between_handlers() {
        let log: Log = Arc::default();
        let mut router = Router::new();
        // first handler continues, second does not; third must not run even
        // though the flag was set earlier
        router
            .get("/", recorder(&log, "a", true))
            .handle(recorder(&log, "b", false))
            .handle(recorder(&log, "c", true));

        let compiled = compile_single(&router);
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        compiled.execute(&mut ctx);

        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_deferred_run_in_order_after_error() {
        let log: Log = Arc::default();
        let defer_log = log.clone();

        let mut router = Router::new();
        router
            .get("/", move |ctx| {
                let first = defer_log.clone();
                let second = defer_log.clone();
                ctx.defer(move || first.lock().push("defer-1"));
                ctx.defer(move || second.lock().push("defer-2"));
                Err(Error::Internal("boom".into()))
            })
            .handle_error({
                let log = log.clone();
                move |_: &mut Context, _: Error| log.lock().push("error")
            });

        let compiled = compile_single(&router);
        let mut ctx = Context::new(HttpRequest::new("GET", "/"));
        compiled.execute(&mut ctx);

        assert_eq!(*log.lock(), vec!["error", "defer-1", "defer-2"]);
    }
}
