// Built-in middleware

use crate::{Context, Result};
use std::time::Instant;
use tracing::info;

pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Tags each request with an `x-request-id` header.
///
/// An id supplied by the client is kept; otherwise a v4 UUID is generated.
/// The id is mirrored on the response.
pub fn request_id() -> impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static {
    |ctx: &mut Context| {
        let id = match ctx.header(HEADER_REQUEST_ID) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        ctx.request_mut().set_header(HEADER_REQUEST_ID, id.clone());
        ctx.set_header(HEADER_REQUEST_ID, id);
        ctx.next()
    }
}

/// Logs method, path and elapsed time once the chain has finished.
pub fn access_log() -> impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static {
    |ctx: &mut Context| {
        let started = Instant::now();
        let method = ctx.method().to_string();
        let path = ctx.path().to_string();
        let request_id = ctx.header(HEADER_REQUEST_ID).map(str::to_string);

        ctx.defer(move || {
            info!(
                method = %method,
                path = %path,
                request_id = request_id.as_deref().unwrap_or("-"),
                elapsed = ?started.elapsed(),
                "Request handled"
            );
        });
        ctx.next()
    }
}

/// Cross-origin resource sharing settings.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Exact origins, or `"*"` for any.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds; zero omits the header.
    pub max_age: u32,
    pub exposed_headers: Vec<String>,
}

/// CORS middleware.
///
/// Requests from an allowed origin get the origin echoed back plus
/// `Vary: Origin`. Preflight requests (OPTIONS carrying
/// `Access-Control-Request-Method`) are answered with 204 and end the chain.
#[derive(Debug, Clone)]
pub struct Cors {
    origins: Vec<String>,
    methods: String,
    headers: String,
    exposed: String,
    credentials: bool,
    max_age: u32,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self {
            origins: config.allowed_origins,
            methods: config.allowed_methods.join(", "),
            headers: config.allowed_headers.join(", "),
            exposed: config.exposed_headers.join(", "),
            credentials: config.allow_credentials,
            max_age: config.max_age,
        }
    }

    /// Any origin, the common methods, no credentials.
    pub fn permissive() -> Self {
        Self::new(CorsConfig {
            allowed_origins: vec!["*".into()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            max_age: 86400,
            ..CorsConfig::default()
        })
    }

    fn is_allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == "*" || o == origin)
    }

    pub fn handle(&self, ctx: &mut Context) -> Result<()> {
        let Some(origin) = ctx.header("origin").map(str::to_string) else {
            return ctx.next();
        };
        if !self.is_allowed(&origin) {
            return ctx.next();
        }

        ctx.set_header("access-control-allow-origin", origin);
        if self.credentials {
            ctx.set_header("access-control-allow-credentials", "true");
        }
        let vary = match ctx.response().header("vary") {
            Some(existing) if !existing.is_empty() => format!("{}, Origin", existing),
            _ => "Origin".to_string(),
        };
        ctx.set_header("vary", vary);
        if !self.exposed.is_empty() {
            ctx.set_header("access-control-expose-headers", self.exposed.clone());
        }

        let preflight =
            ctx.request().is_options() && ctx.header("access-control-request-method").is_some();
        if !preflight {
            return ctx.next();
        }

        if !self.methods.is_empty() {
            ctx.set_header("access-control-allow-methods", self.methods.clone());
        }
        if !self.headers.is_empty() {
            ctx.set_header("access-control-allow-headers", self.headers.clone());
        }
        if self.max_age > 0 {
            ctx.set_header("access-control-max-age", self.max_age.to_string());
        }
        ctx.set_status(204);
        Ok(())
    }

    pub fn into_middleware(self) -> impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static {
        move |ctx: &mut Context| self.handle(ctx)
    }
}
