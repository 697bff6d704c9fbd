// Core library for the Trellis HTTP framework
// Context pooling, routing trees, middleware chains and virtual hosts

pub mod binder;
pub mod chain;
pub mod compress;
pub mod config;
pub mod context;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod handler;
pub mod http;
pub mod jwt;
pub mod locals;
pub mod logging;
pub mod matcher;
pub mod middleware;
pub mod route;
pub mod router;
pub mod server;
pub mod validator;
pub mod vhost;

// Re-export commonly used types
pub use binder::{Binder, Bindings, DefaultBinder, Field};
pub use chain::CompiledRoute;
pub use compress::Encoding;
pub use config::{Config, ENV_PREFIX};
pub use context::{Context, ContextPool, PoolStats, RequestUrl};
pub use engine::{Engine, Service};
pub use error::*;
pub use handler::*;
pub use http::*;
pub use jwt::{Claims, JwtConfig, TokenLookup, jwt, jwt_with_claims};
pub use locals::Locals;
pub use matcher::{Lookup, MatchOptions, Matcher};
pub use middleware::{Cors, CorsConfig, HEADER_REQUEST_ID, access_log, request_id};
pub use route::Route;
pub use router::Router;
pub use server::Server;
pub use validator::{SelfValidator, Validate, Validator, ValidatorFn, validator_fn};
pub use vhost::{Site, VirtualHosts};
