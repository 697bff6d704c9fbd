// Trellis - request routing and middleware execution for Rust
//
// This library re-exports the engine, routers, context and server from
// trellis-core behind a single crate name.

// Re-export core functionality
pub use trellis_core::*;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        BasicError,
        Claims,
        Config,
        Context,
        Cors,
        CorsConfig,
        Engine,
        Error,
        HttpRequest,
        HttpResponse,
        JwtConfig,
        Result,
        Route,
        Router,
        Server,
        Service,
        Validate,
        access_log,
        jwt,
        request_id,
        validator_fn,
    };
    pub use crate::logging::{LogConfig, LogFormat, LogLevel};
}
