// Default hooks and constants

use crate::handler::panic_message;
use crate::{Context, Error, ErrorHandler, Handler, PanicHandler, Result};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_SERVER_NAME: &str = "trellis";
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_POOLED_CONTEXTS: usize = 1024;

/// Writes `404 Not Found`.
pub fn not_found(ctx: &mut Context) -> Result<()> {
    ctx.text("Not Found", 404)
}

/// Writes `405 Method Not Allowed`.
pub fn method_not_allowed(ctx: &mut Context) -> Result<()> {
    ctx.text("Method Not Allowed", 405)
}

/// Answers an automatic OPTIONS request with `204 No Content`.
pub fn global_options(ctx: &mut Context) -> Result<()> {
    ctx.set_status(204);
    Ok(())
}

/// Logs the payload and writes `500 Internal Server Error`.
pub fn panic_recovered(ctx: &mut Context, payload: Box<dyn Any + Send>) {
    error!(
        method = %ctx.method(),
        path = %ctx.path(),
        panic = %panic_message(payload.as_ref()),
        "panic recovered"
    );
    if let Err(e) = ctx.text("Internal Server Error", 500) {
        warn!(error = %e, "Failed to write panic response");
    }
}

/// A [`BasicError`](crate::BasicError) becomes its status plus a JSON body
/// and goes back to the error pool; anything else is a bare 500.
pub fn handle_error(ctx: &mut Context, err: Error) {
    match err {
        Error::Basic(basic) => {
            ctx.set_status(basic.status);
            if let Err(e) = ctx.json(&*basic) {
                warn!(error = %e, "Failed to serialize error body");
                ctx.set_status(500);
            }
            ctx.release_basic_error(basic);
        }
        _ => ctx.set_status(500),
    }
}

pub fn error_handler() -> ErrorHandler {
    Arc::new(handle_error)
}

pub fn not_found_handler() -> Handler {
    Arc::new(not_found)
}

pub fn method_not_allowed_handler() -> Handler {
    Arc::new(method_not_allowed)
}

pub fn global_options_handler() -> Handler {
    Arc::new(global_options)
}

pub fn panic_handler() -> PanicHandler {
    Arc::new(panic_recovered)
}
