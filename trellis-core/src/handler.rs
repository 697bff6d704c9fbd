// Handler types shared by routes, routers and the engine hooks

use crate::{Context, Error, Result};
use std::any::Any;
use std::sync::Arc;

/// A chain entry: main handler or middleware.
///
/// Return `ctx.next()` to hand control to the following entry; returning
/// `Ok(())` without it completes the request.
pub type Handler = Arc<dyn Fn(&mut Context) -> Result<()> + Send + Sync>;

/// Receives the error returned by a chain entry.
pub type ErrorHandler = Arc<dyn Fn(&mut Context, Error) + Send + Sync>;

/// Receives the payload of a panic caught at the service boundary.
pub type PanicHandler = Arc<dyn Fn(&mut Context, Box<dyn Any + Send>) + Send + Sync>;

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as an [`ErrorHandler`].
pub fn error_handler<F>(f: F) -> ErrorHandler
where
    F: Fn(&mut Context, Error) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`PanicHandler`].
pub fn panic_handler<F>(f: F) -> PanicHandler
where
    F: Fn(&mut Context, Box<dyn Any + Send>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
