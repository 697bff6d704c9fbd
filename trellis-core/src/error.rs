// Error types for the Trellis engine

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Basic(Box<BasicError>),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a fresh, unpooled [`BasicError`].
    pub fn basic(status: u16, message: impl Into<String>) -> Self {
        Error::Basic(Box::new(BasicError::new(status, message)))
    }

    /// Wrap any foreign error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(Box::new(err))
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Basic(e) => e.status,
            Error::Bind(_) | Error::Validation(_) | Error::Json(_) => 400,
            _ => 500,
        }
    }

    pub fn as_basic(&self) -> Option<&BasicError> {
        match self {
            Error::Basic(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BasicError> for Error {
    fn from(err: BasicError) -> Self {
        Error::Basic(Box::new(err))
    }
}

/// Lightweight structured error carrying a status, a message and an optional code.
///
/// Serializes as `{"message": ..., "code": ...}`; the status travels on the
/// response line instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicError {
    #[serde(skip)]
    pub status: u16,
    pub message: String,
    pub code: Option<Value>,
}

impl BasicError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<Value>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for BasicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BasicError {}

/// Free list of boxed [`BasicError`] values.
///
/// Owned by the compiled service; instances are cleared on release so an
/// acquired error never carries a previous message or code.
pub struct BasicErrorPool {
    free: Mutex<Vec<Box<BasicError>>>,
    capacity: usize,
}

impl BasicErrorPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn acquire(&self, status: u16, message: impl Into<String>) -> Box<BasicError> {
        let mut err = self.free.lock().pop().unwrap_or_default();
        err.status = status;
        err.message = message.into();
        err
    }

    pub fn release(&self, mut err: Box<BasicError>) {
        err.status = 0;
        err.message.clear();
        err.code = None;

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(err);
        }
    }

    /// Number of idle instances.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BasicErrorPool {
    fn default() -> Self {
        Self::new(256)
    }
}
