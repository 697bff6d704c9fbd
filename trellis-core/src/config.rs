// Engine and server configuration

use crate::defaults::{
    DEFAULT_ADDRESS, DEFAULT_MAX_POOLED_CONTEXTS, DEFAULT_MAX_REQUEST_BODY_SIZE,
    DEFAULT_READ_TIMEOUT, DEFAULT_SERVER_NAME,
};
use crate::matcher::MatchOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix for environment overrides, e.g. `TRELLIS_ADDR`.
pub const ENV_PREFIX: &str = "TRELLIS_";

/// Configuration for the engine and its HTTP server.
///
/// Every field has a default, so a partial TOML document is enough:
///
/// ```
/// use trellis_core::Config;
///
/// let config = Config::from_toml_str(r#"
///     addr = "0.0.0.0:9000"
///     read_timeout = 5
/// "#).unwrap();
///
/// assert_eq!(config.addr, "0.0.0.0:9000");
/// assert_eq!(config.name, "trellis");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address.
    pub addr: String,
    /// Sent as the `Server` response header.
    pub name: String,
    pub no_default_server_header: bool,
    /// Skip the `text/plain` content type on bodies that have none.
    pub no_default_content_type: bool,
    /// Time allowed to receive a request body, in seconds.
    #[serde(with = "secs")]
    pub read_timeout: Duration,
    pub max_request_body_size: usize,
    pub disable_keepalive: bool,
    /// Stop on Ctrl-C and drain open connections.
    pub graceful_shutdown: bool,
    pub handle_method_not_allowed: bool,
    pub handle_options: bool,
    pub redirect_trailing_slash: bool,
    /// Upper bound on idle contexts kept for reuse.
    pub max_pooled_contexts: usize,
    /// Compress response bodies with br, gzip or deflate per `Accept-Encoding`.
    pub compress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDRESS.to_string(),
            name: DEFAULT_SERVER_NAME.to_string(),
            no_default_server_header: false,
            no_default_content_type: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
            disable_keepalive: false,
            graceful_shutdown: false,
            handle_method_not_allowed: true,
            handle_options: true,
            redirect_trailing_slash: true,
            max_pooled_contexts: DEFAULT_MAX_POOLED_CONTEXTS,
            compress: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loading configuration file");
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by `TRELLIS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRELLIS_*` overrides from the given variables. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_ascii_lowercase();

            match name.as_str() {
                "addr" => self.addr = value,
                "name" => self.name = value,
                "no_default_server_header" => {
                    self.no_default_server_header = parse_bool(&key, &value)?
                }
                "no_default_content_type" => {
                    self.no_default_content_type = parse_bool(&key, &value)?
                }
                "read_timeout" => {
                    self.read_timeout = Duration::from_secs(parse_number(&key, &value)?)
                }
                "max_request_body_size" => {
                    self.max_request_body_size = parse_number(&key, &value)?
                }
                "disable_keepalive" => self.disable_keepalive = parse_bool(&key, &value)?,
                "graceful_shutdown" => self.graceful_shutdown = parse_bool(&key, &value)?,
                "handle_method_not_allowed" => {
                    self.handle_method_not_allowed = parse_bool(&key, &value)?
                }
                "handle_options" => self.handle_options = parse_bool(&key, &value)?,
                "redirect_trailing_slash" => {
                    self.redirect_trailing_slash = parse_bool(&key, &value)?
                }
                "max_pooled_contexts" => self.max_pooled_contexts = parse_number(&key, &value)?,
                "compress" => self.compress = parse_bool(&key, &value)?,
                _ => continue,
            }
            debug!(key = %key, "Applied environment override");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.addr.trim().is_empty() {
            return Err(Error::Config("addr must not be empty".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read_timeout must be positive".to_string()));
        }
        if self.max_request_body_size == 0 {
            return Err(Error::Config(
                "max_request_body_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            redirect_trailing_slash: self.redirect_trailing_slash,
            handle_method_not_allowed: self.handle_method_not_allowed,
            handle_options: self.handle_options,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{}: invalid boolean {:?}", key, value))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid number {:?}", key, value)))
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
