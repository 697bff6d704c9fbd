// Virtual host dispatch

use crate::matcher::Matcher;
use crate::{ErrorHandler, Result, Router};
use std::collections::HashMap;
use tracing::debug;

/// One host's compiled tree plus the error handler its fallback hooks report to.
pub struct Site {
    pub matcher: Matcher,
    pub error_handler: ErrorHandler,
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site").field("matcher", &self.matcher).finish_non_exhaustive()
    }
}

/// Compiled per-host routing trees.
///
/// Hosts are matched against the raw `Host` header by exact string
/// comparison, port included; there are no wildcards.
#[derive(Debug, Default)]
pub struct VirtualHosts {
    hosts: HashMap<String, Site>,
}

impl VirtualHosts {
    pub(crate) fn compile(routers: &HashMap<String, Router>) -> Result<Self> {
        let mut hosts = HashMap::with_capacity(routers.len());
        for (hostname, router) in routers {
            let mut matcher = Matcher::new();
            router.compile(&mut matcher)?;
            debug!(host = %hostname, routes = matcher.len(), "Compiled virtual host");
            hosts.insert(
                hostname.clone(),
                Site {
                    matcher,
                    error_handler: router.default_error_handler(),
                },
            );
        }
        Ok(Self { hosts })
    }

    /// The site registered for `host`, if any.
    pub fn select(&self, host: Option<&str>) -> Option<&Site> {
        host.and_then(|h| self.hosts.get(h))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }
}
