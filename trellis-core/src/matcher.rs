//! Method + path lookup over `matchit` tries.
//!
//! One trie per HTTP method. Patterns accept `:name` parameters and `*name`
//! catch-alls (converted to matchit's `{name}` / `{*name}` syntax), or
//! matchit syntax directly.

use crate::chain::CompiledRoute;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Switches for the fallback behaviour of [`Matcher::lookup`].
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub redirect_trailing_slash: bool,
    pub handle_method_not_allowed: bool,
    pub handle_options: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            handle_method_not_allowed: true,
            handle_options: true,
        }
    }
}

/// Outcome of a lookup.
#[derive(Debug)]
pub enum Lookup {
    Found {
        route: Arc<CompiledRoute>,
        params: Vec<(String, String)>,
    },
    /// The path with its trailing slash toggled matches; redirect there.
    Redirect { location: String, status: u16 },
    /// OPTIONS request for a path served under other methods.
    Options { allow: String },
    MethodNotAllowed { allow: String },
    NotFound,
}

/// Per-method route tries for one routing tree.
#[derive(Default)]
pub struct Matcher {
    trees: BTreeMap<String, matchit::Router<Arc<CompiledRoute>>>,
    len: usize,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled route. Conflicting patterns are rejected.
    pub fn insert(&mut self, compiled: CompiledRoute) -> Result<()> {
        let method = compiled.route().method().to_string();
        let path = compiled.route().path().to_string();
        let pattern = to_matchit_path(&path);

        self.trees
            .entry(method.clone())
            .or_insert_with(matchit::Router::new)
            .insert(pattern, Arc::new(compiled))
            .map_err(|e| Error::Config(format!("cannot register {} {}: {}", method, path, e)))?;
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn lookup(&self, method: &str, path: &str, opts: MatchOptions) -> Lookup {
        if let Some(tree) = self.trees.get(method) {
            if let Ok(matched) = tree.at(path) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                return Lookup::Found {
                    route: matched.value.clone(),
                    params,
                };
            }

            if opts.redirect_trailing_slash && path != "/" && method != "CONNECT" {
                let toggled = match path.strip_suffix('/') {
                    Some(stripped) => stripped.to_string(),
                    None => format!("{}/", path),
                };
                if !toggled.is_empty() && tree.at(&toggled).is_ok() {
                    trace!(from = %path, to = %toggled, "Trailing slash redirect");
                    let status = if method == "GET" || method == "HEAD" {
                        301
                    } else {
                        308
                    };
                    return Lookup::Redirect {
                        location: toggled,
                        status,
                    };
                }
            }
        }

        if method == "OPTIONS" && opts.handle_options {
            let allow = self.allowed(path, method);
            if !allow.is_empty() {
                return Lookup::Options {
                    allow: format!("{}, OPTIONS", allow),
                };
            }
        } else if opts.handle_method_not_allowed {
            let allow = self.allowed(path, method);
            if !allow.is_empty() {
                return Lookup::MethodNotAllowed { allow };
            }
        }

        Lookup::NotFound
    }

    /// Comma-separated methods, other than `skip`, that serve `path`.
    fn allowed(&self, path: &str, skip: &str) -> String {
        self.trees
            .iter()
            .filter(|(method, _)| method.as_str() != skip && method.as_str() != "OPTIONS")
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("methods", &self.trees.keys().collect::<Vec<_>>())
            .field("routes", &self.len)
            .finish()
    }
}

/// Convert `:name` / `*name` segments to matchit syntax.
pub(crate) fn to_matchit_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{}}}", name)
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "path" } else { name };
                format!("{{*{}}}", name)
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
