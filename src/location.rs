//! Locations and navigation intents
//!
//! A [`Location`] is an immutable snapshot of where the router is (or is
//! going). [`NavigateOptions`] describe where to go relative to the latest
//! location; the router turns them into a `Location` with `build_next`.

use crate::params::RouteParams;
use crate::search::{SearchCodec, SearchObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Key given to the location the router starts on.
pub const INITIAL_KEY: &str = "__init__";

/// Parsed location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub pathname: String,
    pub search: SearchObject,
    /// Serialized search, `""` or starting with `?`
    pub search_str: String,
    /// Fragment without the leading `#`
    pub hash: String,
    pub href: String,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub key: Option<String>,
}

impl Location {
    /// Parse an href such as `/posts/5?tab=comments#top`.
    pub fn parse(href: &str, codec: &dyn SearchCodec) -> Self {
        let (rest, hash) = href.split_once('#').unwrap_or((href, ""));
        let (pathname, search_str) = match rest.find('?') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let pathname = if pathname.is_empty() { "/" } else { pathname };
        let search = codec.parse(search_str);

        Self::from_parts(pathname, search, search_str.to_string(), hash)
    }

    /// Assemble a location; `href` is derived from the parts.
    pub fn from_parts(
        pathname: impl Into<String>,
        search: SearchObject,
        search_str: String,
        hash: impl Into<String>,
    ) -> Self {
        let pathname = pathname.into();
        let hash = hash.into();
        let href = build_href(&pathname, &search_str, &hash);
        Self {
            pathname,
            search,
            search_str,
            hash,
            href,
            state: Value::Null,
            key: None,
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::from_parts("/", SearchObject::new(), String::new(), "").with_key(INITIAL_KEY)
    }
}

pub(crate) fn build_href(pathname: &str, search_str: &str, hash: &str) -> String {
    if hash.is_empty() {
        format!("{pathname}{search_str}")
    } else {
        format!("{pathname}{search_str}#{hash}")
    }
}

/// How a navigation changes one part of the location
pub enum Updater<T> {
    /// Keep the value of the latest location
    Keep,
    /// Replace with a fixed value
    Set(T),
    /// Derive from the value of the latest location
    Apply(Arc<dyn Fn(&T) -> T + Send + Sync>),
}

impl<T> Updater<T> {
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        Updater::Apply(Arc::new(f))
    }
}

impl<T: Clone> Updater<T> {
    /// Resolve against the previous value.
    pub fn resolve(&self, prev: &T) -> T {
        match self {
            Updater::Keep => prev.clone(),
            Updater::Set(value) => value.clone(),
            Updater::Apply(f) => f(prev),
        }
    }
}

impl<T: Clone> Clone for Updater<T> {
    fn clone(&self) -> Self {
        match self {
            Updater::Keep => Updater::Keep,
            Updater::Set(value) => Updater::Set(value.clone()),
            Updater::Apply(f) => Updater::Apply(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Updater<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Updater::Keep => f.write_str("Keep"),
            Updater::Set(value) => f.debug_tuple("Set").field(value).finish(),
            Updater::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// Navigation intent, resolved against the latest location.
///
/// ```
/// use navigator_core::NavigateOptions;
///
/// let opts = NavigateOptions::to("/posts/:id").param("id", "5").replace(true);
/// assert_eq!(opts.to.as_deref(), Some("/posts/:id"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    /// Path `to` is resolved against; defaults to the latest pathname
    pub from: Option<String>,
    /// Target path or pattern; defaults to `"."`
    pub to: Option<String>,
    /// Force `from` to the latest pathname
    pub from_current: bool,
    /// `None` keeps the params of the latest location
    pub params: Option<Updater<RouteParams>>,
    /// `None` drops the search unless a route pre-filter keeps it
    pub search: Option<Updater<SearchObject>>,
    /// `None` drops the hash
    pub hash: Option<Updater<String>>,
    pub state: Option<Value>,
    pub key: Option<String>,
    pub replace: bool,
}

impl NavigateOptions {
    pub fn to(to: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            ..Self::default()
        }
    }

    pub fn from_path(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn from_current(mut self) -> Self {
        self.from_current = true;
        self
    }

    /// Add a param to an explicit param set (replacing `Keep`).
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut params = match self.params.take() {
            Some(Updater::Set(params)) => params,
            _ => RouteParams::new(),
        };
        params.insert(key, value);
        self.params = Some(Updater::Set(params));
        self
    }

    pub fn params(mut self, params: Updater<RouteParams>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn search(mut self, search: Updater<SearchObject>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn keep_search(self) -> Self {
        self.search(Updater::Keep)
    }

    pub fn hash(mut self, hash: Updater<String>) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

/// How a link decides whether it is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveOptions {
    /// Require the full pathname to match instead of a prefix
    pub exact: bool,
    /// Also compare the hash
    pub include_hash: bool,
}

/// Options for `Router::build_link`
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub navigate: NavigateOptions,
    pub active: ActiveOptions,
    /// Falls back to the router's `default_preload`
    pub preload: Option<bool>,
    pub preload_max_age: Option<Duration>,
    pub preload_gc_max_age: Option<Duration>,
    /// Falls back to the router's `default_preload_delay`
    pub preload_delay: Option<Duration>,
    pub disabled: bool,
}

impl LinkOptions {
    pub fn to(to: impl Into<String>) -> Self {
        Self {
            navigate: NavigateOptions::to(to),
            ..Self::default()
        }
    }

    pub fn navigate(mut self, navigate: NavigateOptions) -> Self {
        self.navigate = navigate;
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.active.exact = exact;
        self
    }

    pub fn include_hash(mut self, include_hash: bool) -> Self {
        self.active.include_hash = include_hash;
        self
    }

    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = Some(preload);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// Result of `Router::build_link`
#[derive(Debug, Clone)]
pub enum LinkInfo {
    /// Absolute URL; the router does not handle it
    External { href: String },
    Internal {
        next: Location,
        is_active: bool,
        disabled: bool,
        preload: bool,
        preload_delay: Duration,
        options: NavigateOptions,
    },
}

impl LinkInfo {
    pub fn href(&self) -> &str {
        match self {
            LinkInfo::External { href } => href,
            LinkInfo::Internal { next, .. } => &next.href,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LinkInfo::Internal { is_active: true, .. })
    }
}

/// Options for `Router::match_route`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchRouteOptions {
    /// Test against the pending location instead of the current one
    pub pending: bool,
    pub case_sensitive: bool,
    pub fuzzy: bool,
}
