//! Route data loading
//!
//! Loaders are async functions `LoaderContext -> Result<Value, LoaderError>`.
//! Every invocation goes through the [`LoaderRegistry`], which keeps per-route
//! bookkeeping of in-flight and most recent invocations.

use crate::clock::Clock;
use crate::error::LoaderError;
use crate::params::RouteParams;
use crate::route::RouteNode;
use crate::search::SearchObject;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Uniform input of every loader call
#[derive(Debug, Clone)]
pub struct LoaderContext {
    /// Params merged from the root down to the match
    pub params: RouteParams,
    /// Search of the match (parent search merged with its own)
    pub search: SearchObject,
    /// Cancelled when the attempt is superseded; loaders should stop early
    pub signal: CancellationToken,
}

impl LoaderContext {
    pub fn new(params: RouteParams, search: SearchObject) -> Self {
        Self {
            params,
            search,
            signal: CancellationToken::new(),
        }
    }

    /// Shortcut for `Err(LoaderError::cancelled())` once the signal fired.
    pub fn ensure_active(&self) -> Result<(), LoaderError> {
        if self.signal.is_cancelled() {
            Err(LoaderError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Type-erased loader
pub type LoaderFn =
    Arc<dyn Fn(LoaderContext) -> BoxFuture<'static, Result<Value, LoaderError>> + Send + Sync>;

/// Per-call loading options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Speculative load: guard errors are not reported to hooks and
    /// results are parked in the match cache.
    pub preload: bool,
    /// Freshness window overriding the route's `loader_max_age`
    pub max_age: Option<Duration>,
    /// Cache retention for preloaded matches
    pub gc_max_age: Option<Duration>,
}

impl LoaderOptions {
    pub fn preload() -> Self {
        Self {
            preload: true,
            ..Self::default()
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn gc_max_age(mut self, gc_max_age: Duration) -> Self {
        self.gc_max_age = Some(gc_max_age);
        self
    }
}

/// One loader call as recorded by the registry
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderInvocation {
    pub id: u64,
    /// Start time (clock milliseconds)
    pub loaded_at: u64,
    pub params: RouteParams,
    pub search: SearchObject,
}

/// Snapshot of a route's loader bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderState {
    /// Most recently started invocation
    pub current: Option<LoaderInvocation>,
    /// Same as `current`; kept for callers that track "latest" separately
    pub latest: Option<LoaderInvocation>,
    /// Invocations still running
    pub pending: Vec<LoaderInvocation>,
}

/// Per-route-id loader bookkeeping, independent of any match
pub struct LoaderRegistry {
    slots: Mutex<HashMap<String, LoaderState>>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl LoaderRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `route`'s loader, recording the invocation.
    ///
    /// Routes without a loader resolve to an empty object.
    pub async fn invoke(&self, route: &RouteNode, ctx: LoaderContext) -> Result<Value, LoaderError> {
        let Some(loader) = route.options().loader.clone() else {
            return Ok(Value::Object(Map::new()));
        };

        let invocation = LoaderInvocation {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            loaded_at: self.clock.now(),
            params: ctx.params.clone(),
            search: ctx.search.clone(),
        };

        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(route.id().to_string()).or_default();
            slot.current = Some(invocation.clone());
            slot.latest = Some(invocation.clone());
            slot.pending.push(invocation.clone());
        }

        // Removes the pending record even if the call is dropped mid-flight
        let _pending = PendingGuard {
            registry: self,
            route_id: route.id(),
            invocation_id: invocation.id,
        };

        loader(ctx).await
    }

    /// Bookkeeping snapshot for a route id.
    pub fn state(&self, route_id: &str) -> LoaderState {
        self.slots.lock().get(route_id).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("routes", &self.slots.lock().len())
            .finish_non_exhaustive()
    }
}

struct PendingGuard<'a> {
    registry: &'a LoaderRegistry,
    route_id: &'a str,
    invocation_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.registry.slots.lock().get_mut(self.route_id) {
            slot.pending.retain(|inv| inv.id != self.invocation_id);
        }
    }
}

/// Handle to one route's loader, as returned by `Router::get_loader`
#[derive(Clone)]
pub struct RouteLoader {
    route: Arc<RouteNode>,
    registry: Arc<LoaderRegistry>,
}

impl RouteLoader {
    pub(crate) fn new(route: Arc<RouteNode>, registry: Arc<LoaderRegistry>) -> Self {
        Self { route, registry }
    }

    pub fn route_id(&self) -> &str {
        self.route.id()
    }

    /// Call the loader outside of any match.
    pub async fn fetch(&self, ctx: LoaderContext) -> Result<Value, LoaderError> {
        self.registry.invoke(&self.route, ctx).await
    }

    pub fn state(&self) -> LoaderState {
        self.registry.state(self.route.id())
    }
}

impl std::fmt::Debug for RouteLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteLoader")
            .field("route_id", &self.route.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::route::RouteConfig;
    use crate::tree::RouteTree;
    use serde_json::json;

    fn tree() -> RouteTree {
        RouteTree::build(
            RouteConfig::root()
                .child(RouteConfig::new("posts").loader(|ctx: LoaderContext| async move {
                    ctx.ensure_active()?;
                    Ok::<_, LoaderError>(json!({ "page": ctx.search.get("page").cloned() }))
                }))
                .child(RouteConfig::new("about")),
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_records_invocation() {
        let clock = ManualClock::new(42);
        let registry = Arc::new(LoaderRegistry::new(Arc::new(clock)));
        let tree = tree();
        let posts = tree.get("posts").unwrap();

        let mut search = SearchObject::new();
        search.insert("page".into(), json!(3));
        let data = registry
            .invoke(&posts, LoaderContext::new(RouteParams::new(), search))
            .await
            .unwrap();
        assert_eq!(data, json!({ "page": 3 }));

        let state = registry.state("posts");
        assert_eq!(state.current.as_ref().map(|i| i.loaded_at), Some(42));
        assert_eq!(state.latest, state.current);
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_route_without_loader_yields_empty_object() {
        let registry = Arc::new(LoaderRegistry::new(Arc::new(ManualClock::new(0))));
        let tree = tree();
        let about = tree.get("about").unwrap();

        let loader = RouteLoader::new(about, Arc::clone(&registry));
        let data = loader
            .fetch(LoaderContext::new(RouteParams::new(), SearchObject::new()))
            .await
            .unwrap();
        assert_eq!(data, json!({}));
        assert_eq!(loader.route_id(), "about");
        assert_eq!(loader.state(), LoaderState::default());
    }

    #[tokio::test]
    async fn test_cancelled_signal_is_observable() {
        let registry = Arc::new(LoaderRegistry::new(Arc::new(ManualClock::new(0))));
        let tree = tree();
        let posts = tree.get("posts").unwrap();

        let ctx = LoaderContext::new(RouteParams::new(), SearchObject::new());
        ctx.signal.cancel();
        let err = registry.invoke(&posts, ctx).await.unwrap_err();
        assert_eq!(err.code(), Some("CANCELLED"));
        assert!(registry.state("posts").pending.is_empty());
    }
}
