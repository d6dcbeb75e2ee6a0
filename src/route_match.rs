//! Route matches
//!
//! A [`RouteMatch`] is one route of the tree bound to concrete params. It owns
//! the loading state machine:
//!
//! ```text
//! idle ──load──▶ loading ──ok──▶ success ──stale/invalid──▶ (refetch, stays success)
//!                   │
//!                   ├──err──▶ error ──load──▶ loading
//!                   └──cancelled──▶ idle
//! ```
//!
//! Matches are shared (`Arc`) between the router's current and pending sets,
//! the match cache and in-flight loads, so every mutable part sits behind a
//! lock. Locks are always taken `load` before `state` and never held across
//! an await.

use crate::clock::{deadline, Clock};
use crate::error::{LoaderError, RouterError};
use crate::lifecycle::HookContext;
use crate::loader::{LoaderContext, LoaderOptions, LoaderRegistry};
use crate::logging::{debug_log, trace_log, warn_log};
use crate::params::RouteParams;
use crate::route::RouteRef;
use crate::search::{merge_search, SearchObject};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Loading status of a match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Mutable state of a match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub status: MatchStatus,
    /// Output of this route's own loader
    pub route_loader_data: Value,
    /// Search produced by this route's validator
    pub route_search: SearchObject,
    /// Parent search merged with `route_search`
    pub search: SearchObject,
    pub error: Option<RouterError>,
    /// Forces a refetch on the next load
    pub invalid: bool,
    /// Clock time after which the data is stale
    pub invalid_at: u64,
    /// Clock time of the last successful load (0 if never)
    pub updated_at: u64,
    /// A loader call is in flight (including background refetches)
    pub is_fetching: bool,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            status: MatchStatus::Idle,
            route_loader_data: Value::Object(Map::new()),
            route_search: SearchObject::new(),
            search: SearchObject::new(),
            error: None,
            invalid: false,
            invalid_at: u64::MAX,
            updated_at: 0,
            is_fetching: false,
        }
    }
}

/// Router-wide services every match needs
pub(crate) struct MatchEnv {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) default_loader_max_age: Duration,
    pub(crate) registry: Arc<LoaderRegistry>,
}

struct Attempt {
    id: u64,
    token: CancellationToken,
    future: Shared<BoxFuture<'static, ()>>,
}

#[derive(Default)]
struct LoadInner {
    attempt: Option<Attempt>,
    next_id: u64,
}

/// A route bound to params
pub struct RouteMatch {
    match_id: String,
    route: RouteRef,
    params: RouteParams,
    pathname: String,
    interpolated_path: String,
    parent: Mutex<Weak<RouteMatch>>,
    state: Mutex<MatchState>,
    load: Mutex<LoadInner>,
    env: Arc<MatchEnv>,
}

impl RouteMatch {
    pub(crate) fn new(
        route: RouteRef,
        match_id: String,
        params: RouteParams,
        pathname: String,
        interpolated_path: String,
        env: Arc<MatchEnv>,
    ) -> Arc<Self> {
        trace_log!("creating match '{}'", match_id);
        Arc::new(Self {
            match_id,
            route,
            params,
            pathname,
            interpolated_path,
            parent: Mutex::new(Weak::new()),
            state: Mutex::new(MatchState::default()),
            load: Mutex::new(LoadInner::default()),
            env,
        })
    }

    /// Route id with params filled in, e.g. `posts/5`
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn route_id(&self) -> &str {
        self.route.id()
    }

    pub fn route(&self) -> &RouteRef {
        &self.route
    }

    pub fn params(&self) -> &RouteParams {
        &self.params
    }

    /// Concrete pathname matched by this route (with basepath)
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// The route's own path pattern filled with params
    pub fn interpolated_path(&self) -> &str {
        &self.interpolated_path
    }

    /// Generation of the route tree the match was built from
    pub fn generation(&self) -> u64 {
        self.route.generation()
    }

    pub fn parent(&self) -> Option<Arc<RouteMatch>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<RouteMatch>>) {
        *self.parent.lock() = parent.map(Arc::downgrade).unwrap_or_default();
    }

    /// Snapshot of the mutable state
    pub fn state(&self) -> MatchState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> MatchStatus {
        self.state.lock().status
    }

    pub fn error(&self) -> Option<RouterError> {
        self.state.lock().error.clone()
    }

    pub fn search(&self) -> SearchObject {
        self.state.lock().search.clone()
    }

    pub fn route_search(&self) -> SearchObject {
        self.state.lock().route_search.clone()
    }

    pub fn route_loader_data(&self) -> Value {
        self.state.lock().route_loader_data.clone()
    }

    /// Loader data of the ancestors merged with this route's own data.
    ///
    /// Object data merges key by key with the child winning; any other
    /// non-empty child data replaces the parent's.
    pub fn loader_data(&self) -> Value {
        let own = self.route_loader_data();
        let Some(parent) = self.parent() else {
            return own;
        };
        match (parent.loader_data(), own) {
            (Value::Object(mut merged), Value::Object(own)) => {
                merged.extend(own);
                Value::Object(merged)
            }
            (inherited, own) if is_empty_data(&own) => inherited,
            (_, own) => own,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.state.lock().is_fetching
    }

    pub fn is_invalid(&self) -> bool {
        self.state.lock().invalid
    }

    /// Mark the data stale; the next load refetches.
    pub fn invalidate(&self) {
        trace_log!("invalidating match '{}'", self.match_id);
        self.state.lock().invalid = true;
    }

    /// Signal the in-flight loader, if any, to stop.
    pub fn cancel(&self) {
        if let Some(attempt) = &self.load.lock().attempt {
            if !attempt.token.is_cancelled() {
                debug_log!("cancelling load of match '{}'", self.match_id);
                attempt.token.cancel();
            }
        }
    }

    /// Wait for the in-flight load, if any, to finish.
    pub async fn settled(&self) {
        let pending = self.load.lock().attempt.as_ref().map(|a| a.future.clone());
        if let Some(future) = pending {
            future.await;
        }
    }

    /// Load the match's data.
    ///
    /// The attempt starts when this is called; the returned future resolves
    /// once it has finished. Calling again while a load is in flight joins
    /// that load instead of starting another. Fresh `success` data is not
    /// refetched.
    pub fn load(self: &Arc<Self>, opts: &LoaderOptions) -> BoxFuture<'static, ()> {
        let mut load = self.load.lock();

        if let Some(attempt) = &load.attempt {
            if !attempt.token.is_cancelled() {
                trace_log!("joining in-flight load of match '{}'", self.match_id);
                return attempt.future.clone().boxed();
            }
        }

        let now = self.env.clock.now();
        let mut state = self.state.lock();
        let needs_fetch = match state.status {
            MatchStatus::Success => state.invalid || state.invalid_at < now,
            MatchStatus::Idle | MatchStatus::Error | MatchStatus::Loading => true,
        };
        if !needs_fetch {
            return futures::future::ready(()).boxed();
        }

        if state.status != MatchStatus::Success {
            state.status = MatchStatus::Loading;
        }
        state.invalid = false;
        state.is_fetching = true;
        let search = state.search.clone();
        drop(state);

        let max_age = opts
            .max_age
            .or(self.route.options().loader_max_age)
            .unwrap_or(self.env.default_loader_max_age);

        load.next_id += 1;
        let attempt_id = load.next_id;
        let token = CancellationToken::new();
        let ctx = LoaderContext {
            params: self.params.clone(),
            search,
            signal: token.clone(),
        };

        debug_log!("loading match '{}' (attempt {})", self.match_id, attempt_id);

        let this = Arc::downgrade(self);
        let route = Arc::clone(&self.route);
        let registry = Arc::clone(&self.env.registry);
        let future = async move {
            let result = registry.invoke(&route, ctx).await;
            if let Some(this) = this.upgrade() {
                this.finish(attempt_id, result, max_age);
            }
        }
        .boxed()
        .shared();

        load.attempt = Some(Attempt {
            id: attempt_id,
            token,
            future: future.clone(),
        });
        future.boxed()
    }

    fn finish(&self, attempt_id: u64, result: Result<Value, LoaderError>, max_age: Duration) {
        let mut load = self.load.lock();
        let cancelled = match &load.attempt {
            Some(attempt) if attempt.id == attempt_id => attempt.token.is_cancelled(),
            _ => {
                trace_log!(
                    "dropping superseded result of match '{}' (attempt {})",
                    self.match_id,
                    attempt_id
                );
                return;
            }
        };
        load.attempt = None;

        let mut state = self.state.lock();
        state.is_fetching = false;

        let cancelled = cancelled
            || matches!(&result, Err(e) if e.is_cancelled());
        if cancelled {
            debug_log!("load of match '{}' was cancelled", self.match_id);
            if state.status == MatchStatus::Loading {
                state.status = MatchStatus::Idle;
            }
            return;
        }

        match result {
            Ok(data) => {
                let now = self.env.clock.now();
                state.status = MatchStatus::Success;
                state.route_loader_data = data;
                state.error = None;
                state.updated_at = now;
                state.invalid_at = deadline(now, max_age);
                debug_log!("loaded match '{}'", self.match_id);
            }
            Err(source) => {
                warn_log!("loader of match '{}' failed: {}", self.match_id, source);
                state.status = MatchStatus::Error;
                state.error = Some(RouterError::Loader {
                    route_id: self.route.id().to_string(),
                    source,
                });
            }
        }
    }

    /// Run the route's search validator against the parent's search.
    ///
    /// A changed result invalidates the match. A validation failure puts the
    /// match in the `error` state and passes the parent search through.
    pub(crate) fn validate(&self, parent_search: &SearchObject) {
        let validated = match &self.route.options().validate_search {
            Some(validate) => validate(parent_search),
            None => Ok(SearchObject::new()),
        };

        let mut state = self.state.lock();
        match validated {
            Ok(route_search) => {
                if state.route_search != route_search {
                    state.invalid = true;
                }
                state.search = merge_search(parent_search, &route_search);
                state.route_search = route_search;
                if self.has_validation_error(&state) {
                    state.error = None;
                    state.status = MatchStatus::Idle;
                }
            }
            Err(message) => {
                warn_log!("invalid search for route '{}': {}", self.route.id(), message);
                state.search = parent_search.clone();
                state.error = Some(RouterError::InvalidSearch {
                    route_id: self.route.id().to_string(),
                    message,
                });
                state.status = MatchStatus::Error;
            }
        }
    }

    fn has_validation_error(&self, state: &MatchState) -> bool {
        state.status == MatchStatus::Error
            && matches!(state.error, Some(RouterError::InvalidSearch { .. }))
    }

    /// Search validation failed; the match is skipped when loading.
    pub fn is_validation_error(&self) -> bool {
        self.has_validation_error(&self.state.lock())
    }

    /// Forget a failed load so a later visit starts clean.
    pub(crate) fn reset_error(&self) {
        let mut state = self.state.lock();
        if state.status == MatchStatus::Error && !state.is_fetching {
            state.status = MatchStatus::Idle;
            state.error = None;
        }
    }

    pub(crate) fn restore(&self, status: MatchStatus, data: Value, invalid: bool, invalid_at: u64) {
        let mut state = self.state.lock();
        state.status = status;
        state.route_loader_data = data;
        state.invalid = invalid;
        state.invalid_at = invalid_at;
    }

    pub(crate) fn hook_context(&self) -> HookContext {
        HookContext {
            match_id: self.match_id.clone(),
            params: self.params.clone(),
            search: self.search(),
        }
    }
}

fn is_empty_data(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RouteMatch")
            .field("match_id", &self.match_id)
            .field("route_id", &self.route.id())
            .field("pathname", &self.pathname)
            .field("params", &self.params)
            .field("status", &state.status)
            .field("is_fetching", &state.is_fetching)
            .finish()
    }
}
