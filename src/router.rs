//! Router orchestrator
//!
//! The [`Router`] owns the route tree, the observable [`RouterState`], the
//! match cache and the location source. A navigation runs as:
//!
//! 1. `build_next` turns [`NavigateOptions`] into a [`Location`]
//! 2. the location source records it (push or replace)
//! 3. `load` matches the location, runs guards and loaders, then commits the
//!    new matches and fires lifecycle hooks
//!
//! Only the most recent `load` commits; an older one that finishes later is
//! dropped without side effects.

use crate::cache::{CacheStats, MatchCache};
use crate::clock::{deadline, Clock, SystemClock};
use crate::error::{Result, RouterError};
use crate::guards::{run_guards, GuardContext, GuardResult};
use crate::history::{HistoryEntry, LocationSource, MemoryHistory};
use crate::hydration::{DehydratedRouter, DehydratedRouterState};
use crate::lifecycle::BoxedLifecycle;
use crate::loader::{LoaderOptions, LoaderRegistry, RouteLoader};
use crate::location::{build_href, LinkInfo, LinkOptions, Location, MatchRouteOptions, NavigateOptions, Updater};
use crate::logging::{debug_log, error_log, info_log, trace_log, warn_log};
use crate::matcher::{clean_path, interpolate_path, join_paths, match_pathname, resolve_path, trim_path, MatchLocation};
use crate::params::RouteParams;
use crate::route::{RouteConfig, RouteRef};
use crate::route_match::{MatchEnv, RouteMatch};
use crate::search::{apply_filters, QuerySearchCodec, SearchCodec, SearchFilter, SearchObject};
use crate::state::{RouterState, RouterStatus, RouterStore};
use crate::tree::RouteTree;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Guard redirects followed by one `navigate` call before giving up
pub const MAX_REDIRECTS: usize = 10;

/// Narrows the candidate routes at each level of matching.
pub type FilterRoutesFn = Arc<dyn Fn(&[RouteRef]) -> Vec<RouteRef> + Send + Sync>;

/// Called after every committed navigation.
pub type RouteChangeFn = Arc<dyn Fn(&RouterState) + Send + Sync>;

// ============================================================================
// RouterOptions
// ============================================================================

/// Router configuration
///
/// ```
/// use navigator_core::RouterOptions;
/// use std::time::Duration;
///
/// let options = RouterOptions::default()
///     .basepath("/app")
///     .default_loader_max_age(Duration::from_secs(30))
///     .default_preload(true);
/// assert_eq!(options.basepath, "/app");
/// ```
#[derive(Clone)]
pub struct RouterOptions {
    pub basepath: String,
    /// Freshness window of loaded data
    pub default_loader_max_age: Duration,
    /// How long exited matches stay cached
    pub default_loader_gc_max_age: Duration,
    pub default_preload_max_age: Duration,
    /// Falls back to `default_loader_gc_max_age`
    pub default_preload_gc_max_age: Option<Duration>,
    pub default_preload_delay: Duration,
    pub default_preload: bool,
    pub case_sensitive: bool,
    pub search_codec: Arc<dyn SearchCodec>,
    pub filter_routes: Option<FilterRoutesFn>,
    pub on_route_change: Option<RouteChangeFn>,
    pub clock: Arc<dyn Clock>,
    pub history: Arc<dyn LocationSource>,
    /// Upper bound of the match cache (LRU)
    pub match_cache_capacity: usize,
    /// Router-wide value handed to guards and exported by `dehydrate`
    pub context: Value,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            basepath: "/".to_string(),
            default_loader_max_age: Duration::ZERO,
            default_loader_gc_max_age: Duration::from_secs(5 * 60),
            default_preload_max_age: Duration::from_secs(2),
            default_preload_gc_max_age: None,
            default_preload_delay: Duration::from_millis(50),
            default_preload: false,
            case_sensitive: false,
            search_codec: Arc::new(QuerySearchCodec),
            filter_routes: None,
            on_route_change: None,
            clock: Arc::new(SystemClock),
            history: Arc::new(MemoryHistory::default()),
            match_cache_capacity: MatchCache::DEFAULT_CAPACITY,
            context: Value::Null,
        }
    }
}

impl RouterOptions {
    pub fn basepath(mut self, basepath: impl Into<String>) -> Self {
        self.basepath = basepath.into();
        self
    }

    pub fn default_loader_max_age(mut self, max_age: Duration) -> Self {
        self.default_loader_max_age = max_age;
        self
    }

    pub fn default_loader_gc_max_age(mut self, gc_max_age: Duration) -> Self {
        self.default_loader_gc_max_age = gc_max_age;
        self
    }

    pub fn default_preload_max_age(mut self, max_age: Duration) -> Self {
        self.default_preload_max_age = max_age;
        self
    }

    pub fn default_preload_gc_max_age(mut self, gc_max_age: Duration) -> Self {
        self.default_preload_gc_max_age = Some(gc_max_age);
        self
    }

    pub fn default_preload_delay(mut self, delay: Duration) -> Self {
        self.default_preload_delay = delay;
        self
    }

    pub fn default_preload(mut self, preload: bool) -> Self {
        self.default_preload = preload;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn search_codec(mut self, codec: Arc<dyn SearchCodec>) -> Self {
        self.search_codec = codec;
        self
    }

    pub fn filter_routes<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[RouteRef]) -> Vec<RouteRef> + Send + Sync + 'static,
    {
        self.filter_routes = Some(Arc::new(filter));
        self
    }

    pub fn on_route_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&RouterState) + Send + Sync + 'static,
    {
        self.on_route_change = Some(Arc::new(f));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn history(mut self, history: Arc<dyn LocationSource>) -> Self {
        self.history = history;
        self
    }

    pub fn match_cache_capacity(mut self, capacity: usize) -> Self {
        self.match_cache_capacity = capacity;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Debug for RouterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterOptions")
            .field("basepath", &self.basepath)
            .field("default_loader_max_age", &self.default_loader_max_age)
            .field("default_loader_gc_max_age", &self.default_loader_gc_max_age)
            .field("default_preload_max_age", &self.default_preload_max_age)
            .field("default_preload_gc_max_age", &self.default_preload_gc_max_age)
            .field("default_preload_delay", &self.default_preload_delay)
            .field("default_preload", &self.default_preload)
            .field("case_sensitive", &self.case_sensitive)
            .field("match_cache_capacity", &self.match_cache_capacity)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// `"/"`, or the basepath with one leading slash and no trailing one.
fn normalize_basepath(basepath: &str) -> String {
    match trim_path(basepath) {
        "" | "/" => "/".to_string(),
        trimmed => format!("/{trimmed}"),
    }
}

fn is_external(to: &str) -> bool {
    url::Url::parse(to).is_ok()
}

fn lifecycle_of(route_match: &RouteMatch) -> Option<&BoxedLifecycle> {
    route_match.route().options().lifecycle.as_ref()
}

/// A route of the matched chain with the params accumulated up to it
struct Resolved {
    route: RouteRef,
    params: RouteParams,
}

// ============================================================================
// Router
// ============================================================================

/// Navigation engine
///
/// # Example
///
/// ```
/// use navigator_core::{LoaderError, NavigateOptions, RouteConfig, Router, RouterOptions};
/// use serde_json::json;
///
/// let router = Router::new(
///     RouteConfig::root().child(
///         RouteConfig::new("posts")
///             .loader(|_| async { Ok::<_, LoaderError>(json!(["hello", "world"])) })
///             .child(RouteConfig::new(":id")),
///     ),
///     RouterOptions::default(),
/// )
/// .unwrap();
///
/// pollster::block_on(router.navigate(NavigateOptions::to("/posts/5"))).unwrap();
///
/// let state = router.state();
/// assert_eq!(state.current_location.pathname, "/posts/5");
/// assert_eq!(state.current_match_ids(), vec!["__root__", "posts", "posts/5"]);
/// ```
pub struct Router {
    options: RouterOptions,
    basepath: String,
    tree: RwLock<Arc<RouteTree>>,
    generation: AtomicU64,
    store: RouterStore,
    cache: Mutex<MatchCache>,
    env: Arc<MatchEnv>,
    context: Mutex<Value>,
    load_token: AtomicU64,
}

impl Router {
    /// Build the route tree and read the initial location from the
    /// configured location source.
    pub fn new(config: RouteConfig, options: RouterOptions) -> Result<Self> {
        let tree = RouteTree::build(config, 1)?;
        let basepath = normalize_basepath(&options.basepath);
        let env = Arc::new(MatchEnv {
            clock: Arc::clone(&options.clock),
            default_loader_max_age: options.default_loader_max_age,
            registry: Arc::new(LoaderRegistry::new(Arc::clone(&options.clock))),
        });
        let location = parse_entry(&options.history.current(), options.search_codec.as_ref());

        info_log!(
            "router created with {} routes at '{}' (basepath '{}')",
            tree.len(),
            location.href,
            basepath
        );

        Ok(Self {
            basepath,
            tree: RwLock::new(Arc::new(tree)),
            generation: AtomicU64::new(1),
            store: RouterStore::new(RouterState::new(location)),
            cache: Mutex::new(MatchCache::with_capacity(options.match_cache_capacity)),
            env,
            context: Mutex::new(options.context.clone()),
            load_token: AtomicU64::new(0),
            options,
        })
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Normalized basepath (`/` or `/app`)
    pub fn basepath(&self) -> &str {
        &self.basepath
    }

    pub fn history(&self) -> &Arc<dyn LocationSource> {
        &self.options.history
    }

    pub fn route_tree(&self) -> Arc<RouteTree> {
        Arc::clone(&self.tree.read())
    }

    pub fn store(&self) -> &RouterStore {
        &self.store
    }

    /// Snapshot of the router state
    pub fn state(&self) -> RouterState {
        self.store.state()
    }

    /// Receiver notified after every state change
    pub fn subscribe(&self) -> watch::Receiver<RouterState> {
        self.store.subscribe()
    }

    pub fn context(&self) -> Value {
        self.context.lock().clone()
    }

    pub fn set_context(&self, context: Value) {
        *self.context.lock() = context;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats().clone()
    }

    /// Ids of the matches currently parked in the cache
    pub fn cached_match_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .lock()
            .matches()
            .iter()
            .map(|m| m.match_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// A cached match by id
    pub fn cached_match(&self, match_id: &str) -> Option<Arc<RouteMatch>> {
        self.cache
            .lock()
            .entry(match_id)
            .map(|entry| Arc::clone(&entry.route_match))
    }

    pub fn get_route(&self, id: &str) -> Result<RouteRef> {
        self.route_tree()
            .get(id)
            .ok_or_else(|| RouterError::RouteNotFound { id: id.to_string() })
    }

    /// Handle to a route's loader, usable outside of navigation.
    pub fn get_loader(&self, route_id: &str) -> Result<RouteLoader> {
        let route = self.get_route(route_id)?;
        Ok(RouteLoader::new(route, Arc::clone(&self.env.registry)))
    }

    /// Resolve `to` against `from` under the router's basepath.
    pub fn resolve_path(&self, from: &str, to: &str) -> String {
        resolve_path(&self.basepath, from, &clean_path(to))
    }

    /// Drop all state and start over at the location source's current entry.
    pub fn reset(&self) {
        self.cancel_matches();
        let location = self.current_history_location();
        self.cache.lock().clear();
        self.store.update(|state| *state = RouterState::new(location));
        debug_log!("router state reset");
    }

    /// Replace the route tree. Matches built from the previous tree are never
    /// reused; the cache and loader bookkeeping start empty.
    pub fn update_routes(&self, config: RouteConfig) -> Result<()> {
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        let tree = RouteTree::build(config, generation)?;
        self.generation.store(generation, Ordering::SeqCst);
        *self.tree.write() = Arc::new(tree);
        self.cache.lock().clear();
        self.env.registry.clear();
        info_log!("route tree replaced (generation {})", generation);
        Ok(())
    }

    /// Router is loading, or a committed match is refetching.
    pub fn is_fetching(&self) -> bool {
        self.store.with(|state| {
            state.is_loading() || state.current_matches.iter().any(|m| m.is_fetching())
        })
    }

    /// A cached match that is not active is loading.
    pub fn is_preloading(&self) -> bool {
        let active: HashSet<String> = self
            .store
            .with(|state| state.current_match_ids().into_iter().collect());
        self.cache
            .lock()
            .matches()
            .iter()
            .any(|m| m.is_fetching() && !active.contains(m.match_id()))
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Match `pathname` against the route tree, root first.
    ///
    /// Existing matches are reused, in order of preference, from the current
    /// matches, the pending matches, the cache, and any live match with the
    /// same id. With `strict`, a failing `parse_params` aborts with
    /// [`RouterError::InvalidParams`]; otherwise the raw params are kept.
    pub fn match_routes(&self, pathname: &str, strict: bool) -> Result<Vec<Arc<RouteMatch>>> {
        let tree = self.route_tree();
        let resolved = self.resolve_routes(&tree, pathname, strict)?;
        let (current, pending) = self
            .store
            .with(|state| (state.current_matches.clone(), state.pending_matches.clone()));

        let matches: Vec<Arc<RouteMatch>> = resolved
            .into_iter()
            .map(|Resolved { route, params }| {
                let match_id = interpolate_path(route.id(), &params, true);
                let reusable = |m: &Arc<RouteMatch>| {
                    m.match_id() == match_id
                        && m.route_id() == route.id()
                        && m.generation() == tree.generation()
                        && m.params() == &params
                };

                let existing = current
                    .iter()
                    .chain(pending.iter())
                    .find(|m| reusable(*m))
                    .cloned()
                    .or_else(|| {
                        let mut cache = self.cache.lock();
                        cache
                            .get(&match_id)
                            .filter(|m| reusable(m))
                            .or_else(|| cache.live(&match_id).filter(|m| reusable(m)))
                    });

                existing.unwrap_or_else(|| {
                    let pathname = join_paths(&[
                        self.basepath.clone(),
                        interpolate_path(route.full_path(), &params, false),
                    ]);
                    let interpolated_path = interpolate_path(route.path(), &params, false);
                    let created = RouteMatch::new(
                        route,
                        match_id,
                        params,
                        pathname,
                        interpolated_path,
                        Arc::clone(&self.env),
                    );
                    self.cache.lock().claim(&created);
                    created
                })
            })
            .collect();

        let mut parent: Option<&Arc<RouteMatch>> = None;
        for route_match in &matches {
            route_match.set_parent(parent);
            parent = Some(route_match);
        }

        trace_log!(
            "matched '{}' to [{}]",
            pathname,
            matches
                .iter()
                .map(|m| m.match_id())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(matches)
    }

    fn resolve_routes(&self, tree: &RouteTree, pathname: &str, strict: bool) -> Result<Vec<Resolved>> {
        let mut resolved = Vec::new();
        let mut params = RouteParams::new();
        let mut routes = vec![Arc::clone(tree.root())];

        loop {
            let candidates = match &self.options.filter_routes {
                Some(filter) => filter(routes.as_slice()),
                None => routes,
            };
            let Some(found) = self.find_routes(&candidates, &[], pathname, &mut params, strict)? else {
                break;
            };
            resolved.extend(found.iter().map(|route| Resolved {
                route: Arc::clone(route),
                params: params.clone(),
            }));

            match found.last() {
                Some(last) if !last.children().is_empty() => routes = last.children().to_vec(),
                _ => break,
            }
        }

        Ok(resolved)
    }

    /// First route in `routes` matching `pathname`, preceded by the pathless
    /// layouts it was found through.
    fn find_routes(
        &self,
        routes: &[RouteRef],
        parents: &[RouteRef],
        pathname: &str,
        params: &mut RouteParams,
        strict: bool,
    ) -> Result<Option<Vec<RouteRef>>> {
        for route in routes {
            if route.is_layout() && !route.children().is_empty() {
                let mut chain = parents.to_vec();
                chain.push(Arc::clone(route));
                if let Some(found) = self.find_routes(route.children(), &chain, pathname, params, strict)? {
                    return Ok(Some(found));
                }
                continue;
            }

            let location = MatchLocation {
                to: Some(route.full_path().to_string()),
                fuzzy: route.path() != "/" || !route.children().is_empty(),
                case_sensitive: route
                    .options()
                    .case_sensitive
                    .unwrap_or(self.options.case_sensitive),
            };
            let Some(matched) = match_pathname(&self.basepath, pathname, &location) else {
                continue;
            };

            let parsed = match &route.options().parse_params {
                Some(parse) => match parse(&matched) {
                    Ok(parsed) => parsed,
                    Err(message) if strict => {
                        warn_log!("invalid params for route '{}': {}", route.id(), message);
                        return Err(RouterError::InvalidParams {
                            route_id: route.id().to_string(),
                            message,
                        });
                    }
                    Err(_) => matched,
                },
                None => matched,
            };
            params.extend(&parsed);

            let mut chain = parents.to_vec();
            chain.push(Arc::clone(route));
            return Ok(Some(chain));
        }
        Ok(None)
    }

    /// Test a target against the current (or pending) location.
    ///
    /// Returns the params bound by the target pattern, or `None` when it does
    /// not match (or `pending` is asked for and nothing is pending).
    pub fn match_route(&self, opts: &NavigateOptions, match_opts: MatchRouteOptions) -> Option<RouteParams> {
        let mut opts = opts.clone();
        opts.to = opts
            .to
            .take()
            .map(|to| self.resolve_path(opts.from.as_deref().unwrap_or(""), &to));
        let next = self.build_next(&opts);

        let base = if match_opts.pending {
            self.store.with(|state| state.pending_location.clone())?
        } else {
            self.store.with(|state| state.current_location.clone())
        };

        match_pathname(
            &self.basepath,
            &base.pathname,
            &MatchLocation {
                to: Some(next.pathname),
                fuzzy: match_opts.fuzzy,
                case_sensitive: match_opts.case_sensitive,
            },
        )
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Signal every current and pending match to stop loading.
    pub fn cancel_matches(&self) {
        let matches = self.store.with(|state| {
            state
                .current_matches
                .iter()
                .chain(state.pending_matches.iter())
                .cloned()
                .collect::<Vec<_>>()
        });
        for route_match in matches {
            route_match.cancel();
        }
    }

    /// Drop cached matches whose retention window has passed.
    pub fn clean_match_cache(&self) {
        let now = self.env.clock.now();
        let collected = self.cache.lock().clean(now);
        if collected > 0 {
            trace_log!("collected {} cached matches", collected);
        }
    }

    fn is_latest(&self, token: u64) -> bool {
        self.load_token.load(Ordering::SeqCst) == token
    }

    /// Load `next` (or the latest location) and commit it.
    ///
    /// When a newer `load` starts before this one finishes, this one returns
    /// `Ok` without committing anything.
    pub async fn load(&self, next: Option<Location>) -> Result<()> {
        let token = self.load_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_matches();
        self.clean_match_cache();

        let latest = next.unwrap_or_else(|| self.store.with(|state| state.latest_location.clone()));
        let matches = match self.match_routes(&latest.pathname, true) {
            Ok(matches) => matches,
            Err(err) => {
                self.store.update(|state| state.latest_location = latest.clone());
                return Err(err);
            }
        };

        self.store.update(|state| {
            state.latest_location = latest.clone();
            state.status = RouterStatus::Loading;
            state.pending_matches = matches.clone();
            state.pending_location = Some(latest.clone());
        });
        debug_log!("loading '{}'", latest.href);

        if let Err(err) = self.load_matches(&matches, &LoaderOptions::default()).await {
            warn_log!("navigation to '{}' cancelled: {}", latest.href, err);
            if !self.is_latest(token) {
                debug_log!("dropping outdated failure of '{}'", latest.href);
                return Ok(());
            }
            self.store.update(|state| {
                state.status = RouterStatus::Idle;
                state.pending_matches.clear();
                state.pending_location = None;
            });
            return Err(err);
        }

        if !self.is_latest(token) {
            debug_log!("dropping outdated load of '{}'", latest.href);
            return Ok(());
        }

        self.commit(latest, matches);
        Ok(())
    }

    fn commit(&self, location: Location, matches: Vec<Arc<RouteMatch>>) {
        let previous = self.store.with(|state| state.current_matches.clone());
        let held =
            |set: &[Arc<RouteMatch>], m: &Arc<RouteMatch>| set.iter().any(|o| Arc::ptr_eq(o, m));

        let (staying, exiting): (Vec<_>, Vec<_>) =
            previous.iter().partition(|m| held(matches.as_slice(), *m));
        let entering: Vec<_> = matches
            .iter()
            .filter(|m| !held(previous.as_slice(), *m))
            .collect();
        // ids taken over by a new match with other params (wildcard tails)
        let replaced: HashSet<&str> = entering.iter().map(|m| m.match_id()).collect();

        let now = self.env.clock.now();

        for route_match in exiting {
            if let Some(lifecycle) = lifecycle_of(route_match) {
                lifecycle.on_exit(&route_match.hook_context());
            }
            route_match.reset_error();

            let options = route_match.route().options();
            let gc = options
                .loader_gc_max_age
                .unwrap_or(self.options.default_loader_gc_max_age)
                .max(
                    options
                        .loader_max_age
                        .unwrap_or(self.options.default_loader_max_age),
                );

            let mut cache = self.cache.lock();
            if gc.is_zero() || replaced.contains(route_match.match_id()) {
                cache.retire(route_match);
            } else {
                cache.insert(Arc::clone(route_match), deadline(now, gc));
            }
        }

        for route_match in staying {
            if let Some(lifecycle) = lifecycle_of(route_match) {
                lifecycle.on_transition(&route_match.hook_context());
            }
        }

        for route_match in entering {
            if let Some(lifecycle) = lifecycle_of(route_match) {
                lifecycle.on_loaded(&route_match.hook_context());
            }
            self.cache.lock().remove(route_match.match_id());
        }

        info_log!("navigated to '{}'", location.href);
        self.store.update(|state| {
            state.status = RouterStatus::Idle;
            state.current_location = location;
            state.current_matches = matches;
            state.pending_location = None;
            state.pending_matches.clear();
            state.last_updated = now;
        });

        if let Some(on_route_change) = &self.options.on_route_change {
            let state = self.store.state();
            on_route_change(&state);
        }
    }

    /// Validate, guard and load `matches`.
    ///
    /// Guards of all matches run concurrently; the first rejection fails the
    /// call. Loads start top-down and each one also waits for its parent.
    pub async fn load_matches(&self, matches: &[Arc<RouteMatch>], opts: &LoaderOptions) -> Result<()> {
        self.clean_match_cache();

        let latest = self.store.with(|state| state.latest_location.clone());
        let mut parent_search = latest.search.clone();
        for route_match in matches {
            route_match.validate(&parent_search);
            parent_search = route_match.search();
        }

        self.check_guards(matches, &latest, opts).await?;

        let active: HashSet<String> = if opts.preload {
            self.store
                .with(|state| state.current_match_ids().into_iter().collect())
        } else {
            HashSet::new()
        };

        if opts.preload {
            let gc = opts
                .gc_max_age
                .unwrap_or(self.options.default_loader_gc_max_age);
            let expires = deadline(self.env.clock.now(), gc);
            let mut cache = self.cache.lock();
            for route_match in matches.iter().filter(|m| !active.contains(m.match_id())) {
                cache.insert(Arc::clone(route_match), expires);
            }
        }

        let loads: Vec<_> = matches
            .iter()
            .enumerate()
            .filter(|(_, m)| !active.contains(m.match_id()))
            .filter(|(_, m)| !is_foreign_data_request(m) && !m.is_validation_error())
            .map(|(index, route_match)| {
                let load = route_match.load(opts);
                let previous = index.checked_sub(1).map(|i| Arc::clone(&matches[i]));
                async move {
                    load.await;
                    if let Some(previous) = previous {
                        previous.settled().await;
                    }
                }
            })
            .collect();

        join_all(loads).await;
        Ok(())
    }

    async fn check_guards(
        &self,
        matches: &[Arc<RouteMatch>],
        location: &Location,
        opts: &LoaderOptions,
    ) -> Result<()> {
        let context = self.context();
        let checks = matches.iter().map(|route_match| {
            let ctx = GuardContext {
                route_id: route_match.route_id().to_string(),
                match_id: route_match.match_id().to_string(),
                params: route_match.params().clone(),
                search: route_match.search(),
                location: location.clone(),
                preload: opts.preload,
                context: context.clone(),
            };
            async move {
                let guards = &route_match.route().options().guards;
                if guards.is_empty() {
                    GuardResult::Allow
                } else {
                    run_guards(guards, &ctx).await
                }
            }
        });
        let results = join_all(checks).await;

        let mut rejection = None;
        for (route_match, result) in matches.iter().zip(results) {
            if result.is_allow() {
                continue;
            }
            let err = RouterError::GuardRejected {
                route_id: route_match.route_id().to_string(),
                reason: result.reason(),
                redirect: result.redirect_path().map(str::to_string),
            };
            warn_log!("{}", err);
            route_match.cancel();
            if !opts.preload {
                if let Some(lifecycle) = lifecycle_of(route_match) {
                    lifecycle.on_load_error(&err);
                }
            }
            rejection.get_or_insert(err);
        }

        rejection.map_or(Ok(()), Err)
    }

    /// Match a target and load it without navigating.
    pub async fn load_route(&self, opts: &NavigateOptions) -> Result<Vec<Arc<RouteMatch>>> {
        let next = self.build_next(opts);
        let matches = self.match_routes(&next.pathname, true)?;
        self.load_matches(&matches, &LoaderOptions::default()).await?;
        Ok(matches)
    }

    /// Load a target speculatively and park its matches in the cache.
    ///
    /// Unset ages fall back to the router's preload defaults.
    pub async fn preload_route(
        &self,
        opts: &NavigateOptions,
        loader_opts: LoaderOptions,
    ) -> Result<Vec<Arc<RouteMatch>>> {
        let next = self.build_next(opts);
        let matches = self.match_routes(&next.pathname, true)?;
        let loader_opts = LoaderOptions {
            preload: true,
            max_age: Some(
                loader_opts
                    .max_age
                    .unwrap_or(self.options.default_preload_max_age),
            ),
            gc_max_age: Some(
                loader_opts
                    .gc_max_age
                    .or(self.options.default_preload_gc_max_age)
                    .unwrap_or(self.options.default_loader_gc_max_age),
            ),
        };
        debug_log!("preloading '{}'", next.href);
        self.load_matches(&matches, &loader_opts).await?;
        Ok(matches)
    }

    /// Mark current and pending matches of a target stale.
    pub fn invalidate_route(&self, opts: &NavigateOptions) -> Result<()> {
        let next = self.build_next(opts);
        let tree = self.route_tree();
        let ids: HashSet<String> = self
            .resolve_routes(&tree, &next.pathname, false)?
            .iter()
            .map(|resolved| interpolate_path(resolved.route.id(), &resolved.params, true))
            .collect();

        self.store.with(|state| {
            state
                .current_matches
                .iter()
                .chain(state.pending_matches.iter())
                .filter(|m| ids.contains(m.match_id()))
                .for_each(|m| m.invalidate());
        });
        Ok(())
    }

    // ========================================================================
    // Locations
    // ========================================================================

    fn current_history_location(&self) -> Location {
        parse_entry(&self.options.history.current(), self.options.search_codec.as_ref())
    }

    fn build_location(
        &self,
        dest: &NavigateOptions,
        pre_filters: &[SearchFilter],
        post_filters: &[SearchFilter],
    ) -> Location {
        let latest = self.store.with(|state| state.latest_location.clone());
        let tree = self.route_tree();

        let from = match &dest.from {
            Some(from) if !dest.from_current => from.clone(),
            _ => latest.pathname.clone(),
        };
        let pathname = resolve_path(&self.basepath, &from, dest.to.as_deref().unwrap_or("."));

        let previous_params = self
            .resolve_routes(&tree, &latest.pathname, true)
            .ok()
            .and_then(|resolved| resolved.last().map(|r| r.params.clone()))
            .unwrap_or_default();
        let mut params = match &dest.params {
            None => previous_params,
            Some(updater) => updater.resolve(&previous_params),
        };
        let targets = self
            .resolve_routes(&tree, &pathname, false)
            .unwrap_or_default();
        for target in &targets {
            if let Some(stringify) = &target.route.options().stringify_params {
                let stringified = stringify(&params);
                params.extend(&stringified);
            }
        }
        let pathname = interpolate_path(&pathname, &params, false);

        let pre_filtered = apply_filters(pre_filters, latest.search.clone());
        let search = match &dest.search {
            Some(Updater::Keep) => pre_filtered,
            Some(updater) => updater.resolve(&pre_filtered),
            None if !pre_filters.is_empty() => pre_filtered,
            None => SearchObject::new(),
        };
        let search = apply_filters(post_filters, search);
        let search_str = self.options.search_codec.stringify(&search);

        let hash = match &dest.hash {
            None => String::new(),
            Some(updater) => updater.resolve(&latest.hash),
        };
        let hash = hash.trim_start_matches('#').to_string();

        Location {
            href: build_href(&pathname, &search_str, &hash),
            pathname,
            search,
            search_str,
            hash,
            state: dest.state.clone().unwrap_or(latest.state),
            key: dest.key.clone(),
        }
    }

    /// Turn navigation options into a location, applying the search filters
    /// of the routes the target matches.
    pub fn build_next(&self, opts: &NavigateOptions) -> Location {
        let draft = self.build_location(opts, &[], &[]);
        let tree = self.route_tree();
        let targets = self
            .resolve_routes(&tree, &draft.pathname, false)
            .unwrap_or_default();

        let pre: Vec<SearchFilter> = targets
            .iter()
            .flat_map(|t| t.route.options().pre_search_filters.iter().cloned())
            .collect();
        let post: Vec<SearchFilter> = targets
            .iter()
            .flat_map(|t| t.route.options().post_search_filters.iter().cloned())
            .collect();

        self.build_location(opts, &pre, &post)
    }

    /// Describe a link: its href, whether it is active, and how it preloads.
    pub fn build_link(&self, opts: &LinkOptions) -> LinkInfo {
        if let Some(to) = opts.navigate.to.as_deref().filter(|to| is_external(to)) {
            return LinkInfo::External { href: to.to_string() };
        }

        let next = self.build_next(&opts.navigate);
        let current = self.store.with(|state| state.current_location.clone());

        let path_is_equal = current.pathname == next.pathname;
        let current_segments: Vec<&str> = current.pathname.split('/').collect();
        let path_is_fuzzy_equal = next
            .pathname
            .split('/')
            .enumerate()
            .all(|(i, segment)| current_segments.get(i) == Some(&segment));
        let hash_is_equal = current.hash == next.hash;

        let path_test = if opts.active.exact {
            path_is_equal
        } else {
            path_is_fuzzy_equal
        };
        let hash_test = !opts.active.include_hash || hash_is_equal;

        LinkInfo::Internal {
            next,
            is_active: path_test && hash_test,
            disabled: opts.disabled,
            preload: opts.preload.unwrap_or(self.options.default_preload),
            preload_delay: opts
                .preload_delay
                .unwrap_or(self.options.default_preload_delay),
            options: opts.navigate.clone(),
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Navigate to a new location.
    ///
    /// Guard redirects are followed with replace navigations.
    pub async fn navigate(&self, opts: NavigateOptions) -> Result<()> {
        let mut opts = opts;
        let mut redirects = 0;
        loop {
            let err = match self.navigate_once(&opts).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let Some(to) = err.redirect_path().map(str::to_string) else {
                return Err(err);
            };

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                error_log!("too many redirects, last target '{}'", to);
                return Err(RouterError::TooManyRedirects { path: to });
            }
            info_log!("redirecting to '{}'", to);
            opts = NavigateOptions::to(to).replace(true);
        }
    }

    async fn navigate_once(&self, opts: &NavigateOptions) -> Result<()> {
        if let Some(to) = opts.to.as_deref().filter(|to| is_external(to)) {
            return Err(RouterError::ExternalNavigation { href: to.to_string() });
        }

        let next = self.build_next(opts);
        let history = &self.options.history;
        let is_same_url = history.current().href == next.href;
        let entry = if opts.replace || (is_same_url && opts.key.is_none()) {
            history.replace(&next.href, next.state.clone())
        } else {
            history.push(&next.href, next.state.clone())
        };

        let location = parse_entry(&entry, self.options.search_codec.as_ref());
        self.load(Some(location)).await
    }

    /// Reload the current location, keeping its search and hash.
    pub async fn reload(&self) -> Result<()> {
        self.navigate(
            NavigateOptions::default()
                .from_current()
                .search(Updater::Keep)
                .hash(Updater::Keep)
                .replace(true),
        )
        .await
    }

    /// Perform a link click: re-targeting the current path without a search
    /// or hash update invalidates it first so its data is refetched.
    pub async fn follow_link(&self, opts: &LinkOptions) -> Result<()> {
        if opts.disabled {
            return Ok(());
        }

        let nav = &opts.navigate;
        let next = self.build_next(nav);
        let current = self.store.with(|state| state.current_location.pathname.clone());
        if current == next.pathname && nav.search.is_none() && nav.hash.is_none() {
            self.invalidate_route(nav)?;
        }
        self.navigate(nav.clone()).await
    }

    /// Preload a link's target if its preload flag (or the router default)
    /// is set.
    pub async fn preload_link(&self, opts: &LinkOptions) -> Result<()> {
        if !opts.preload.unwrap_or(self.options.default_preload) || opts.disabled {
            return Ok(());
        }
        let loader_opts = LoaderOptions {
            preload: true,
            max_age: opts.preload_max_age,
            gc_max_age: opts.preload_gc_max_age,
        };
        self.preload_route(&opts.navigate, loader_opts).await.map(|_| ())
    }

    /// Load the initial location if nothing is matched yet, then follow the
    /// location source's pop events until it goes away.
    pub async fn mount(&self) {
        let mut pops = self.options.history.subscribe();

        if self.store.with(|state| state.current_matches.is_empty()) {
            if let Err(err) = self.load(None).await {
                warn_log!("initial load failed: {}", err);
            }
        }

        while pops.changed().await.is_ok() {
            let location = self.current_history_location();
            debug_log!("location popped to '{}'", location.href);
            if let Err(err) = self.load(Some(location)).await {
                warn_log!("load after pop failed: {}", err);
            }
        }
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Export the committed state.
    pub fn dehydrate(&self) -> DehydratedRouter {
        DehydratedRouter {
            state: self.store.with(DehydratedRouterState::from_state),
            context: self.context(),
        }
    }

    /// Restore a snapshot produced by [`Router::dehydrate`].
    ///
    /// The latest location is matched locally; every match must line up
    /// with the snapshot's match ids.
    pub fn hydrate(&self, snapshot: DehydratedRouter) -> Result<()> {
        let DehydratedRouter { state, context } = snapshot;
        let matches = self.match_routes(&state.latest_location.pathname, true)?;

        let len = matches.len().max(state.current_matches.len());
        for index in 0..len {
            let expected = matches.get(index).map(|m| m.match_id());
            let found = state.current_matches.get(index).map(|d| d.match_id.as_str());
            if expected != found {
                let err = RouterError::HydrationMismatch {
                    index,
                    expected: expected.unwrap_or_default().to_string(),
                    found: found.unwrap_or_default().to_string(),
                };
                error_log!("{}", err);
                return Err(err);
            }
        }

        for (route_match, dehydrated) in matches.iter().zip(&state.current_matches) {
            route_match.restore(
                dehydrated.status,
                dehydrated.route_loader_data.clone(),
                dehydrated.invalid,
                dehydrated.invalid_at,
            );
        }

        let mut parent_search = state.latest_location.search.clone();
        for route_match in &matches {
            route_match.validate(&parent_search);
            parent_search = route_match.search();
        }

        *self.context.lock() = context;
        self.store.update(|s| {
            s.status = RouterStatus::Idle;
            s.latest_location = state.latest_location;
            s.current_location = state.current_location;
            s.last_updated = state.last_updated;
            s.current_matches = matches;
            s.pending_location = None;
            s.pending_matches.clear();
        });
        debug_log!("router hydrated");
        Ok(())
    }
}

/// A match marked as a data request for another match id is not loaded.
fn is_foreign_data_request(route_match: &RouteMatch) -> bool {
    route_match
        .search()
        .get("__data")
        .and_then(|data| data.get("matchId"))
        .and_then(Value::as_str)
        .is_some_and(|id| id != route_match.match_id())
}

fn parse_entry(entry: &HistoryEntry, codec: &dyn SearchCodec) -> Location {
    Location::parse(&entry.href, codec)
        .with_state(entry.state.clone())
        .with_key(entry.key.clone())
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("basepath", &self.basepath)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("state", &self.store.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LoaderError;
    use crate::loader::LoaderContext;
    use crate::search::search_filter;
    use serde_json::json;

    fn config() -> RouteConfig {
        RouteConfig::root()
            .child(RouteConfig::new("/"))
            .child(
                RouteConfig::new("posts")
                    .loader(|_| async { Ok::<_, LoaderError>(json!({ "count": 2 })) })
                    .child(RouteConfig::new("/"))
                    .child(RouteConfig::new(":id").loader(|ctx: LoaderContext| async move {
                        Ok::<_, LoaderError>(json!({ "id": ctx.params.get("id") }))
                    })),
            )
            .child(RouteConfig::layout("_auth").child(RouteConfig::new("dashboard")))
            .child(RouteConfig::new("files/*"))
    }

    fn router() -> Router {
        Router::new(config(), RouterOptions::default().clock(Arc::new(ManualClock::new(0)))).unwrap()
    }

    fn ids(matches: &[Arc<RouteMatch>]) -> Vec<&str> {
        matches.iter().map(|m| m.match_id()).collect()
    }

    #[test]
    fn test_normalize_basepath() {
        assert_eq!(normalize_basepath(""), "/");
        assert_eq!(normalize_basepath("/"), "/");
        assert_eq!(normalize_basepath("app/"), "/app");
        assert_eq!(normalize_basepath("/app"), "/app");
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("https://example.com"));
        assert!(is_external("mailto:someone@example.com"));
        assert!(!is_external("/posts"));
        assert!(!is_external("../posts"));
    }

    #[test]
    fn test_match_routes() {
        let router = router();

        let matches = router.match_routes("/posts/5", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__", "posts", "posts/5"]);
        assert_eq!(matches[2].pathname(), "/posts/5");
        assert_eq!(matches[2].params().get("id"), Some(&"5".to_string()));
        assert!(Arc::ptr_eq(&matches[2].parent().unwrap(), &matches[1]));

        let matches = router.match_routes("/posts/", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__", "posts", "posts/"]);

        let matches = router.match_routes("/", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__", "/"]);

        let matches = router.match_routes("/dashboard", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__", "_auth", "_auth/dashboard"]);

        let matches = router.match_routes("/files/a/b.txt", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__", "files/*"]);
        assert_eq!(matches[1].params().get("*"), Some(&"a/b.txt".to_string()));
        assert_eq!(matches[1].pathname(), "/files/a/b.txt");

        let matches = router.match_routes("/nowhere", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__"]);
    }

    #[test]
    fn test_live_matches_are_shared() {
        let router = router();
        let first = router.match_routes("/posts/5", true).unwrap();
        let second = router.match_routes("/posts/5", true).unwrap();
        assert!(Arc::ptr_eq(&first[2], &second[2]));

        let other = router.match_routes("/posts/6", true).unwrap();
        assert!(!Arc::ptr_eq(&first[2], &other[2]));
        assert!(Arc::ptr_eq(&first[1], &other[1]));
    }

    #[test]
    fn test_strict_param_parsing() {
        let router = Router::new(
            RouteConfig::root().child(RouteConfig::new("posts/:id").parse_params(|params| {
                match params.get_as::<u32>("id") {
                    Some(_) => Ok(params.clone()),
                    None => Err("id must be a number".to_string()),
                }
            })),
            RouterOptions::default(),
        )
        .unwrap();

        let err = router.match_routes("/posts/abc", true).unwrap_err();
        assert!(matches!(err, RouterError::InvalidParams { .. }));

        let lenient = router.match_routes("/posts/abc", false).unwrap();
        assert_eq!(lenient[1].params().get("id"), Some(&"abc".to_string()));
    }

    #[test]
    fn test_filter_routes() {
        let router = Router::new(
            config(),
            RouterOptions::default().filter_routes(|routes| {
                routes
                    .iter()
                    .filter(|r| r.id() != "posts")
                    .cloned()
                    .collect()
            }),
        )
        .unwrap();
        let matches = router.match_routes("/posts/5", true).unwrap();
        assert_eq!(ids(&matches), vec!["__root__"]);
    }

    #[test]
    fn test_build_next() {
        let router = router();
        pollster::block_on(router.navigate(NavigateOptions::to("/posts/5"))).unwrap();

        let next = router.build_next(&NavigateOptions::to("../6"));
        assert_eq!(next.pathname, "/posts/6");

        // params default to the latest location's
        let next = router.build_next(&NavigateOptions::to("/posts/:id/edit"));
        assert_eq!(next.pathname, "/posts/5/edit");

        let next = router.build_next(
            &NavigateOptions::to("/posts/:id")
                .param("id", "9")
                .search(Updater::Set(
                    serde_json::from_value(json!({ "page": 2 })).unwrap(),
                ))
                .hash(Updater::Set("#top".to_string())),
        );
        assert_eq!(next.pathname, "/posts/9");
        assert_eq!(next.search_str, "?page=2");
        assert_eq!(next.hash, "top");
        assert_eq!(next.href, "/posts/9?page=2#top");
    }

    #[test]
    fn test_search_filters() {
        let router = Router::new(
            RouteConfig::root().child(
                RouteConfig::new("list")
                    .pre_search_filter(search_filter(|search| {
                        let mut kept = SearchObject::new();
                        if let Some(sort) = search.get("sort") {
                            kept.insert("sort".into(), sort.clone());
                        }
                        kept
                    }))
                    .post_search_filter(search_filter(|search| {
                        let mut out = search.clone();
                        out.entry("page").or_insert(json!(1));
                        out
                    })),
            ),
            RouterOptions::default().history(Arc::new(MemoryHistory::new("/list?sort=asc&q=x"))),
        )
        .unwrap();

        let next = router.build_next(&NavigateOptions::to("/list"));
        assert_eq!(next.search, serde_json::from_value::<SearchObject>(json!({ "sort": "asc", "page": 1 })).unwrap());
    }

    #[test]
    fn test_resolve_path_with_basepath() {
        let router = Router::new(config(), RouterOptions::default().basepath("app/")).unwrap();
        assert_eq!(router.basepath(), "/app");
        assert_eq!(router.resolve_path("/app/posts", "./5"), "/app/posts/5");
        assert_eq!(router.resolve_path("/app/posts", "//users"), "/app/users");
    }

    #[test]
    fn test_get_route_and_loader() {
        let router = router();
        assert_eq!(router.get_route("posts/:id").unwrap().full_path(), "/posts/:id");
        assert!(matches!(
            router.get_route("missing"),
            Err(RouterError::RouteNotFound { .. })
        ));

        let loader = router.get_loader("posts").unwrap();
        let data = pollster::block_on(
            loader.fetch(LoaderContext::new(RouteParams::new(), SearchObject::new())),
        )
        .unwrap();
        assert_eq!(data, json!({ "count": 2 }));
        assert!(loader.state().current.is_some());
    }

    #[test]
    fn test_update_routes_bumps_generation() {
        let router = router();
        let before = router.match_routes("/posts", true).unwrap();
        assert_eq!(before[1].generation(), 1);

        router.update_routes(config()).unwrap();
        let after = router.match_routes("/posts", true).unwrap();
        assert_eq!(after[1].generation(), 2);
        assert!(!Arc::ptr_eq(&before[1], &after[1]));

        let err = router
            .update_routes(RouteConfig::root().child(RouteConfig::new("a")).child(RouteConfig::new("a")))
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRouteId { .. }));
        assert_eq!(router.route_tree().generation(), 2);
    }

    #[test]
    fn test_match_route() {
        let router = router();
        pollster::block_on(router.navigate(NavigateOptions::to("/posts/5"))).unwrap();

        // the pattern is interpolated with the latest params first
        assert!(router
            .match_route(&NavigateOptions::to("/posts/:id"), MatchRouteOptions::default())
            .is_some());
        assert!(router
            .match_route(&NavigateOptions::to("/posts/6"), MatchRouteOptions::default())
            .is_none());

        assert!(router
            .match_route(&NavigateOptions::to("/posts"), MatchRouteOptions::default())
            .is_none());
        assert!(router
            .match_route(
                &NavigateOptions::to("/posts"),
                MatchRouteOptions {
                    fuzzy: true,
                    ..MatchRouteOptions::default()
                }
            )
            .is_some());
        assert!(router
            .match_route(
                &NavigateOptions::to("/posts/:id"),
                MatchRouteOptions {
                    pending: true,
                    ..MatchRouteOptions::default()
                }
            )
            .is_none());
    }
}
