//! # navigator-core
//!
//! A UI-independent navigation engine for client applications:
//!
//! - **Route Trees** - Nested routes with params, wildcards, index and pathless layout routes
//! - **Route Matching** - Segment-by-segment matching with basepath, fuzzy and case options
//! - **Data Loading** - Per-match async loaders with deduplication, freshness windows and cancellation
//! - **Guards** - `before_load` checks that allow, deny or redirect a navigation
//! - **Match Cache** - Exited and preloaded matches are kept until a gc deadline
//! - **Observable State** - Subscribe to whole [`RouterState`] snapshots
//! - **Hydration** - Export the committed state and restore it elsewhere
//!
//! # Quick Start
//!
//! ```
//! use navigator_core::{LoaderError, NavigateOptions, RouteConfig, Router, RouterOptions};
//! use serde_json::json;
//!
//! let routes = RouteConfig::root()
//!     .child(RouteConfig::new("/"))
//!     .child(
//!         RouteConfig::new("posts")
//!             .loader(|_| async { Ok::<_, LoaderError>(json!({ "total": 2 })) })
//!             .child(RouteConfig::new(":id").loader(|ctx| async move {
//!                 Ok::<_, LoaderError>(json!({ "id": ctx.params.get("id") }))
//!             })),
//!     );
//!
//! let router = Router::new(routes, RouterOptions::default()).unwrap();
//! pollster::block_on(router.navigate(NavigateOptions::to("/posts/42"))).unwrap();
//!
//! let state = router.state();
//! let post = state.current_match("posts/:id").unwrap();
//! assert_eq!(post.loader_data()["id"], json!("42"));
//! // parent data is visible from the child
//! assert_eq!(post.loader_data()["total"], json!(2));
//! ```
//!
//! # Route Guards
//!
//! ```
//! use navigator_core::{AuthGuard, NavigateOptions, RouteConfig, Router, RouterOptions};
//!
//! let routes = RouteConfig::root()
//!     .child(RouteConfig::new("login"))
//!     .child(
//!         RouteConfig::new("admin")
//!             .before_load(AuthGuard::new(|ctx| ctx.context["user"].is_string(), "/login")),
//!     );
//!
//! let router = Router::new(routes, RouterOptions::default()).unwrap();
//! pollster::block_on(router.navigate(NavigateOptions::to("/admin"))).unwrap();
//! assert_eq!(router.state().current_location.pathname, "/login");
//! ```
//!
//! # Feature Flags
//!
//! - `log` (default) - Uses the standard `log` crate for logging
//! - `tracing` - Uses the `tracing` crate for structured logging (mutually exclusive with `log`)

#![doc(html_root_url = "https://docs.rs/navigator-core/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
// Lints are configured in Cargo.toml [lints] section

// Logging abstraction
pub(crate) mod logging;

// Path handling
pub mod matcher;
pub mod params;
pub mod search;

// Locations and history
pub mod history;
pub mod location;

// Route definitions
pub mod guards;
pub mod lifecycle;
pub mod loader;
pub mod route;
pub mod tree;

// Runtime
pub mod cache;
pub mod clock;
pub mod hydration;
pub mod route_match;
pub mod router;
pub mod state;

// Error handling
pub mod error;

// Re-export main types for convenient access
pub use cache::{CacheEntry, CacheStats, MatchCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LoaderError, Result, RouterError};
pub use guards::{
    boxed, guard_fn, AuthGuard, BoxedGuard, FnGuard, GuardContext, GuardResult, RouteGuard,
};
pub use history::{HistoryEntry, LocationSource, MemoryHistory};
pub use hydration::{DehydratedMatch, DehydratedRouter, DehydratedRouterState};
pub use lifecycle::{BoxedLifecycle, HookContext, LifecycleHooks, RouteLifecycle};
pub use loader::{
    LoaderContext, LoaderFn, LoaderInvocation, LoaderOptions, LoaderRegistry, LoaderState,
    RouteLoader,
};
pub use location::{
    ActiveOptions, LinkInfo, LinkOptions, Location, MatchRouteOptions, NavigateOptions, Updater,
};
pub use params::RouteParams;
pub use route::{validate_route_path, RouteConfig, RouteNode, RouteOptions, RouteRef, ROOT_ROUTE_ID};
pub use route_match::{MatchState, MatchStatus, RouteMatch};
pub use router::{FilterRoutesFn, RouteChangeFn, Router, RouterOptions, MAX_REDIRECTS};
pub use search::{search_filter, QuerySearchCodec, SearchCodec, SearchFilter, SearchObject};
pub use state::{RouterState, RouterStatus, RouterStore};
pub use tree::RouteTree;
