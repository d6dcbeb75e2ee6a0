//! Route guards (`before_load`)
//!
//! Guards run before a match loads. A guard can allow the load, deny it, or
//! deny it with a redirect target. Any non-allow result fails the whole
//! navigation, since child routes may rely on what the guard checked.

use crate::location::Location;
use crate::params::RouteParams;
use crate::search::SearchObject;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;

/// Result of a guard check
#[derive(Debug, Clone, PartialEq)]
pub enum GuardResult {
    /// Allow navigation to proceed
    Allow,

    /// Deny navigation with a reason
    Deny {
        /// Reason for denying navigation
        reason: String,
    },

    /// Redirect to a different path
    Redirect {
        /// Path to redirect to
        to: String,
        /// Reason for redirect (optional)
        reason: Option<String>,
    },
}

impl GuardResult {
    /// Create an allow result
    pub fn allow() -> Self {
        GuardResult::Allow
    }

    /// Create a deny result with reason
    pub fn deny(reason: impl Into<String>) -> Self {
        GuardResult::Deny {
            reason: reason.into(),
        }
    }

    /// Create a redirect result
    pub fn redirect(to: impl Into<String>) -> Self {
        GuardResult::Redirect {
            to: to.into(),
            reason: None,
        }
    }

    /// Create a redirect result with reason
    pub fn redirect_with_reason(to: impl Into<String>, reason: impl Into<String>) -> Self {
        GuardResult::Redirect {
            to: to.into(),
            reason: Some(reason.into()),
        }
    }

    /// Check if result is allow
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardResult::Allow)
    }

    /// Get redirect path if this is a redirect
    pub fn redirect_path(&self) -> Option<&str> {
        match self {
            GuardResult::Redirect { to, .. } => Some(to.as_str()),
            _ => None,
        }
    }

    pub(crate) fn reason(&self) -> String {
        match self {
            GuardResult::Allow => String::new(),
            GuardResult::Deny { reason } => reason.clone(),
            GuardResult::Redirect { to, reason } => reason
                .clone()
                .unwrap_or_else(|| format!("redirect to {to}")),
        }
    }
}

/// What a guard gets to look at
#[derive(Debug, Clone)]
pub struct GuardContext {
    pub route_id: String,
    pub match_id: String,
    /// Params merged from the root down to this match
    pub params: RouteParams,
    /// Validated search of this match
    pub search: SearchObject,
    /// Location being loaded
    pub location: Location,
    /// Whether this is a speculative preload
    pub preload: bool,
    /// Router-wide context value
    pub context: Value,
}

impl GuardContext {
    /// Get parameter from target route
    pub fn param(&self, key: &str) -> Option<&String> {
        self.params.get(key)
    }

    /// Get a search value of the target route
    pub fn search_value(&self, key: &str) -> Option<&Value> {
        self.search.get(key)
    }
}

/// Trait for route guards
///
/// Guards use an associated `Future` type so concrete guards avoid boxing;
/// routes store them type-erased as [`BoxedGuard`].
///
/// # Example
///
/// ```
/// use navigator_core::{GuardContext, GuardResult, RouteGuard};
/// use std::future::{ready, Ready};
///
/// struct OnlyEvenIds;
///
/// impl RouteGuard for OnlyEvenIds {
///     type Future = Ready<GuardResult>;
///
///     fn check(&self, ctx: &GuardContext) -> Self::Future {
///         let even = ctx.params.get_as::<u64>("id").is_some_and(|id| id % 2 == 0);
///         ready(if even {
///             GuardResult::allow()
///         } else {
///             GuardResult::deny("odd id")
///         })
///     }
/// }
/// ```
pub trait RouteGuard: Send + Sync + 'static {
    /// The future returned by check
    type Future: Future<Output = GuardResult> + Send + 'static;

    /// Check if the match may load
    fn check(&self, ctx: &GuardContext) -> Self::Future;

    /// Get guard name (for debugging and error messages)
    fn name(&self) -> &str {
        "RouteGuard"
    }

    /// Optional priority for guard execution order
    ///
    /// Higher priority guards run first. Default is 0.
    fn priority(&self) -> i32 {
        0
    }
}

/// Boxed route guard for dynamic dispatch
pub type BoxedGuard = Box<dyn RouteGuard<Future = BoxFuture<'static, GuardResult>>>;

/// Type-erase any guard.
pub fn boxed<G: RouteGuard>(guard: G) -> BoxedGuard {
    Box::new(Boxed(guard))
}

struct Boxed<G>(G);

impl<G: RouteGuard> RouteGuard for Boxed<G> {
    type Future = BoxFuture<'static, GuardResult>;

    fn check(&self, ctx: &GuardContext) -> Self::Future {
        self.0.check(ctx).boxed()
    }

    fn name(&self) -> &str {
        self.0.name()
    }

    fn priority(&self) -> i32 {
        self.0.priority()
    }
}

/// Create a guard from an async function or closure
///
/// # Example
///
/// ```
/// use navigator_core::{guard_fn, GuardResult};
///
/// let guard = guard_fn(|ctx| {
///     let signed_in = ctx.context["user"].is_string();
///     async move {
///         if signed_in {
///             GuardResult::allow()
///         } else {
///             GuardResult::redirect("/login")
///         }
///     }
/// });
/// ```
pub fn guard_fn<F, Fut>(f: F) -> FnGuard<F>
where
    F: Fn(&GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GuardResult> + Send + 'static,
{
    FnGuard { f }
}

/// Guard created from a function or closure
pub struct FnGuard<F> {
    f: F,
}

impl<F, Fut> RouteGuard for FnGuard<F>
where
    F: Fn(&GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GuardResult> + Send + 'static,
{
    type Future = Fut;

    fn check(&self, ctx: &GuardContext) -> Self::Future {
        (self.f)(ctx)
    }
}

/// Run a route's guards one after another, highest priority first.
///
/// Stops at the first non-allow result.
pub(crate) async fn run_guards(guards: &[BoxedGuard], ctx: &GuardContext) -> GuardResult {
    let mut sorted: Vec<_> = guards.iter().collect();
    sorted.sort_by_key(|g| -g.priority());

    for guard in sorted {
        match guard.check(ctx).await {
            GuardResult::Allow => continue,
            other => {
                crate::logging::trace_log!("guard '{}' stopped {}", guard.name(), ctx.match_id);
                return other;
            }
        }
    }
    GuardResult::Allow
}

// ============================================================================
// Authentication Guard
// ============================================================================

/// Authentication check function
pub type AuthCheckFn = Box<dyn Fn(&GuardContext) -> bool + Send + Sync>;

/// Redirects to a login path unless the check passes.
///
/// # Example
///
/// ```
/// use navigator_core::{AuthGuard, RouteConfig};
///
/// let route = RouteConfig::new("dashboard")
///     .before_load(AuthGuard::new(|ctx| ctx.context["user"].is_string(), "/login"));
/// ```
pub struct AuthGuard {
    check_fn: AuthCheckFn,
    redirect_path: String,
}

impl AuthGuard {
    pub fn new<F>(check_fn: F, redirect_path: impl Into<String>) -> Self
    where
        F: Fn(&GuardContext) -> bool + Send + Sync + 'static,
    {
        Self {
            check_fn: Box::new(check_fn),
            redirect_path: redirect_path.into(),
        }
    }
}

impl RouteGuard for AuthGuard {
    type Future = std::future::Ready<GuardResult>;

    fn check(&self, ctx: &GuardContext) -> Self::Future {
        std::future::ready(if (self.check_fn)(ctx) {
            GuardResult::Allow
        } else {
            GuardResult::redirect_with_reason(&self.redirect_path, "Authentication required")
        })
    }

    fn name(&self) -> &str {
        "AuthGuard"
    }

    fn priority(&self) -> i32 {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx() -> GuardContext {
        GuardContext {
            route_id: "users/:id".to_string(),
            match_id: "users/123".to_string(),
            params: [("id", "123")].into_iter().collect(),
            search: serde_json::from_value(json!({ "page": 1 })).unwrap(),
            location: Location::default(),
            preload: false,
            context: json!({ "user": "ada" }),
        }
    }

    #[test]
    fn test_guard_result_helpers() {
        assert!(GuardResult::allow().is_allow());
        assert!(!GuardResult::deny("Not authorized").is_allow());

        let result = GuardResult::redirect_with_reason("/login", "Authentication required");
        assert_eq!(result.redirect_path(), Some("/login"));
        assert_eq!(result.reason(), "Authentication required");
        assert_eq!(GuardResult::redirect("/x").reason(), "redirect to /x");
    }

    #[test]
    fn test_guard_context_accessors() {
        let ctx = ctx();
        assert_eq!(ctx.param("id"), Some(&"123".to_string()));
        assert_eq!(ctx.search_value("page"), Some(&json!(1)));
        assert_eq!(ctx.param("missing"), None);
    }

    #[test]
    fn test_guard_fn_and_boxing() {
        let guard = boxed(guard_fn(|ctx| {
            let id = ctx.params.get_as::<u32>("id");
            async move {
                match id {
                    Some(_) => GuardResult::allow(),
                    None => GuardResult::deny("no id"),
                }
            }
        }));
        assert_eq!(guard.name(), "RouteGuard");
        assert_eq!(guard.priority(), 0);
        assert!(pollster::block_on(guard.check(&ctx())).is_allow());
    }

    #[test]
    fn test_auth_guard() {
        let guard = AuthGuard::new(|ctx| ctx.context["user"].is_string(), "/login");
        assert_eq!(guard.name(), "AuthGuard");
        assert_eq!(guard.priority(), 100);
        assert!(pollster::block_on(guard.check(&ctx())).is_allow());

        let mut anonymous = ctx();
        anonymous.context = Value::Null;
        let result = pollster::block_on(guard.check(&anonymous));
        assert_eq!(result.redirect_path(), Some("/login"));
    }

    #[test]
    fn test_run_guards_priority_and_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let guards = vec![
            boxed(guard_fn(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                async { GuardResult::allow() }
            })),
            // priority 100 runs first and stops the chain
            boxed(AuthGuard::new(|_| false, "/login")),
        ];

        let result = pollster::block_on(run_guards(&guards, &ctx()));
        assert_eq!(result.redirect_path(), Some("/login"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = pollster::block_on(run_guards(&guards[..1], &ctx()));
        assert!(result.is_allow());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
