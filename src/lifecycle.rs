//! Route lifecycle hooks
//!
//! Hooks fire while a navigation commits:
//! - `on_loaded`: the match entered the active set
//! - `on_transition`: the match stayed active across the navigation
//! - `on_exit`: the match left the active set
//! - `on_load_error`: a guard rejected the match (never during preload)
//!
//! Hooks are synchronous; they observe the commit and cannot veto it.

use crate::error::RouterError;
use crate::params::RouteParams;
use crate::search::SearchObject;
use std::sync::Arc;

/// Data passed to lifecycle hooks
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    pub match_id: String,
    pub params: RouteParams,
    pub search: SearchObject,
}

/// Route lifecycle hooks
///
/// All methods default to no-ops.
///
/// # Example
///
/// ```
/// use navigator_core::{HookContext, RouteLifecycle};
///
/// struct Analytics;
///
/// impl RouteLifecycle for Analytics {
///     fn on_loaded(&self, ctx: &HookContext) {
///         println!("entered {}", ctx.match_id);
///     }
/// }
/// ```
pub trait RouteLifecycle: Send + Sync + 'static {
    fn on_loaded(&self, _ctx: &HookContext) {}

    fn on_transition(&self, _ctx: &HookContext) {}

    fn on_exit(&self, _ctx: &HookContext) {}

    fn on_load_error(&self, _error: &RouterError) {}
}

/// Type-erased lifecycle for dynamic dispatch
pub type BoxedLifecycle = Arc<dyn RouteLifecycle>;

type HookFn = Box<dyn Fn(&HookContext) + Send + Sync>;
type ErrorHookFn = Box<dyn Fn(&RouterError) + Send + Sync>;

/// Closure-based [`RouteLifecycle`]
///
/// ```
/// use navigator_core::{LifecycleHooks, RouteConfig};
///
/// let route = RouteConfig::new("posts").lifecycle(
///     LifecycleHooks::new()
///         .on_loaded(|ctx| println!("hello {}", ctx.match_id))
///         .on_exit(|ctx| println!("bye {}", ctx.match_id)),
/// );
/// ```
#[derive(Default)]
pub struct LifecycleHooks {
    on_loaded: Option<HookFn>,
    on_transition: Option<HookFn>,
    on_exit: Option<HookFn>,
    on_load_error: Option<ErrorHookFn>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_loaded(mut self, f: impl Fn(&HookContext) + Send + Sync + 'static) -> Self {
        self.on_loaded = Some(Box::new(f));
        self
    }

    pub fn on_transition(mut self, f: impl Fn(&HookContext) + Send + Sync + 'static) -> Self {
        self.on_transition = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl Fn(&HookContext) + Send + Sync + 'static) -> Self {
        self.on_exit = Some(Box::new(f));
        self
    }

    pub fn on_load_error(mut self, f: impl Fn(&RouterError) + Send + Sync + 'static) -> Self {
        self.on_load_error = Some(Box::new(f));
        self
    }
}

impl RouteLifecycle for LifecycleHooks {
    fn on_loaded(&self, ctx: &HookContext) {
        if let Some(f) = &self.on_loaded {
            f(ctx);
        }
    }

    fn on_transition(&self, ctx: &HookContext) {
        if let Some(f) = &self.on_transition {
            f(ctx);
        }
    }

    fn on_exit(&self, ctx: &HookContext) {
        if let Some(f) = &self.on_exit {
            f(ctx);
        }
    }

    fn on_load_error(&self, error: &RouterError) {
        if let Some(f) = &self.on_load_error {
            f(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn ctx(id: &str) -> HookContext {
        HookContext {
            match_id: id.to_string(),
            params: RouteParams::new(),
            search: SearchObject::new(),
        }
    }

    struct Silent;
    impl RouteLifecycle for Silent {}

    #[test]
    fn test_default_hooks_are_noops() {
        let lifecycle: BoxedLifecycle = Arc::new(Silent);
        lifecycle.on_loaded(&ctx("a"));
        lifecycle.on_exit(&ctx("a"));
        lifecycle.on_load_error(&RouterError::RouteNotFound { id: "a".into() });
    }

    #[test]
    fn test_closure_hooks_record_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (e1, e2, e3, e4) = (
            Arc::clone(&events),
            Arc::clone(&events),
            Arc::clone(&events),
            Arc::clone(&events),
        );

        let hooks = LifecycleHooks::new()
            .on_loaded(move |c| e1.lock().push(format!("loaded:{}", c.match_id)))
            .on_transition(move |c| e2.lock().push(format!("transition:{}", c.match_id)))
            .on_exit(move |c| e3.lock().push(format!("exit:{}", c.match_id)))
            .on_load_error(move |e| e4.lock().push(format!("error:{e}")));

        RouteLifecycle::on_loaded(&hooks, &ctx("posts"));
        RouteLifecycle::on_transition(&hooks, &ctx("posts"));
        RouteLifecycle::on_exit(&hooks, &ctx("posts"));
        RouteLifecycle::on_load_error(&hooks, &RouterError::RouteNotFound { id: "x".into() });

        assert_eq!(
            *events.lock(),
            vec![
                "loaded:posts",
                "transition:posts",
                "exit:posts",
                "error:route not found: x",
            ]
        );
    }
}
