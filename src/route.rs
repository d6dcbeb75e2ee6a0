//! Route definition and configuration
//!
//! Routes are declared with the [`RouteConfig`] builder and turned into an
//! immutable tree of [`RouteNode`]s by [`RouteTree::build`](crate::RouteTree::build).

use crate::error::{LoaderError, RouterError};
use crate::guards::{boxed, BoxedGuard, RouteGuard};
use crate::lifecycle::{BoxedLifecycle, RouteLifecycle};
use crate::loader::{LoaderContext, LoaderFn};
use crate::params::RouteParams;
use crate::search::{SearchFilter, SearchObject};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Id of the root route
pub const ROOT_ROUTE_ID: &str = "__root__";

/// Turns raw string params into parsed ones; an `Err` is a parse failure.
pub type ParseParamsFn = Arc<dyn Fn(&RouteParams) -> Result<RouteParams, String> + Send + Sync>;

/// Inverse of [`ParseParamsFn`], used when building locations.
pub type StringifyParamsFn = Arc<dyn Fn(&RouteParams) -> RouteParams + Send + Sync>;

/// Validates (and may normalize) the search of a match.
pub type ValidateSearchFn = Arc<dyn Fn(&SearchObject) -> Result<SearchObject, String> + Send + Sync>;

// ============================================================================
// Route Validation
// ============================================================================

/// Validate a route path pattern
///
/// # Validation Rules
///
/// - Path can be empty (for layout routes)
/// - No consecutive slashes ('//')
/// - Trailing slashes are allowed (normalized during matching)
/// - Parameter names must be alphanumeric and not empty
/// - No duplicate parameter names
/// - A wildcard may only be the last segment
pub fn validate_route_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Ok(());
    }

    if path.contains("//") {
        return Err("Route path cannot contain consecutive slashes".to_string());
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut param_names = std::collections::HashSet::new();
    for (i, segment) in segments.iter().enumerate() {
        if segment.starts_with('*') && i + 1 != segments.len() {
            return Err("Wildcard must be the last segment".to_string());
        }

        if let Some(param_name) = segment.strip_prefix(':') {
            if param_name.is_empty() {
                return Err("Route parameter name cannot be empty".to_string());
            }

            if !param_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(format!(
                    "Route parameter '{}' must contain only alphanumeric characters and underscores",
                    param_name
                ));
            }

            if !param_names.insert(param_name.to_string()) {
                return Err(format!("Duplicate route parameter: '{}'", param_name));
            }
        }
    }

    Ok(())
}

// ============================================================================
// RouteOptions
// ============================================================================

/// Per-route behavior
#[derive(Default)]
pub struct RouteOptions {
    pub loader: Option<LoaderFn>,
    /// `before_load` guards, run highest priority first
    pub guards: Vec<BoxedGuard>,
    pub lifecycle: Option<BoxedLifecycle>,
    pub parse_params: Option<ParseParamsFn>,
    pub stringify_params: Option<StringifyParamsFn>,
    pub validate_search: Option<ValidateSearchFn>,
    pub pre_search_filters: Vec<SearchFilter>,
    pub post_search_filters: Vec<SearchFilter>,
    /// Freshness window of loaded data; router default when `None`
    pub loader_max_age: Option<Duration>,
    /// Cache retention after the match exits; router default when `None`
    pub loader_gc_max_age: Option<Duration>,
    pub case_sensitive: Option<bool>,
    pub meta: HashMap<String, Value>,
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("loader", &self.loader.is_some())
            .field("guards", &self.guards.len())
            .field("lifecycle", &self.lifecycle.is_some())
            .field("parse_params", &self.parse_params.is_some())
            .field("validate_search", &self.validate_search.is_some())
            .field("loader_max_age", &self.loader_max_age)
            .field("loader_gc_max_age", &self.loader_gc_max_age)
            .field("case_sensitive", &self.case_sensitive)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RouteConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RouteKind {
    Root,
    /// Path relative to the parent (`"/"` for an index route)
    Path(String),
    /// Pathless layout with an explicit id
    Layout(String),
}

/// Declarative route configuration
///
/// # Example
///
/// ```
/// use navigator_core::{LoaderError, RouteConfig};
/// use serde_json::json;
///
/// let config = RouteConfig::root().child(
///     RouteConfig::new("posts")
///         .loader(|_ctx| async { Ok::<_, LoaderError>(json!(["a", "b"])) })
///         .child(RouteConfig::new("/"))
///         .child(RouteConfig::new(":id")),
/// );
/// ```
#[derive(Debug)]
pub struct RouteConfig {
    pub(crate) kind: RouteKind,
    pub(crate) options: RouteOptions,
    pub(crate) children: Vec<RouteConfig>,
}

impl RouteConfig {
    /// The root route; every tree starts here.
    pub fn root() -> Self {
        Self::with_kind(RouteKind::Root)
    }

    /// Route matching `path` relative to its parent (`"/"` for an index).
    ///
    /// The path is validated when the tree is built.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_kind(RouteKind::Path(path.into()))
    }

    /// Create a new route with validation, returning Result
    pub fn try_new(path: impl Into<String>) -> Result<Self, RouterError> {
        let path = path.into();
        validate_route_path(&path).map_err(|message| RouterError::InvalidRoutePath {
            path: path.clone(),
            message,
        })?;
        Ok(Self::new(path))
    }

    /// Pathless layout route identified by `id`; it matches whatever its
    /// parent matches and groups children under shared behavior.
    pub fn layout(id: impl Into<String>) -> Self {
        Self::with_kind(RouteKind::Layout(id.into()))
    }

    fn with_kind(kind: RouteKind) -> Self {
        Self {
            kind,
            options: RouteOptions::default(),
            children: Vec::new(),
        }
    }

    /// Async data loader. The output is stored as the match's loader data.
    pub fn loader<F, Fut, T>(mut self, f: F) -> Self
    where
        F: Fn(LoaderContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LoaderError>> + Send + 'static,
        T: Serialize,
    {
        self.options.loader = Some(Arc::new(move |ctx| {
            f(ctx)
                .map(|result| {
                    result.and_then(|data| serde_json::to_value(data).map_err(LoaderError::from))
                })
                .boxed()
        }));
        self
    }

    /// Add a `before_load` guard
    pub fn before_load<G: RouteGuard>(mut self, guard: G) -> Self {
        self.options.guards.push(boxed(guard));
        self
    }

    /// Add lifecycle hooks to this route
    pub fn lifecycle<L: RouteLifecycle>(mut self, lifecycle: L) -> Self {
        self.options.lifecycle = Some(Arc::new(lifecycle));
        self
    }

    pub fn parse_params<F>(mut self, f: F) -> Self
    where
        F: Fn(&RouteParams) -> Result<RouteParams, String> + Send + Sync + 'static,
    {
        self.options.parse_params = Some(Arc::new(f));
        self
    }

    pub fn stringify_params<F>(mut self, f: F) -> Self
    where
        F: Fn(&RouteParams) -> RouteParams + Send + Sync + 'static,
    {
        self.options.stringify_params = Some(Arc::new(f));
        self
    }

    pub fn validate_search<F>(mut self, f: F) -> Self
    where
        F: Fn(&SearchObject) -> Result<SearchObject, String> + Send + Sync + 'static,
    {
        self.options.validate_search = Some(Arc::new(f));
        self
    }

    /// Validate the search against a serde type: the search is deserialized
    /// into `T` and the re-serialized value becomes the route's search.
    pub fn search_schema<T>(self) -> Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        self.validate_search(|search| {
            let typed: T = serde_json::from_value(Value::Object(search.clone()))
                .map_err(|e| e.to_string())?;
            match serde_json::to_value(typed).map_err(|e| e.to_string())? {
                Value::Object(map) => Ok(map),
                _ => Err("search schema must serialize to an object".to_string()),
            }
        })
    }

    pub fn pre_search_filter(mut self, filter: SearchFilter) -> Self {
        self.options.pre_search_filters.push(filter);
        self
    }

    pub fn post_search_filter(mut self, filter: SearchFilter) -> Self {
        self.options.post_search_filters.push(filter);
        self
    }

    pub fn loader_max_age(mut self, max_age: Duration) -> Self {
        self.options.loader_max_age = Some(max_age);
        self
    }

    pub fn loader_gc_max_age(mut self, gc_max_age: Duration) -> Self {
        self.options.loader_gc_max_age = Some(gc_max_age);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.options.case_sensitive = Some(case_sensitive);
        self
    }

    /// Add metadata
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.meta.insert(key.into(), value.into());
        self
    }

    /// Add child routes
    pub fn children(mut self, children: Vec<RouteConfig>) -> Self {
        self.children = children;
        self
    }

    /// Add a child route
    pub fn child(mut self, child: RouteConfig) -> Self {
        self.children.push(child);
        self
    }
}

// ============================================================================
// RouteNode
// ============================================================================

/// Shared route handle.
pub type RouteRef = Arc<RouteNode>;

/// A node of the built route tree. Immutable.
pub struct RouteNode {
    pub(crate) id: String,
    pub(crate) path: String,
    pub(crate) full_path: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) generation: u64,
    pub(crate) options: RouteOptions,
    pub(crate) children: Vec<RouteRef>,
}

impl RouteNode {
    /// Unique id derived from the position in the tree, e.g. `posts/:id`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Own path segment pattern (`""` for layouts, `"/"` for index routes)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pattern from the root, e.g. `/posts/:id`
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Tree generation this node belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    pub fn children(&self) -> &[RouteRef] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Pathless layout route
    pub fn is_layout(&self) -> bool {
        self.path.is_empty()
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.options.meta.get(key)
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("full_path", &self.full_path)
            .field("generation", &self.generation)
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_validate_route_path() {
        assert!(validate_route_path("").is_ok());
        assert!(validate_route_path("/").is_ok());
        assert!(validate_route_path("users/:id").is_ok());
        assert!(validate_route_path("/files/*").is_ok());
        assert!(validate_route_path("posts/").is_ok());

        assert!(validate_route_path("a//b").is_err());
        assert!(validate_route_path("users/:").is_err());
        assert!(validate_route_path("users/:user-id").is_err());
        assert!(validate_route_path(":id/x/:id").is_err());
        assert!(validate_route_path("*/tail").is_err());
    }

    #[test]
    fn test_try_new() {
        assert!(RouteConfig::try_new("posts/:id").is_ok());
        let err = RouteConfig::try_new("a//b").unwrap_err();
        assert!(matches!(err, RouterError::InvalidRoutePath { .. }));
    }

    #[test]
    fn test_builder_collects_options() {
        let config = RouteConfig::new("posts")
            .loader(|_| async { Ok::<_, LoaderError>(json!(1)) })
            .loader_max_age(Duration::from_secs(10))
            .case_sensitive(true)
            .meta("title", "Posts")
            .child(RouteConfig::new(":id"))
            .child(RouteConfig::layout("_auth"));

        assert_eq!(config.kind, RouteKind::Path("posts".into()));
        assert!(config.options.loader.is_some());
        assert_eq!(config.options.loader_max_age, Some(Duration::from_secs(10)));
        assert_eq!(config.options.case_sensitive, Some(true));
        assert_eq!(config.options.meta["title"], json!("Posts"));
        assert_eq!(config.children.len(), 2);
        assert_eq!(config.children[1].kind, RouteKind::Layout("_auth".into()));
    }

    #[tokio::test]
    async fn test_loader_output_is_serialized() {
        #[derive(Serialize)]
        struct Post {
            id: u32,
        }

        let config = RouteConfig::new("p").loader(|_| async { Ok::<_, LoaderError>(Post { id: 7 }) });
        let loader = config.options.loader.unwrap();
        let data = loader(LoaderContext::new(RouteParams::new(), SearchObject::new()))
            .await
            .unwrap();
        assert_eq!(data, json!({ "id": 7 }));
    }

    #[test]
    fn test_search_schema() {
        #[derive(Serialize, Deserialize)]
        struct PostsSearch {
            #[serde(default = "first_page")]
            page: u32,
        }
        fn first_page() -> u32 {
            1
        }

        let config = RouteConfig::new("posts").search_schema::<PostsSearch>();
        let validate = config.options.validate_search.unwrap();

        let out = validate(&SearchObject::new()).unwrap();
        assert_eq!(out["page"], json!(1));

        let bad: SearchObject = serde_json::from_value(json!({ "page": "x" })).unwrap();
        assert!(validate(&bad).is_err());
    }
}
