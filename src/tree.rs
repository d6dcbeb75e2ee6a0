//! Route tree
//!
//! Built once from a [`RouteConfig`]. Every node gets an id derived from its
//! position (`posts`, `posts/:id`, `posts/` for an index). Duplicate ids are a
//! configuration error. Each build carries a generation number; matches
//! created against one generation are never reused by another.

use crate::error::{Result, RouterError};
use crate::logging::{debug_log, error_log};
use crate::matcher::{join_paths, trim_path};
use crate::route::{validate_route_path, RouteConfig, RouteKind, RouteNode, RouteRef, ROOT_ROUTE_ID};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable route tree with id lookup
#[derive(Debug, Clone)]
pub struct RouteTree {
    root: RouteRef,
    routes_by_id: HashMap<String, RouteRef>,
    generation: u64,
}

struct Parent<'a> {
    id: &'a str,
    full_path: &'a str,
    is_root: bool,
}

impl Parent<'_> {
    /// Prefix for child ids; children of the root start fresh.
    fn id_prefix(&self) -> &str {
        if self.is_root {
            ""
        } else {
            self.id
        }
    }
}

impl RouteTree {
    /// Build a tree from a root config.
    ///
    /// ```
    /// use navigator_core::{RouteConfig, RouteTree};
    ///
    /// let tree = RouteTree::build(
    ///     RouteConfig::root().child(RouteConfig::new("posts").child(RouteConfig::new(":id"))),
    ///     1,
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(tree.get("posts/:id").unwrap().full_path(), "/posts/:id");
    /// ```
    pub fn build(config: RouteConfig, generation: u64) -> Result<Self> {
        if config.kind != RouteKind::Root {
            return Err(RouterError::InvalidRoutePath {
                path: describe(&config.kind),
                message: "a route tree must start at RouteConfig::root()".to_string(),
            });
        }

        let RouteConfig {
            options,
            children: child_configs,
            ..
        } = config;

        let mut routes_by_id = HashMap::new();
        let root_parent = Parent {
            id: ROOT_ROUTE_ID,
            full_path: "/",
            is_root: true,
        };
        let children = child_configs
            .into_iter()
            .map(|child| build_node(child, &root_parent, generation, &mut routes_by_id))
            .collect::<Result<Vec<_>>>()?;

        let root = Arc::new(RouteNode {
            id: ROOT_ROUTE_ID.to_string(),
            path: "/".to_string(),
            full_path: "/".to_string(),
            parent_id: None,
            generation,
            options,
            children,
        });
        routes_by_id.insert(ROOT_ROUTE_ID.to_string(), Arc::clone(&root));

        debug_log!(
            "built route tree generation {} with {} routes",
            generation,
            routes_by_id.len()
        );

        Ok(Self {
            root,
            routes_by_id,
            generation,
        })
    }

    pub fn root(&self) -> &RouteRef {
        &self.root
    }

    pub fn get(&self, id: &str) -> Option<RouteRef> {
        self.routes_by_id.get(id).cloned()
    }

    pub fn routes_by_id(&self) -> &HashMap<String, RouteRef> {
        &self.routes_by_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.routes_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes_by_id.is_empty()
    }
}

fn describe(kind: &RouteKind) -> String {
    match kind {
        RouteKind::Root => ROOT_ROUTE_ID.to_string(),
        RouteKind::Path(path) => path.clone(),
        RouteKind::Layout(id) => id.clone(),
    }
}

fn invalid(path: &str, message: &str) -> RouterError {
    RouterError::InvalidRoutePath {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn build_node(
    config: RouteConfig,
    parent: &Parent<'_>,
    generation: u64,
    routes_by_id: &mut HashMap<String, RouteRef>,
) -> Result<RouteRef> {
    let RouteConfig {
        kind,
        options,
        children: child_configs,
    } = config;

    let (id, path, full_path) = match &kind {
        RouteKind::Root => {
            return Err(invalid(ROOT_ROUTE_ID, "the root route cannot be nested"));
        }
        RouteKind::Path(raw) => {
            validate_route_path(raw).map_err(|message| RouterError::InvalidRoutePath {
                path: raw.clone(),
                message,
            })?;
            let segment = trim_path(raw);
            if segment.is_empty() || segment == "/" {
                let id = if parent.is_root {
                    "/".to_string()
                } else {
                    format!("{}/", parent.id)
                };
                (id, "/".to_string(), parent.full_path.to_string())
            } else {
                (
                    join_paths(&[parent.id_prefix(), segment]),
                    segment.to_string(),
                    join_paths(&["/", parent.full_path, segment]),
                )
            }
        }
        RouteKind::Layout(layout_id) => {
            let segment = trim_path(layout_id);
            if segment.is_empty() || segment == "/" || segment.contains('/') {
                return Err(invalid(layout_id, "layout ids must be a single non-empty segment"));
            }
            (
                join_paths(&[parent.id_prefix(), segment]),
                String::new(),
                parent.full_path.to_string(),
            )
        }
    };

    let children = {
        let me = Parent {
            id: &id,
            full_path: &full_path,
            is_root: false,
        };
        child_configs
            .into_iter()
            .map(|child| build_node(child, &me, generation, routes_by_id))
            .collect::<Result<Vec<_>>>()?
    };

    if routes_by_id.contains_key(&id) {
        error_log!("duplicate routes found with id: {}", id);
        return Err(RouterError::DuplicateRouteId { id });
    }

    let node = Arc::new(RouteNode {
        id: id.clone(),
        path,
        full_path,
        parent_id: Some(parent.id.to_string()),
        generation,
        options,
        children,
    });
    routes_by_id.insert(id, Arc::clone(&node));
    Ok(node)
}
