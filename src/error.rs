//! Error handling for the router
//!
//! One error type covers the whole taxonomy: configuration mistakes found while
//! building the route tree, parameter/search parse failures, guard rejections,
//! loader failures and hydration mismatches. Errors are `Clone` because a
//! failed match keeps its error in its observable state.

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors produced by the navigation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// Two nodes in the route tree resolved to the same id.
    #[error("duplicate route id: {id}")]
    DuplicateRouteId { id: String },

    /// A route path pattern failed validation.
    #[error("invalid route path '{path}': {message}")]
    InvalidRoutePath { path: String, message: String },

    /// No route with this id exists in the current tree.
    #[error("route not found: {id}")]
    RouteNotFound { id: String },

    /// A route's param parser rejected the extracted path params.
    #[error("invalid params for route '{route_id}': {message}")]
    InvalidParams { route_id: String, message: String },

    /// A route's search validator rejected the location search.
    #[error("invalid search params for route '{route_id}': {message}")]
    InvalidSearch { route_id: String, message: String },

    /// A `before_load` guard refused to let the match load.
    #[error("navigation blocked by route '{route_id}': {reason}")]
    GuardRejected {
        route_id: String,
        reason: String,
        redirect: Option<String>,
    },

    /// The route's loader failed.
    #[error("loader for route '{route_id}' failed: {source}")]
    Loader {
        route_id: String,
        #[source]
        source: LoaderError,
    },

    /// A dehydrated snapshot does not line up with the local route tree.
    #[error("hydration mismatch at match {index}: expected '{expected}', found '{found}'")]
    HydrationMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// `navigate` was asked to go to an absolute URL.
    #[error("attempted to navigate to external url: {href}")]
    ExternalNavigation { href: String },

    /// Guards kept redirecting.
    #[error("too many redirects while navigating to {path}")]
    TooManyRedirects { path: String },
}

impl RouterError {
    /// Redirect target carried by a guard rejection, if any.
    pub fn redirect_path(&self) -> Option<&str> {
        match self {
            RouterError::GuardRejected {
                redirect: Some(path),
                ..
            } => Some(path),
            _ => None,
        }
    }

    /// Check if this error came from a guard
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, RouterError::GuardRejected { .. })
    }
}

/// Error returned by route loaders.
///
/// Loaders are user code, so this only carries a message (and an optional
/// machine-readable code) to stay cloneable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderError {
    message: String,
    code: Option<String>,
}

impl LoaderError {
    const CANCELLED: &'static str = "CANCELLED";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a machine-readable code (e.g. `"NOT_FOUND"`).
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Error used by loaders that stop because their signal was cancelled.
    pub fn cancelled() -> Self {
        Self::new("load cancelled").with_code(Self::CANCELLED)
    }

    /// The loader stopped because its signal was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.code.as_deref() == Some(Self::CANCELLED)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<&str> for LoaderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for LoaderError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_code("DECODE")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejection_with_redirect() {
        let err = RouterError::GuardRejected {
            route_id: "admin".to_string(),
            reason: "Authentication required".to_string(),
            redirect: Some("/login".to_string()),
        };
        assert!(err.is_guard_rejection());
        assert_eq!(err.redirect_path(), Some("/login"));
    }

    #[test]
    fn test_error_display() {
        let err = RouterError::DuplicateRouteId {
            id: "posts".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate route id: posts");

        let err = RouterError::Loader {
            route_id: "posts/:id".to_string(),
            source: LoaderError::new("boom").with_code("E1"),
        };
        assert_eq!(
            err.to_string(),
            "loader for route 'posts/:id' failed: boom (E1)"
        );
    }

    #[test]
    fn test_loader_error_conversions() {
        let err: LoaderError = "nope".into();
        assert_eq!(err.message(), "nope");
        assert_eq!(err.code(), None);
        assert_eq!(LoaderError::cancelled().code(), Some("CANCELLED"));
    }
}
