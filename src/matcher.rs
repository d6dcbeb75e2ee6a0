//! Path matching and resolution
//!
//! Pure functions over path strings:
//!
//! - [`resolve_path`] resolves relative (`.`/`..`) targets against a base
//! - [`match_pathname`] tests a pathname against a route pattern and extracts
//!   parameters
//! - [`interpolate_path`] fills a pattern with parameter values
//!
//! Patterns use `:name` for parameters and a trailing `*` for the remainder
//! of the path, which is bound under the `*` key.

use crate::params::{decode_uri_component, RouteParams};

/// Key under which a trailing wildcard binds the remainder of the path.
pub const WILDCARD_PARAM: &str = "*";

/// A single segment in a parsed path or pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text. A leading or trailing slash is kept as a `"/"` segment.
    Static(String),
    /// Parameter that captures a value (name without the `:` marker)
    Param(String),
    /// Wildcard that matches everything after it
    Wildcard,
}

impl Segment {
    /// Parse a segment from string
    ///
    /// - `"users"` -> `Static("users")`
    /// - `":id"` -> `Param("id")`
    /// - `"*"` -> `Wildcard`
    pub fn parse(s: &str) -> Self {
        if s.starts_with('*') {
            return Segment::Wildcard;
        }
        match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Static(s.to_string()),
        }
    }

    fn is_slash(&self) -> bool {
        matches!(self, Segment::Static(s) if s == "/")
    }

    fn text(&self) -> String {
        match self {
            Segment::Static(s) => s.clone(),
            Segment::Param(name) => format!(":{name}"),
            Segment::Wildcard => WILDCARD_PARAM.to_string(),
        }
    }
}

/// Options for [`match_pathname`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchLocation {
    /// Pattern to match against. `None` matches anything.
    pub to: Option<String>,
    /// Allow the pattern to match a strict ancestor of the pathname.
    pub fuzzy: bool,
    pub case_sensitive: bool,
}

impl MatchLocation {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            ..Self::default()
        }
    }

    pub fn fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// Collapse runs of slashes into one.
pub fn clean_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

pub fn trim_path_left(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_start_matches('/')
    }
}

pub fn trim_path_right(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_end_matches('/')
    }
}

pub fn trim_path(path: &str) -> &str {
    trim_path_right(trim_path_left(path))
}

/// Join non-empty parts with `/` and clean the result.
pub fn join_paths<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    clean_path(&joined)
}

/// Split a path into segments, keeping leading/trailing slashes as `"/"`.
///
/// ```
/// use navigator_core::matcher::{parse_pathname, Segment};
///
/// let segments = parse_pathname("/posts/:id");
/// assert_eq!(
///     segments,
///     vec![
///         Segment::Static("/".into()),
///         Segment::Static("posts".into()),
///         Segment::Param("id".into()),
///     ]
/// );
/// ```
pub fn parse_pathname(pathname: &str) -> Vec<Segment> {
    if pathname.is_empty() {
        return Vec::new();
    }

    let cleaned = clean_path(pathname);
    let mut rest = cleaned.as_str();
    let mut segments = Vec::new();

    if let Some(stripped) = rest.strip_prefix('/') {
        rest = stripped;
        segments.push(Segment::Static("/".to_string()));
    }

    if rest.is_empty() {
        return segments;
    }

    segments.extend(rest.split('/').filter(|s| !s.is_empty()).map(Segment::parse));

    if rest.ends_with('/') {
        segments.push(Segment::Static("/".to_string()));
    }

    segments
}

/// Strip the basepath from `path`, keeping a leading slash.
fn strip_basepath(basepath: &str, path: &str) -> String {
    match path.strip_prefix(basepath) {
        Some(rest) if basepath != "/" => format!("/{rest}"),
        _ => path.to_string(),
    }
}

/// Resolve `to` against `from`, the way a filesystem resolves relative paths.
///
/// The result always starts with `basepath`.
///
/// ```
/// use navigator_core::matcher::resolve_path;
///
/// assert_eq!(resolve_path("/", "/posts/5", "../6"), "/posts/6");
/// assert_eq!(resolve_path("/", "/posts", "./new"), "/posts/new");
/// assert_eq!(resolve_path("/app", "/app/posts", "/users"), "/app/users");
/// ```
pub fn resolve_path(basepath: &str, from: &str, to: &str) -> String {
    let from = strip_basepath(basepath, from);
    let to = strip_basepath(basepath, to);

    let mut base_segments = parse_pathname(&from);
    let to_segments = parse_pathname(&to);
    let last_index = to_segments.len().saturating_sub(1);

    for (index, segment) in to_segments.into_iter().enumerate() {
        if segment.is_slash() {
            if index == 0 {
                // Leading slash: absolute target
                base_segments = vec![segment];
            } else if index == last_index {
                base_segments.push(segment);
            }
            continue;
        }

        match &segment {
            Segment::Static(s) if s == ".." => {
                if base_segments.len() > 1
                    && base_segments.last().is_some_and(Segment::is_slash)
                {
                    base_segments.pop();
                }
                base_segments.pop();
            }
            Segment::Static(s) if s == "." => {}
            _ => base_segments.push(segment),
        }
    }

    // The basepath already supplies the leading slash
    let skip = usize::from(base_segments.first().is_some_and(Segment::is_slash));
    let mut parts = vec![basepath.to_string()];
    parts.extend(base_segments.iter().skip(skip).map(Segment::text));
    let joined = join_paths(&parts);
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Test `pathname` against `location.to`, returning extracted params.
///
/// Returns `None` when a pattern was given and it does not match. Trailing
/// slashes on `pathname` are ignored.
///
/// ```
/// use navigator_core::matcher::{match_pathname, MatchLocation};
///
/// let params = match_pathname("/", "/posts/5", &MatchLocation::new("/posts/:id")).unwrap();
/// assert_eq!(params.get("id"), Some(&"5".to_string()));
///
/// assert!(match_pathname("/", "/posts/5", &MatchLocation::new("/posts")).is_none());
/// assert!(match_pathname("/", "/posts/5", &MatchLocation::new("/posts").fuzzy(true)).is_some());
/// ```
pub fn match_pathname(
    basepath: &str,
    pathname: &str,
    location: &MatchLocation,
) -> Option<RouteParams> {
    let params = match_by_path(basepath, pathname, location);
    if location.to.is_some() && params.is_none() {
        return None;
    }
    Some(params.unwrap_or_default())
}

fn segments_equal(route: &str, base: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        route == base
    } else {
        route.to_lowercase() == base.to_lowercase()
    }
}

/// Segment-by-segment comparison behind [`match_pathname`].
pub fn match_by_path(
    basepath: &str,
    pathname: &str,
    location: &MatchLocation,
) -> Option<RouteParams> {
    if !pathname.starts_with(basepath) {
        return None;
    }

    let from = if basepath == "/" {
        pathname
    } else {
        &pathname[basepath.len()..]
    };
    let from = trim_path_right(from);

    let base_segments = parse_pathname(from);
    let to = location.to.as_deref().unwrap_or(WILDCARD_PARAM);
    let route_segments = parse_pathname(to);
    let mut params = RouteParams::new();

    let len = base_segments.len().max(route_segments.len());
    for i in 0..len {
        let base_segment = base_segments.get(i);
        let is_last_route_segment = i + 1 == route_segments.len();
        let is_last_base_segment = i + 1 == base_segments.len();

        if let Some(route_segment) = route_segments.get(i) {
            match route_segment {
                Segment::Wildcard => {
                    return match base_segment {
                        Some(_) => {
                            let rest: Vec<String> =
                                base_segments[i..].iter().map(Segment::text).collect();
                            params.insert(WILDCARD_PARAM, decode_uri_component(&join_paths(&rest)));
                            Some(params)
                        }
                        None => None,
                    };
                }
                Segment::Static(expected) => {
                    if expected == "/" && base_segment.is_none() {
                        return Some(params);
                    }
                    let base = base_segment?;
                    if !segments_equal(expected, &base.text(), location.case_sensitive) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let base = base_segment?;
                    match base {
                        Segment::Static(value) if value == "/" => return None,
                        Segment::Static(value) => {
                            params.insert(name.clone(), decode_uri_component(value));
                        }
                        // Matching a pattern against a pattern leaves the param unbound
                        Segment::Param(_) | Segment::Wildcard => {}
                    }
                }
            }
        }

        if is_last_route_segment && !is_last_base_segment {
            return location.fuzzy.then_some(params);
        }
    }

    Some(params)
}

/// Substitute `:name` markers in `pattern` with values from `params`.
///
/// With `leave_wildcard` the `*` marker is kept verbatim (used for match
/// ids); otherwise it is replaced by the bound `*` value, if any.
///
/// ```
/// use navigator_core::matcher::interpolate_path;
/// use navigator_core::RouteParams;
///
/// let params: RouteParams = [("id", "5")].into_iter().collect();
/// assert_eq!(interpolate_path("posts/:id", &params, true), "posts/5");
/// ```
pub fn interpolate_path(pattern: &str, params: &RouteParams, leave_wildcard: bool) -> String {
    let parts: Vec<String> = parse_pathname(pattern)
        .iter()
        .map(|segment| match segment {
            Segment::Wildcard if leave_wildcard => WILDCARD_PARAM.to_string(),
            Segment::Wildcard => params.get(WILDCARD_PARAM).cloned().unwrap_or_default(),
            Segment::Param(name) => params.get(name).cloned().unwrap_or_default(),
            Segment::Static(s) => s.clone(),
        })
        .collect();
    join_paths(&parts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> RouteParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_segment_parse() {
        assert_eq!(Segment::parse("users"), Segment::Static("users".into()));
        assert_eq!(Segment::parse(":id"), Segment::Param("id".into()));
        assert_eq!(Segment::parse("*"), Segment::Wildcard);
    }

    #[test]
    fn test_clean_and_trim() {
        assert_eq!(clean_path("//a///b/"), "/a/b/");
        assert_eq!(trim_path("/a/b/"), "a/b");
        assert_eq!(trim_path("/"), "/");
        assert_eq!(trim_path_left("//a"), "a");
        assert_eq!(trim_path_right("a//"), "a");
        assert_eq!(join_paths(&["/", "", "posts", "/5"]), "/posts/5");
    }

    #[test]
    fn test_parse_pathname_slashes() {
        assert!(parse_pathname("").is_empty());
        assert_eq!(parse_pathname("/"), vec![Segment::Static("/".into())]);
        assert_eq!(
            parse_pathname("posts/"),
            vec![Segment::Static("posts".into()), Segment::Static("/".into())]
        );
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_path("/", "/posts/5", "."), "/posts/5");
        assert_eq!(resolve_path("/", "/posts/5", ".."), "/posts");
        assert_eq!(resolve_path("/", "/posts/5", "../.."), "/");
        assert_eq!(resolve_path("/", "/posts/5", "../../../.."), "/");
        assert_eq!(resolve_path("/", "/posts", "5/edit"), "/posts/5/edit");
        assert_eq!(resolve_path("/", "/posts", "new/"), "/posts/new/");
    }

    #[test]
    fn test_resolve_absolute_is_idempotent() {
        for from in ["/", "/a/b/c", "/posts/5", ""] {
            let once = resolve_path("/", from, "/users/7");
            assert_eq!(once, "/users/7");
            assert_eq!(resolve_path("/", "/elsewhere", &once), once);
        }
    }

    #[test]
    fn test_resolve_with_basepath() {
        assert_eq!(resolve_path("/app", "/app/posts", "5"), "/app/posts/5");
        assert_eq!(resolve_path("/app", "/app/posts", ".."), "/app");
        assert_eq!(resolve_path("/app", "/app", "/settings"), "/app/settings");
    }

    #[test]
    fn test_match_exact_and_fuzzy() {
        let exact = MatchLocation::new("/posts");
        assert!(match_pathname("/", "/posts", &exact).is_some());
        assert!(match_pathname("/", "/posts/", &exact).is_some());
        assert!(match_pathname("/", "/posts/1", &exact).is_none());
        assert!(match_pathname("/", "/post", &exact).is_none());
        assert!(match_pathname("/", "/", &exact).is_none());

        let fuzzy = MatchLocation::new("/posts").fuzzy(true);
        assert!(match_pathname("/", "/posts/1/comments", &fuzzy).is_some());
        assert!(match_pathname("/", "/users/1", &fuzzy).is_none());
    }

    #[test]
    fn test_match_root() {
        let root = MatchLocation::new("/").fuzzy(true);
        assert!(match_pathname("/", "/", &root).is_some());
        assert!(match_pathname("/", "/anything/here", &root).is_some());

        let index = MatchLocation::new("/");
        assert!(match_pathname("/", "/", &index).is_some());
        assert!(match_pathname("/", "/posts", &index).is_none());
    }

    #[test]
    fn test_match_params_decoded() {
        let loc = MatchLocation::new("/users/:name/posts/:id");
        let p = match_pathname("/", "/users/j%C3%BCrgen/posts/42", &loc).unwrap();
        assert_eq!(p.get("name"), Some(&"jürgen".to_string()));
        assert_eq!(p.get_as::<u32>("id"), Some(42));
    }

    #[test]
    fn test_match_wildcard() {
        let loc = MatchLocation::new("/files/*");
        let p = match_pathname("/", "/files/docs/readme.md", &loc).unwrap();
        assert_eq!(p.get(WILDCARD_PARAM), Some(&"docs/readme.md".to_string()));
        assert!(match_pathname("/", "/files", &loc).is_none());
    }

    #[test]
    fn test_match_case_sensitivity() {
        let insensitive = MatchLocation::new("/About");
        assert!(match_pathname("/", "/about", &insensitive).is_some());

        let sensitive = MatchLocation::new("/About").case_sensitive(true);
        assert!(match_pathname("/", "/about", &sensitive).is_none());
        assert!(match_pathname("/", "/About", &sensitive).is_some());
    }

    #[test]
    fn test_match_basepath() {
        let loc = MatchLocation::new("/posts/:id");
        let p = match_pathname("/app", "/app/posts/3", &loc).unwrap();
        assert_eq!(p.get("id"), Some(&"3".to_string()));
        assert!(match_pathname("/app", "/posts/3", &loc).is_none());
    }

    #[test]
    fn test_match_without_pattern_matches_anything() {
        let p = match_pathname("/", "/whatever", &MatchLocation::default());
        assert!(p.is_some());
    }

    #[test]
    fn test_interpolate() {
        let p = params(&[("id", "5"), ("*", "a/b")]);
        assert_eq!(interpolate_path("/posts/:id", &p, false), "/posts/5");
        assert_eq!(interpolate_path("posts/:id", &p, true), "posts/5");
        assert_eq!(interpolate_path("files/*", &p, true), "files/*");
        assert_eq!(interpolate_path("files/*", &p, false), "files/a/b");
        assert_eq!(interpolate_path("posts/:missing", &p, false), "posts");
        assert_eq!(interpolate_path("__root__", &p, true), "__root__");
        assert_eq!(interpolate_path("posts/", &p, true), "posts/");
    }
}
