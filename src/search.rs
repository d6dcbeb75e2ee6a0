//! Search (query string) handling
//!
//! The parsed search of a location is a JSON object. Encoding it to and from
//! the `?a=1&b=x` form is delegated to a pluggable [`SearchCodec`];
//! [`QuerySearchCodec`] is the default.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use url::form_urlencoded;

/// Parsed search parameters of a location.
pub type SearchObject = Map<String, Value>;

/// Transforms a search object. Routes contribute pre-filters (applied to the
/// current search before a navigation's own update) and post-filters
/// (applied to the result).
pub type SearchFilter = Arc<dyn Fn(&SearchObject) -> SearchObject + Send + Sync>;

/// Pluggable search (de)serializer
pub trait SearchCodec: Send + Sync + 'static {
    /// Parse a search string (with or without the leading `?`).
    fn parse(&self, search_str: &str) -> SearchObject;

    /// Serialize a search object; returns `""` or a string starting with `?`.
    fn stringify(&self, search: &SearchObject) -> String;
}

/// Default codec: `application/x-www-form-urlencoded` pairs whose values are
/// JSON-decoded when possible.
///
/// - `?page=2` parses to `{"page": 2}`
/// - `?q=rust` parses to `{"q": "rust"}`
/// - repeated keys collect into an array
/// - non-string values are written as JSON, `null` values are dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct QuerySearchCodec;

impl SearchCodec for QuerySearchCodec {
    fn parse(&self, search_str: &str) -> SearchObject {
        let raw = search_str.strip_prefix('?').unwrap_or(search_str);
        let mut search = SearchObject::new();
        let mut repeated = HashSet::new();

        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            let value = serde_json::from_str::<Value>(&value)
                .unwrap_or_else(|_| Value::String(value.into_owned()));

            match search.get_mut(key.as_ref()) {
                None => {
                    search.insert(key.into_owned(), value);
                }
                Some(existing) => {
                    if repeated.insert(key.to_string()) {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    } else if let Value::Array(items) = existing {
                        items.push(value);
                    }
                }
            }
        }

        search
    }

    fn stringify(&self, search: &SearchObject) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;

        for (key, value) in search {
            let encoded = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            serializer.append_pair(key, &encoded);
            any = true;
        }

        if any {
            format!("?{}", serializer.finish())
        } else {
            String::new()
        }
    }
}

/// Run a filter pipeline left to right.
pub fn apply_filters(filters: &[SearchFilter], search: SearchObject) -> SearchObject {
    filters.iter().fold(search, |acc, filter| filter(&acc))
}

/// Shallow merge where keys of `own` win over `parent`.
pub fn merge_search(parent: &SearchObject, own: &SearchObject) -> SearchObject {
    let mut merged = parent.clone();
    merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Wrap a closure as a [`SearchFilter`].
pub fn search_filter<F>(f: F) -> SearchFilter
where
    F: Fn(&SearchObject) -> SearchObject + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> SearchObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_decodes_json_values() {
        let search = QuerySearchCodec.parse("?page=2&q=rust&active=true");
        assert_eq!(
            Value::Object(search),
            json!({ "page": 2, "q": "rust", "active": true })
        );
    }

    #[test]
    fn test_parse_repeated_keys() {
        let search = QuerySearchCodec.parse("tag=a&tag=b&tag=c");
        assert_eq!(search["tag"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_parse_empty() {
        assert!(QuerySearchCodec.parse("").is_empty());
        assert!(QuerySearchCodec.parse("?").is_empty());
    }

    #[test]
    fn test_stringify() {
        let search = obj(json!({ "page": 2, "q": "hello world", "gone": null }));
        let s = QuerySearchCodec.stringify(&search);
        assert!(s.starts_with('?'));
        assert!(s.contains("page=2"));
        assert!(s.contains("q=hello+world"));
        assert!(!s.contains("gone"));

        assert_eq!(QuerySearchCodec.stringify(&SearchObject::new()), "");
    }

    #[test]
    fn test_stringify_parse_keeps_structured_values() {
        let search = obj(json!({ "filter": { "status": "open" } }));
        let s = QuerySearchCodec.stringify(&search);
        assert_eq!(QuerySearchCodec.parse(&s), search);
    }

    #[test]
    fn test_filters_and_merge() {
        let filters = vec![
            search_filter(|s| {
                let mut s = s.clone();
                s.remove("secret");
                s
            }),
            search_filter(|s| {
                let mut s = s.clone();
                s.insert("page".into(), json!(1));
                s
            }),
        ];
        let out = apply_filters(&filters, obj(json!({ "secret": "x", "q": "a" })));
        assert_eq!(Value::Object(out), json!({ "q": "a", "page": 1 }));

        let merged = merge_search(&obj(json!({ "a": 1, "b": 1 })), &obj(json!({ "b": 2 })));
        assert_eq!(Value::Object(merged), json!({ "a": 1, "b": 2 }));
    }
}
