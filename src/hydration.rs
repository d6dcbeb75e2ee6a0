//! Router snapshots
//!
//! [`Router::dehydrate`](crate::Router::dehydrate) exports the committed state
//! as plain serde data so it can cross a process boundary (server render to
//! client, or a saved session). [`Router::hydrate`](crate::Router::hydrate)
//! re-matches the latest location locally and restores each match from the
//! snapshot, failing on any match-id mismatch.

use crate::location::Location;
use crate::route_match::{MatchStatus, RouteMatch};
use crate::state::{RouterState, RouterStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exported router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedRouter {
    pub state: DehydratedRouterState,
    /// Router context, restored as-is
    #[serde(default)]
    pub context: Value,
}

/// Exported router state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedRouterState {
    pub status: RouterStatus,
    pub latest_location: Location,
    pub current_location: Location,
    pub last_updated: u64,
    pub current_matches: Vec<DehydratedMatch>,
}

/// Exported match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedMatch {
    pub match_id: String,
    pub status: MatchStatus,
    pub route_loader_data: Value,
    pub invalid: bool,
    pub invalid_at: u64,
}

impl DehydratedMatch {
    pub(crate) fn from_match(route_match: &RouteMatch) -> Self {
        let state = route_match.state();
        Self {
            match_id: route_match.match_id().to_string(),
            status: state.status,
            route_loader_data: state.route_loader_data,
            invalid: state.invalid,
            invalid_at: state.invalid_at,
        }
    }
}

impl DehydratedRouterState {
    pub(crate) fn from_state(state: &RouterState) -> Self {
        Self {
            status: state.status,
            latest_location: state.latest_location.clone(),
            current_location: state.current_location.clone(),
            last_updated: state.last_updated,
            current_matches: state
                .current_matches
                .iter()
                .map(|m| DehydratedMatch::from_match(m))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::QuerySearchCodec;
    use serde_json::json;

    #[test]
    fn test_snapshot_uses_camel_case() {
        let location = Location::parse("/posts/5", &QuerySearchCodec);
        let snapshot = DehydratedRouter {
            state: DehydratedRouterState {
                status: RouterStatus::Idle,
                latest_location: location.clone(),
                current_location: location,
                last_updated: 42,
                current_matches: vec![DehydratedMatch {
                    match_id: "posts/5".into(),
                    status: MatchStatus::Success,
                    route_loader_data: json!({ "title": "hello" }),
                    invalid: false,
                    invalid_at: 1_000,
                }],
            },
            context: json!({ "user": "ada" }),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"]["lastUpdated"], json!(42));
        assert_eq!(value["state"]["latestLocation"]["pathname"], json!("/posts/5"));
        assert_eq!(value["state"]["currentMatches"][0]["matchId"], json!("posts/5"));
        assert_eq!(value["state"]["currentMatches"][0]["status"], json!("success"));
        assert_eq!(value["state"]["currentMatches"][0]["invalidAt"], json!(1_000));

        let back: DehydratedRouter = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_missing_context_defaults_to_null() {
        let location = serde_json::to_value(Location::default()).unwrap();
        let value = json!({
            "state": {
                "status": "idle",
                "latestLocation": location,
                "currentLocation": location,
                "lastUpdated": 0,
                "currentMatches": [],
            }
        });
        let snapshot: DehydratedRouter = serde_json::from_value(value).unwrap();
        assert_eq!(snapshot.context, Value::Null);
        assert!(snapshot.state.current_matches.is_empty());
    }
}
