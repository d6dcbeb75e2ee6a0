//! Router state management
//!
//! The router publishes a [`RouterState`] through a [`RouterStore`]. Every
//! change is applied atomically and observers receive whole snapshots, so
//! they never see a half-applied navigation.

use crate::location::Location;
use crate::route_match::RouteMatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Whether a navigation is in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterStatus {
    #[default]
    Idle,
    Loading,
}

/// Router state
#[derive(Debug, Clone)]
pub struct RouterState {
    pub status: RouterStatus,
    /// Most recently requested location (may still be loading)
    pub latest_location: Location,
    /// Location of the committed matches
    pub current_location: Location,
    /// Location being loaded, if any
    pub pending_location: Option<Location>,
    /// Committed matches, root first
    pub current_matches: Vec<Arc<RouteMatch>>,
    /// Matches of the navigation in progress
    pub pending_matches: Vec<Arc<RouteMatch>>,
    /// Clock time of the last commit
    pub last_updated: u64,
}

impl RouterState {
    pub fn new(location: Location) -> Self {
        Self {
            status: RouterStatus::Idle,
            latest_location: location.clone(),
            current_location: location,
            pending_location: None,
            current_matches: Vec::new(),
            pending_matches: Vec::new(),
            last_updated: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == RouterStatus::Loading
    }

    /// Committed match ids, root first
    pub fn current_match_ids(&self) -> Vec<String> {
        self.current_matches
            .iter()
            .map(|m| m.match_id().to_string())
            .collect()
    }

    /// Pending match ids, root first
    pub fn pending_match_ids(&self) -> Vec<String> {
        self.pending_matches
            .iter()
            .map(|m| m.match_id().to_string())
            .collect()
    }

    /// Committed match for a route id
    pub fn current_match(&self, route_id: &str) -> Option<&Arc<RouteMatch>> {
        self.current_matches.iter().find(|m| m.route_id() == route_id)
    }
}

impl Default for RouterState {
    fn default() -> Self {
        Self::new(Location::default())
    }
}

/// Observable container for [`RouterState`]
#[derive(Debug)]
pub struct RouterStore {
    tx: watch::Sender<RouterState>,
}

impl RouterStore {
    pub fn new(state: RouterState) -> Self {
        let (tx, _) = watch::channel(state);
        Self { tx }
    }

    /// Current snapshot
    pub fn state(&self) -> RouterState {
        self.tx.borrow().clone()
    }

    /// Read the state without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&RouterState) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Receiver notified after every update.
    pub fn subscribe(&self) -> watch::Receiver<RouterState> {
        self.tx.subscribe()
    }

    /// Apply `f` atomically and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut RouterState)) {
        self.tx.send_modify(f);
    }
}

impl Default for RouterStore {
    fn default() -> Self {
        Self::new(RouterState::default())
    }
}
