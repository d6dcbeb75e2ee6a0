//! Location source
//!
//! The router does not own the address bar. It reads and writes locations
//! through a [`LocationSource`] and listens to its pop events (back/forward).
//! [`MemoryHistory`] is an in-memory source with a bounded back/forward stack,
//! used for tests and non-browser hosts.

use crate::location::INITIAL_KEY;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

/// A history entry as seen by the router
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Path, search and hash, e.g. `/posts?page=2#top`
    pub href: String,
    /// Arbitrary state attached on push/replace
    pub state: Value,
    /// Unique key of this entry
    pub key: String,
}

impl HistoryEntry {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            state: Value::Null,
            key: create_key(),
        }
    }

    pub fn with_state(href: impl Into<String>, state: Value) -> Self {
        Self {
            state,
            ..Self::new(href)
        }
    }
}

/// External location collaborator (browser history, memory stack, ...)
pub trait LocationSource: Send + Sync + 'static {
    /// The entry the source currently points at.
    fn current(&self) -> HistoryEntry;

    /// Add an entry, dropping any forward entries.
    fn push(&self, href: &str, state: Value) -> HistoryEntry;

    /// Overwrite the current entry.
    fn replace(&self, href: &str, state: Value) -> HistoryEntry;

    /// Pop notifications. The value is a counter that changes on every
    /// back/forward move; only the change matters.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

fn create_key() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(8)
        .collect()
}

#[derive(Debug)]
struct Stack {
    entries: Vec<HistoryEntry>,
    current: usize,
    max_size: usize,
}

impl Stack {
    fn current(&self) -> &HistoryEntry {
        &self.entries[self.current]
    }

    /// Enforce maximum size limit
    fn enforce_size_limit(&mut self) {
        if self.max_size > 0 && self.entries.len() > self.max_size {
            // Remove oldest entries, keeping the current path reachable
            let excess = self.entries.len() - self.max_size;
            self.entries.drain(0..excess);
            self.current = self.current.saturating_sub(excess);
        }
    }
}

/// In-memory history stack
///
/// # Example
///
/// ```
/// use navigator_core::{LocationSource, MemoryHistory};
///
/// let history = MemoryHistory::new("/");
/// history.push("/posts", serde_json::Value::Null);
/// assert_eq!(history.current().href, "/posts");
///
/// assert!(history.back());
/// assert_eq!(history.current().href, "/");
/// ```
#[derive(Debug)]
pub struct MemoryHistory {
    stack: Mutex<Stack>,
    pops: watch::Sender<u64>,
}

impl MemoryHistory {
    /// Create a new history with initial path
    pub fn new(initial: impl Into<String>) -> Self {
        Self::with_max_size(initial, 1000)
    }

    /// Create with custom max size (0 = unlimited)
    pub fn with_max_size(initial: impl Into<String>, max_size: usize) -> Self {
        let mut entry = HistoryEntry::new(initial);
        entry.key = INITIAL_KEY.to_string();
        Self {
            stack: Mutex::new(Stack {
                entries: vec![entry],
                current: 0,
                max_size,
            }),
            pops: watch::Sender::new(0),
        }
    }

    /// Go back in history; `false` if already at the oldest entry.
    pub fn back(&self) -> bool {
        self.go(-1)
    }

    /// Go forward in history; `false` if already at the newest entry.
    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Move `delta` entries and notify subscribers.
    pub fn go(&self, delta: isize) -> bool {
        let moved = {
            let mut stack = self.stack.lock();
            let target = stack.current.checked_add_signed(delta);
            match target {
                Some(target) if target < stack.entries.len() && delta != 0 => {
                    stack.current = target;
                    true
                }
                _ => false,
            }
        };

        if moved {
            self.pops.send_modify(|n| *n = n.wrapping_add(1));
        }
        moved
    }

    pub fn can_go_back(&self) -> bool {
        self.stack.lock().current > 0
    }

    pub fn can_go_forward(&self) -> bool {
        let stack = self.stack.lock();
        stack.current + 1 < stack.entries.len()
    }

    /// Get history length
    pub fn len(&self) -> usize {
        self.stack.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().entries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.stack.lock().current
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.stack.lock().entries.clone()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("/")
    }
}

impl LocationSource for MemoryHistory {
    fn current(&self) -> HistoryEntry {
        self.stack.lock().current().clone()
    }

    fn push(&self, href: &str, state: Value) -> HistoryEntry {
        let entry = HistoryEntry::with_state(href, state);
        let mut stack = self.stack.lock();

        // Remove forward history when pushing
        let keep = stack.current + 1;
        stack.entries.truncate(keep);
        stack.entries.push(entry.clone());
        stack.current = stack.entries.len() - 1;
        stack.enforce_size_limit();

        entry
    }

    fn replace(&self, href: &str, state: Value) -> HistoryEntry {
        let entry = HistoryEntry::with_state(href, state);
        let mut stack = self.stack.lock();
        let current = stack.current;
        stack.entries[current] = entry.clone();
        entry
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.pops.subscribe()
    }
}
