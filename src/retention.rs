use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use crate::storage::Store;

/// Views per session that count as a retained session.
pub const RETENTION_GOAL: u64 = 10;

pub trait ViewCounter {
    /// Adds one view and returns the new total.
    fn increment(&self) -> Result<u64>;
    fn current(&self) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemoryViewCounter {
    views: AtomicU64,
}

impl ViewCounter for MemoryViewCounter {
    fn increment(&self) -> Result<u64> {
        Ok(self.views.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn current(&self) -> Result<u64> {
        Ok(self.views.load(Ordering::SeqCst))
    }
}

/// Counter persisted in the state database under one session id.
pub struct StoreViewCounter {
    store: Arc<Store>,
    session_id: String,
}

impl StoreViewCounter {
    pub fn new(store: Arc<Store>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    /// Counter for a fresh, randomly named session.
    pub fn new_session(store: Arc<Store>) -> Self {
        Self::new(store, new_session_id())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ViewCounter for StoreViewCounter {
    fn increment(&self) -> Result<u64> {
        self.store.increment_session_views(&self.session_id)
    }

    fn current(&self) -> Result<u64> {
        Ok(self
            .store
            .session_views(&self.session_id)?
            .map(|row| row.views)
            .unwrap_or(0))
    }
}

pub fn new_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}-{suffix}", std::process::id())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionEvent {
    GoalReached { views: u64 },
}

/// Counts viewed entries for the session and signals the retention goal once.
pub struct SessionRetention {
    counter: Box<dyn ViewCounter>,
    views: u64,
}

impl SessionRetention {
    pub fn new(counter: Box<dyn ViewCounter>) -> Self {
        let views = counter.current().unwrap_or_else(|err| {
            warn!(target: "feed.retention", %err, "view_count_read_failed");
            0
        });
        Self { counter, views }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryViewCounter>::default())
    }

    pub fn views(&self) -> u64 {
        self.views
    }

    pub fn has_reached_goal(&self) -> bool {
        self.views >= RETENTION_GOAL
    }

    /// Persistence failures keep counting in memory.
    pub fn record_view(&mut self, entry_id: &str) -> Option<RetentionEvent> {
        let next = match self.counter.increment() {
            Ok(total) => total,
            Err(err) => {
                warn!(target: "feed.retention", %err, "view_count_persist_failed");
                self.views + 1
            }
        };
        self.views = next;
        if next == RETENTION_GOAL {
            info!(target: "feed.retention", entry = entry_id, views = next, "retention_goal_reached");
            return Some(RetentionEvent::GoalReached { views: next });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct BrokenCounter;

    impl ViewCounter for BrokenCounter {
        fn increment(&self) -> Result<u64> {
            Err(anyhow!("storage full"))
        }

        fn current(&self) -> Result<u64> {
            Err(anyhow!("storage unavailable"))
        }
    }

    #[test]
    fn goal_fires_exactly_once() {
        let mut retention = SessionRetention::in_memory();
        let events: Vec<_> = (0..15)
            .filter_map(|i| retention.record_view(&format!("e{i}")))
            .collect();
        assert_eq!(events, vec![RetentionEvent::GoalReached { views: 10 }]);
        assert_eq!(retention.views(), 15);
        assert!(retention.has_reached_goal());
    }

    #[test]
    fn resumes_from_persisted_count() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for _ in 0..8 {
            store.increment_session_views("tab").unwrap();
        }
        let mut retention =
            SessionRetention::new(Box::new(StoreViewCounter::new(store.clone(), "tab")));
        assert_eq!(retention.views(), 8);
        assert_eq!(retention.record_view("a"), None);
        assert_eq!(
            retention.record_view("b"),
            Some(RetentionEvent::GoalReached { views: 10 })
        );
        assert_eq!(store.session_views("tab").unwrap().unwrap().views, 10);
    }

    #[test]
    fn persistence_failure_keeps_counting() {
        let mut retention = SessionRetention::new(Box::new(BrokenCounter));
        assert_eq!(retention.views(), 0);
        retention.record_view("a");
        retention.record_view("b");
        assert_eq!(retention.views(), 2);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
