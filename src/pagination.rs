use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::data::{FeedSource, FetchError, DEFAULT_FETCH_TIMEOUT};
use crate::feed::{Cursor, Entry, FeedPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// First page; replaces the list.
    Initial,
    /// Next page; appends to the list.
    More,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded {
        mode: LoadMode,
        added: usize,
        skipped: usize,
    },
    Failed {
        mode: LoadMode,
        error: FetchError,
    },
}

struct PendingFetch {
    request_id: u64,
    mode: LoadMode,
    started: Instant,
}

struct FetchResponse {
    request_id: u64,
    result: Result<FeedPage, FetchError>,
}

/// Owns the loaded entry list and the continuation cursor.
///
/// Fetches run on a worker thread and resolve through `poll`, so all state
/// changes happen on the caller's thread. Only one fetch is outstanding at a
/// time, which keeps pages in arrival order.
pub struct Paginator {
    source: Arc<dyn FeedSource + Send + Sync>,
    fallback: Vec<Entry>,
    timeout: Duration,
    entries: Vec<Entry>,
    ids: HashSet<String>,
    cursor: Option<Cursor>,
    error: Option<FetchError>,
    pending: Option<PendingFetch>,
    next_request_id: u64,
    alive: Arc<AtomicBool>,
    response_tx: Sender<FetchResponse>,
    response_rx: Receiver<FetchResponse>,
}

impl Paginator {
    pub fn new(source: Arc<dyn FeedSource + Send + Sync>, fallback: Vec<Entry>) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            source,
            fallback,
            timeout: DEFAULT_FETCH_TIMEOUT,
            entries: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
            error: None,
            pending: None,
            next_request_id: 1,
            alive: Arc::new(AtomicBool::new(true)),
            response_tx,
            response_rx,
        }
    }

    /// Upper bound on a single fetch; later results are discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn is_loading(&self) -> bool {
        matches!(&self.pending, Some(p) if p.mode == LoadMode::Initial)
    }

    pub fn is_loading_more(&self) -> bool {
        matches!(&self.pending, Some(p) if p.mode == LoadMode::More)
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    /// Fetches page one. Supersedes anything in flight.
    pub fn load_initial(&mut self) {
        if self.is_torn_down() {
            return;
        }
        self.error = None;
        self.spawn_fetch(LoadMode::Initial, None);
    }

    /// Fetches the next page unless one is in flight or nothing is left.
    /// Returns whether a fetch was issued.
    pub fn load_more(&mut self) -> bool {
        if self.is_torn_down() || self.pending.is_some() {
            return false;
        }
        let Some(cursor) = self.cursor.clone() else {
            return false;
        };
        self.spawn_fetch(LoadMode::More, Some(cursor));
        true
    }

    /// Clears the error and runs the initial load again.
    pub fn retry(&mut self) {
        self.load_initial();
    }

    /// Drops pending work; results that arrive afterwards are ignored.
    pub fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pending = None;
    }

    /// Applies resolved fetches without blocking.
    pub fn poll(&mut self, now: Instant) -> Vec<PageOutcome> {
        let mut outcomes = Vec::new();
        if self.is_torn_down() {
            return outcomes;
        }
        while let Ok(response) = self.response_rx.try_recv() {
            if let Some(outcome) = self.handle_response(response) {
                outcomes.push(outcome);
            }
        }
        if let Some(outcome) = self.expire(now) {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Blocks until the outstanding fetch resolves or `limit` elapses.
    pub fn wait(&mut self, limit: Duration) -> Vec<PageOutcome> {
        let deadline = Instant::now() + limit;
        let mut outcomes = Vec::new();
        while self.pending.is_some() && !self.is_torn_down() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => {
                    if let Some(outcome) = self.handle_response(response) {
                        outcomes.push(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        outcomes.extend(self.poll(Instant::now()));
        outcomes
    }

    fn spawn_fetch(&mut self, mode: LoadMode, cursor: Option<Cursor>) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending = Some(PendingFetch {
            request_id,
            mode,
            started: Instant::now(),
        });
        debug!(target: "feed.pagination", request_id, ?mode, cursor = ?cursor.as_ref().map(Cursor::as_str), "fetch_start");

        let tx = self.response_tx.clone();
        let source = self.source.clone();
        let alive = self.alive.clone();
        thread::spawn(move || {
            let result = source.fetch_page(cursor.as_ref());
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(FetchResponse { request_id, result });
        });
    }

    fn expire(&mut self, now: Instant) -> Option<PageOutcome> {
        let pending = self.pending.as_ref()?;
        if now.saturating_duration_since(pending.started) < self.timeout {
            return None;
        }
        let mode = pending.mode;
        self.pending = None;
        Some(self.apply_failure(mode, FetchError::Timeout(self.timeout)))
    }

    fn handle_response(&mut self, response: FetchResponse) -> Option<PageOutcome> {
        let pending = self.pending.as_ref()?;
        if pending.request_id != response.request_id {
            debug!(target: "feed.pagination", request_id = response.request_id, "stale_response_dropped");
            return None;
        }
        let mode = pending.mode;
        self.pending = None;
        Some(match response.result {
            Ok(page) => self.apply_page(mode, page),
            Err(error) => self.apply_failure(mode, error),
        })
    }

    fn apply_page(&mut self, mode: LoadMode, page: FeedPage) -> PageOutcome {
        let FeedPage {
            entries,
            next_cursor,
        } = page;
        if mode == LoadMode::Initial {
            self.entries.clear();
            self.ids.clear();
        }
        let incoming = if mode == LoadMode::Initial && entries.is_empty() {
            self.fallback.clone()
        } else {
            entries
        };
        let total = incoming.len();
        let added = self.extend_unique(incoming);
        self.cursor = next_cursor;
        info!(
            target: "feed.pagination",
            ?mode,
            added,
            skipped = total - added,
            loaded = self.entries.len(),
            has_more = self.has_more(),
            "page_loaded"
        );
        PageOutcome::Loaded {
            mode,
            added,
            skipped: total - added,
        }
    }

    fn apply_failure(&mut self, mode: LoadMode, error: FetchError) -> PageOutcome {
        match mode {
            LoadMode::Initial => {
                warn!(target: "feed.pagination", %error, "initial_load_failed_using_fallback");
                self.entries.clear();
                self.ids.clear();
                let fallback = self.fallback.clone();
                self.extend_unique(fallback);
                self.error = Some(error.clone());
            }
            LoadMode::More => {
                warn!(target: "feed.pagination", %error, loaded = self.entries.len(), "load_more_failed");
            }
        }
        self.cursor = None;
        PageOutcome::Failed { mode, error }
    }

    fn extend_unique(&mut self, incoming: Vec<Entry>) -> usize {
        let before = self.entries.len();
        for entry in incoming {
            if self.ids.insert(entry.id.clone()) {
                self.entries.push(entry);
            }
        }
        self.entries.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockFeedSource;

    const WAIT: Duration = Duration::from_secs(5);

    fn entries(ids: &[&str]) -> Vec<Entry> {
        ids.iter()
            .map(|id| Entry::new(*id, format!("https://x/{id}.mp4"), "@u", "d"))
            .collect()
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> Result<FeedPage, FetchError> {
        Ok(FeedPage {
            entries: entries(ids),
            next_cursor: cursor.and_then(Cursor::new),
        })
    }

    fn ids(paginator: &Paginator) -> Vec<String> {
        paginator.entries().iter().map(|e| e.id.clone()).collect()
    }

    struct SlowSource {
        delay: Duration,
    }

    impl FeedSource for SlowSource {
        fn fetch_page(&self, _cursor: Option<&Cursor>) -> Result<FeedPage, FetchError> {
            thread::sleep(self.delay);
            page(&["late"], None)
        }
    }

    #[test]
    fn initial_page_sets_list_and_cursor() {
        let source = Arc::new(MockFeedSource::new(vec![page(&["a", "b"], Some("c1"))]));
        let mut paginator = Paginator::new(source, entries(&["f1"]));
        paginator.load_initial();
        assert!(paginator.is_loading());
        let outcomes = paginator.wait(WAIT);
        assert_eq!(
            outcomes,
            vec![PageOutcome::Loaded {
                mode: LoadMode::Initial,
                added: 2,
                skipped: 0
            }]
        );
        assert_eq!(ids(&paginator), vec!["a", "b"]);
        assert!(paginator.has_more());
        assert!(!paginator.is_loading());
    }

    #[test]
    fn empty_initial_page_uses_fallback() {
        let source = Arc::new(MockFeedSource::new(vec![page(&[], None)]));
        let mut paginator = Paginator::new(source, entries(&["f1", "f2"]));
        paginator.load_initial();
        paginator.wait(WAIT);
        assert_eq!(ids(&paginator), vec!["f1", "f2"]);
        assert!(paginator.error().is_none());
        assert!(!paginator.has_more());
    }

    #[test]
    fn load_more_is_idempotent_while_in_flight() {
        let source = Arc::new(MockFeedSource::new(vec![
            page(&["a"], Some("c1")),
            page(&["b"], Some("c2")),
        ]));
        let mut paginator = Paginator::new(source.clone(), Vec::new());
        paginator.load_initial();
        paginator.wait(WAIT);

        assert!(paginator.load_more());
        assert!(!paginator.load_more());
        assert!(!paginator.load_more());
        paginator.wait(WAIT);

        assert_eq!(source.calls().len(), 2);
        assert_eq!(ids(&paginator), vec!["a", "b"]);
    }

    #[test]
    fn load_more_failure_keeps_entries_and_stops() {
        let source = Arc::new(MockFeedSource::new(vec![
            page(&["a"], Some("c1")),
            Err(FetchError::Status {
                status: 502,
                reason: "Bad Gateway".into(),
            }),
        ]));
        let mut paginator = Paginator::new(source, Vec::new());
        paginator.load_initial();
        paginator.wait(WAIT);
        paginator.load_more();
        let outcomes = paginator.wait(WAIT);
        assert!(matches!(
            outcomes.as_slice(),
            [PageOutcome::Failed {
                mode: LoadMode::More,
                ..
            }]
        ));
        assert_eq!(ids(&paginator), vec!["a"]);
        assert!(!paginator.has_more());
        assert!(paginator.error().is_none());
        assert!(!paginator.load_more());
    }

    #[test]
    fn empty_more_page_keeps_cursor_semantics() {
        let source = Arc::new(MockFeedSource::new(vec![
            page(&["a"], Some("c1")),
            page(&[], Some("c2")),
        ]));
        let mut paginator = Paginator::new(source.clone(), Vec::new());
        paginator.load_initial();
        paginator.wait(WAIT);
        paginator.load_more();
        paginator.wait(WAIT);
        assert_eq!(ids(&paginator), vec!["a"]);
        assert!(paginator.has_more());
        assert_eq!(
            source.calls().last().cloned().flatten().map(|c| c.as_str().to_string()),
            Some("c1".to_string())
        );
    }

    #[test]
    fn duplicate_ids_across_pages_are_dropped() {
        let source = Arc::new(MockFeedSource::new(vec![
            page(&["a", "b"], Some("c1")),
            page(&["b", "c", "c"], None),
        ]));
        let mut paginator = Paginator::new(source, Vec::new());
        paginator.load_initial();
        paginator.wait(WAIT);
        paginator.load_more();
        let outcomes = paginator.wait(WAIT);
        assert_eq!(
            outcomes,
            vec![PageOutcome::Loaded {
                mode: LoadMode::More,
                added: 1,
                skipped: 2
            }]
        );
        assert_eq!(ids(&paginator), vec!["a", "b", "c"]);
    }

    #[test]
    fn slow_fetch_times_out_and_late_result_is_ignored() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(200),
        });
        let mut paginator =
            Paginator::new(source, entries(&["f1"])).with_timeout(Duration::from_millis(20));
        paginator.load_initial();
        let outcomes = paginator.poll(Instant::now() + Duration::from_millis(50));
        assert_eq!(
            outcomes,
            vec![PageOutcome::Failed {
                mode: LoadMode::Initial,
                error: FetchError::Timeout(Duration::from_millis(20))
            }]
        );
        assert_eq!(ids(&paginator), vec!["f1"]);

        thread::sleep(Duration::from_millis(300));
        assert!(paginator.poll(Instant::now()).is_empty());
        assert_eq!(ids(&paginator), vec!["f1"]);
    }

    #[test]
    fn teardown_discards_late_resolution() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(50),
        });
        let mut paginator = Paginator::new(source, Vec::new());
        paginator.load_initial();
        paginator.teardown();
        thread::sleep(Duration::from_millis(100));
        assert!(paginator.poll(Instant::now()).is_empty());
        assert!(paginator.entries().is_empty());
        paginator.load_initial();
        assert!(!paginator.is_busy());
    }
}
