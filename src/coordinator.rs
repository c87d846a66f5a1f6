//! The feed coordinator.
//!
//! `FeedCoordinator` owns the entry list, the scroll root, the shared mute
//! flag and one visibility sensor plus playback controller per loaded entry.
//! Everything runs on the caller's thread: network fetches and engagement
//! reports run on worker threads and land through `poll`, media backends
//! report through a channel that `poll` drains.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::data::{EngageAction, EngageError, EngagementSink, FeedSource, FetchError};
use crate::feed::Entry;
use crate::mute::MuteCoordinator;
use crate::navigation::{entry_top, KeyPress, NavigationEngine, ScrollContainer, ScrollRoot};
use crate::pagination::{LoadMode, PageOutcome, Paginator};
use crate::playback::{
    MediaEvent, MediaEventKind, MediaFactory, PlaybackController, PlaybackReport, PlaybackState,
};
use crate::resolve::Resolver;
use crate::retention::{RetentionEvent, SessionRetention};
use crate::sentinel::{NearEndSensor, DEFAULT_PREFETCH_MARGIN, SENTINEL_TARGET};
use crate::visibility::{
    LayoutObserver, RootId, Span, VisibilityObserver, VisibilitySensor, ACTIVE_THRESHOLD,
};

static NEXT_ROOT: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub active_threshold: f64,
    pub prefetch_margin: f64,
    pub start_muted: bool,
    pub latency_target: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            active_threshold: ACTIVE_THRESHOLD,
            prefetch_margin: DEFAULT_PREFETCH_MARGIN,
            start_muted: true,
            latency_target: Duration::from_millis(300),
            fetch_timeout: crate::data::DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Everything the coordinator talks to.
pub struct Collaborators {
    pub source: Arc<dyn FeedSource + Send + Sync>,
    pub fallback: Vec<Entry>,
    pub media: Box<dyn MediaFactory>,
    pub media_events: Receiver<MediaEvent>,
    pub engagement: Arc<dyn EngagementSink + Send + Sync>,
    pub retention: SessionRetention,
    pub resolver: Resolver,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    PageLoaded {
        mode: LoadMode,
        added: usize,
    },
    PageFailed {
        mode: LoadMode,
        error: FetchError,
    },
    FirstFrame {
        entry_id: String,
        latency: Duration,
        within_target: bool,
    },
    RetentionGoal {
        views: u64,
    },
    EngageFailed {
        entry_id: String,
        action: EngageAction,
        error: EngageError,
    },
}

struct EntryView {
    sensor: VisibilitySensor,
    playback: PlaybackController,
}

struct EngageResult {
    entry_id: String,
    action: EngageAction,
    result: Result<(), EngageError>,
}

pub struct FeedCoordinator {
    paginator: Paginator,
    mute: MuteCoordinator,
    nav: NavigationEngine,
    scroll: ScrollRoot,
    observer: LayoutObserver,
    root: Option<RootId>,
    views: Vec<EntryView>,
    near_end: NearEndSensor,
    media: Box<dyn MediaFactory>,
    media_events: Receiver<MediaEvent>,
    engagement: Arc<dyn EngagementSink + Send + Sync>,
    engage_tx: Sender<EngageResult>,
    engage_rx: Receiver<EngageResult>,
    liked: HashSet<String>,
    retention: SessionRetention,
    resolver: Resolver,
    options: CoordinatorOptions,
    last_latency: Option<Duration>,
}

impl FeedCoordinator {
    pub fn new(parts: Collaborators, options: CoordinatorOptions) -> Self {
        let Collaborators {
            source,
            fallback,
            media,
            media_events,
            engagement,
            retention,
            resolver,
        } = parts;
        let mut observer = LayoutObserver::new(RootId(NEXT_ROOT.fetch_add(1, Ordering::Relaxed)));
        let near_end = NearEndSensor::attach(None, options.prefetch_margin, &mut observer);
        let (engage_tx, engage_rx) = unbounded();
        Self {
            paginator: Paginator::new(source, fallback).with_timeout(options.fetch_timeout),
            mute: MuteCoordinator::new(options.start_muted),
            nav: NavigationEngine::new(),
            scroll: ScrollRoot::new(0.0),
            observer,
            root: None,
            views: Vec::new(),
            near_end,
            media,
            media_events,
            engagement,
            engage_tx,
            engage_rx,
            liked: HashSet::new(),
            retention,
            resolver,
            options,
            last_latency: None,
        }
    }

    /// Attaches the scroll root and starts the initial load. Until this runs
    /// no sensor observes anything and no entry is active.
    pub fn mount(&mut self, viewport_height: f64) {
        if self.root.is_some() || self.paginator.is_torn_down() {
            return;
        }
        self.scroll.resize(viewport_height, 0);
        self.root = Some(self.observer.root());
        self.near_end = NearEndSensor::attach(self.root, self.options.prefetch_margin, &mut self.observer);
        info!(target: "feed.pagination", viewport_height, "mounted");
        self.paginator.load_initial();
    }

    pub fn is_mounted(&self) -> bool {
        self.root.is_some()
    }

    pub fn entries(&self) -> &[Entry] {
        self.paginator.entries()
    }

    pub fn len(&self) -> usize {
        self.paginator.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paginator.entries().is_empty()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.paginator.error()
    }

    pub fn is_loading(&self) -> bool {
        self.paginator.is_loading()
    }

    pub fn is_loading_more(&self) -> bool {
        self.paginator.is_loading_more()
    }

    pub fn has_more(&self) -> bool {
        self.paginator.has_more()
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// Mute changes as they happen, for hosts that mirror the flag.
    pub fn subscribe_mute(&mut self) -> Receiver<bool> {
        self.mute.subscribe()
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll.scroll_top()
    }

    pub fn viewport_height(&self) -> f64 {
        self.scroll.viewport_height()
    }

    pub fn is_snapped(&self) -> bool {
        self.scroll.is_snapped()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.nav.current_index(&self.scroll, self.len())
    }

    pub fn active_entry(&self) -> Option<&Entry> {
        self.active_index()
            .and_then(|index| self.paginator.entries().get(index))
    }

    /// Whether the visibility sensor for `index` currently reports active.
    pub fn is_entry_active(&self, index: usize) -> bool {
        self.views
            .get(index)
            .map(|view| view.sensor.is_active())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.views.iter().filter(|view| view.sensor.is_active()).count()
    }

    pub fn playback_state(&self, index: usize) -> Option<PlaybackState> {
        self.views.get(index).map(|view| view.playback.state())
    }

    pub fn is_liked(&self, entry_id: &str) -> bool {
        self.liked.contains(entry_id)
    }

    pub fn session_views(&self) -> u64 {
        self.retention.views()
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// Applies everything that resolved since the last call.
    pub fn poll(&mut self, now: Instant) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        if self.paginator.is_torn_down() {
            return events;
        }
        let outcomes = self.paginator.poll(now);
        self.apply_outcomes(outcomes, &mut events);
        self.drain_media(now, &mut events);
        self.drain_engagements(&mut events);
        self.sync_visibility(now);
        events
    }

    /// Blocks until the outstanding page fetch resolves, then applies it.
    pub fn wait_for_page(&mut self, limit: Duration) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        let outcomes = self.paginator.wait(limit);
        self.apply_outcomes(outcomes, &mut events);
        events.extend(self.poll(Instant::now()));
        events
    }

    pub fn retry(&mut self) {
        if self.root.is_none() {
            return;
        }
        info!(target: "feed.pagination", "retry");
        self.paginator.retry();
    }

    pub fn scroll_to_next(&mut self) -> Option<usize> {
        let len = self.len();
        let moved = self.nav.scroll_to_next(&mut self.scroll, len);
        self.sync_visibility(Instant::now());
        moved
    }

    pub fn scroll_to_prev(&mut self) -> Option<usize> {
        let len = self.len();
        let moved = self.nav.scroll_to_prev(&mut self.scroll, len);
        self.sync_visibility(Instant::now());
        moved
    }

    pub fn handle_key(&mut self, press: KeyPress) -> Option<usize> {
        let len = self.len();
        let moved = self.nav.handle_key(press, &mut self.scroll, len);
        if moved.is_some() {
            self.sync_visibility(Instant::now());
        }
        moved
    }

    /// Free scroll by `delta` pixels; call `snap` once input goes idle.
    pub fn scroll_by(&mut self, delta: f64) {
        let len = self.len();
        self.scroll.scroll_by(delta, len);
        self.sync_visibility(Instant::now());
    }

    pub fn snap(&mut self) -> bool {
        let len = self.len();
        let moved = self.scroll.snap(len);
        if moved {
            self.sync_visibility(Instant::now());
        }
        moved
    }

    pub fn resize(&mut self, viewport_height: f64) {
        let len = self.len();
        self.scroll.resize(viewport_height, len);
        self.layout_spans();
        self.sync_visibility(Instant::now());
    }

    /// Flips the shared mute flag and applies it to every entry in the same
    /// call, so an unmute reaches the active player inside the input turn.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.mute.toggle();
        for view in &mut self.views {
            view.playback.apply_mute(muted);
        }
        debug!(target: "feed.playback", muted, "mute_toggled");
        muted
    }

    /// Likes or unlikes the active entry. The report runs in the background
    /// and its failure is only logged.
    pub fn toggle_like(&mut self) -> Option<EngageAction> {
        let entry_id = self.active_entry()?.id.clone();
        let action = if self.liked.remove(&entry_id) {
            EngageAction::Unlike
        } else {
            self.liked.insert(entry_id.clone());
            EngageAction::Like
        };
        self.engage(&entry_id, action);
        Some(action)
    }

    pub fn engage(&self, entry_id: &str, action: EngageAction) {
        let sink = self.engagement.clone();
        let tx = self.engage_tx.clone();
        let entry_id = entry_id.to_string();
        thread::spawn(move || {
            let result = sink.engage(&entry_id, action);
            let _ = tx.send(EngageResult {
                entry_id,
                action,
                result,
            });
        });
    }

    /// Stops observing, releases players and discards late page results.
    pub fn teardown(&mut self) {
        self.paginator.teardown();
        let muted = self.mute.is_muted();
        for view in &mut self.views {
            view.sensor.detach(&mut self.observer);
            view.playback.set_active(false, muted, Instant::now());
        }
        self.near_end.detach(&mut self.observer);
        info!(target: "feed.pagination", "torn_down");
    }

    fn apply_outcomes(&mut self, outcomes: Vec<PageOutcome>, events: &mut Vec<FeedEvent>) {
        if outcomes.is_empty() {
            return;
        }
        for outcome in outcomes {
            match outcome {
                PageOutcome::Loaded { mode, added, .. } => {
                    self.apply_list_change(mode);
                    events.push(FeedEvent::PageLoaded { mode, added });
                }
                PageOutcome::Failed { mode, error } => {
                    self.apply_list_change(mode);
                    events.push(FeedEvent::PageFailed { mode, error });
                }
            }
        }
        // The load guard lifted; let the sentinel report its state again.
        self.near_end.rearm(&mut self.observer);
    }

    fn apply_list_change(&mut self, mode: LoadMode) {
        if mode == LoadMode::Initial {
            self.clear_views();
            self.scroll.jump_to(0.0);
        }
        self.append_views();
    }

    fn clear_views(&mut self) {
        let muted = self.mute.is_muted();
        let now = Instant::now();
        for mut view in self.views.drain(..) {
            view.sensor.detach(&mut self.observer);
            view.playback.set_active(false, muted, now);
            self.observer.remove_span(view.sensor.target());
        }
    }

    fn append_views(&mut self) {
        let viewport_height = self.scroll.viewport_height();
        let start = self.views.len();
        for (index, entry) in self.paginator.entries().iter().enumerate().skip(start) {
            self.observer.set_span(
                &entry.id,
                Span::new(entry_top(index, viewport_height), viewport_height),
            );
            let url = self.resolver.entry_url(entry);
            let handle = self.media.create(entry, &url);
            let mut playback = PlaybackController::new(&entry.id, handle);
            if url.is_empty() {
                playback.on_media_error("no playable source");
            }
            let sensor = VisibilitySensor::attach(
                &entry.id,
                self.root,
                self.options.active_threshold,
                &mut self.observer,
            );
            self.views.push(EntryView { sensor, playback });
        }
        self.observer.set_span(
            SENTINEL_TARGET,
            NearEndSensor::span(self.views.len(), viewport_height),
        );
    }

    fn layout_spans(&mut self) {
        let viewport_height = self.scroll.viewport_height();
        for (index, entry) in self.paginator.entries().iter().enumerate() {
            self.observer.set_span(
                &entry.id,
                Span::new(entry_top(index, viewport_height), viewport_height),
            );
        }
        self.observer.set_span(
            SENTINEL_TARGET,
            NearEndSensor::span(self.views.len(), viewport_height),
        );
    }

    fn sync_visibility(&mut self, now: Instant) {
        if self.paginator.is_torn_down() {
            return;
        }
        self.observer
            .set_viewport(self.scroll.scroll_top(), self.scroll.viewport_height());
        let changes = self.observer.drain();
        if changes.is_empty() {
            return;
        }

        let mut activated = Vec::new();
        let mut deactivated = Vec::new();
        let mut near_end = false;
        for change in &changes {
            let view = self
                .views
                .iter_mut()
                .enumerate()
                .find(|(_, view)| view.sensor.observation() == Some(change.observation));
            if let Some((index, view)) = view {
                match view.sensor.on_intersection(change) {
                    Some(true) => activated.push(index),
                    Some(false) => deactivated.push(index),
                    None => {}
                }
                continue;
            }
            let disabled = self.paginator.is_busy() || !self.paginator.has_more();
            if self.near_end.on_intersection(change, disabled) {
                near_end = true;
            }
        }

        // Release first so two players never overlap.
        let muted = self.mute.is_muted();
        for index in deactivated {
            self.views[index].playback.set_active(false, muted, now);
        }
        for index in activated {
            debug!(target: "feed.playback", index, entry = %self.views[index].playback.entry_id(), "activated");
            self.views[index].playback.set_active(true, muted, now);
        }

        if near_end && self.paginator.load_more() {
            debug!(target: "feed.pagination", loaded = self.len(), "prefetch_requested");
        }
    }

    fn drain_media(&mut self, now: Instant, events: &mut Vec<FeedEvent>) {
        while let Ok(event) = self.media_events.try_recv() {
            let Some(view) = self
                .views
                .iter_mut()
                .find(|view| view.playback.entry_id() == event.entry_id)
            else {
                continue;
            };
            match event.kind {
                MediaEventKind::FirstFrame => {
                    for report in view.playback.on_first_frame(now) {
                        match report {
                            PlaybackReport::Latency { entry_id, elapsed } => {
                                let within_target = elapsed <= self.options.latency_target;
                                info!(
                                    target: "feed.playback",
                                    entry = %entry_id,
                                    latency_ms = elapsed.as_millis() as u64,
                                    within_target,
                                    "first_frame"
                                );
                                self.last_latency = Some(elapsed);
                                events.push(FeedEvent::FirstFrame {
                                    entry_id,
                                    latency: elapsed,
                                    within_target,
                                });
                            }
                            PlaybackReport::Viewed { entry_id } => {
                                if let Some(RetentionEvent::GoalReached { views }) =
                                    self.retention.record_view(&entry_id)
                                {
                                    events.push(FeedEvent::RetentionGoal { views });
                                }
                            }
                        }
                    }
                }
                MediaEventKind::Error(message) => {
                    warn!(target: "feed.playback", entry = %event.entry_id, %message, "media_error");
                    view.playback.on_media_error(&message);
                }
            }
        }
    }

    fn drain_engagements(&mut self, events: &mut Vec<FeedEvent>) {
        while let Ok(done) = self.engage_rx.try_recv() {
            match done.result {
                Ok(()) => {
                    debug!(target: "feed.engage", entry = %done.entry_id, action = %done.action, "engaged");
                }
                Err(error) => {
                    warn!(target: "feed.engage", entry = %done.entry_id, action = %done.action, %error, "engage_failed");
                    events.push(FeedEvent::EngageFailed {
                        entry_id: done.entry_id,
                        action: done.action,
                        error,
                    });
                }
            }
        }
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        if !self.paginator.is_torn_down() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockEngagementSink, MockFeedSource};
    use crate::feed::{Cursor, FeedPage};
    use crate::navigation::NavKey;
    use crate::playback::{MediaCall, RecordingFactory};

    const VH: f64 = 400.0;
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

    struct Harness {
        feed: FeedCoordinator,
        factory: RecordingFactory,
        source: Arc<MockFeedSource>,
        sink: Arc<MockEngagementSink>,
        media_tx: Sender<MediaEvent>,
    }

    fn harness(script: Vec<Result<FeedPage, FetchError>>, fallback: &[&str]) -> Harness {
        harness_with_sink(script, fallback, MockEngagementSink::default())
    }

    fn harness_with_sink(
        script: Vec<Result<FeedPage, FetchError>>,
        fallback: &[&str],
        sink: MockEngagementSink,
    ) -> Harness {
        let factory = RecordingFactory::default();
        let source = Arc::new(MockFeedSource::new(script));
        let sink = Arc::new(sink);
        let (media_tx, media_rx) = unbounded();
        let feed = FeedCoordinator::new(
            Collaborators {
                source: source.clone(),
                fallback: entries(fallback),
                media: Box::new(factory.clone()),
                media_events: media_rx,
                engagement: sink.clone(),
                retention: SessionRetention::in_memory(),
                resolver: Resolver::default(),
            },
            CoordinatorOptions::default(),
        );
        Harness {
            feed,
            factory,
            source,
            sink,
            media_tx,
        }
    }

    fn first_frame(h: &Harness, id: &str) {
        h.media_tx
            .send(MediaEvent {
                entry_id: id.to_string(),
                kind: MediaEventKind::FirstFrame,
            })
            .unwrap();
    }

    fn plays(h: &Harness) -> Vec<String> {
        h.factory
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MediaCall::Play(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_observes_before_mount() {
        let mut h = harness(vec![page(&["a"], None)], &[]);
        h.feed.poll(Instant::now());
        assert!(!h.feed.is_mounted());
        assert!(h.source.calls().is_empty());
        assert_eq!(h.feed.active_count(), 0);
    }

    #[test]
    fn initial_load_activates_first_entry_only() {
        let mut h = harness(vec![page(&["a", "b", "c"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        assert_eq!(h.feed.len(), 3);
        assert_eq!(h.feed.active_count(), 1);
        assert!(h.feed.is_entry_active(0));
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Playing));
        assert_eq!(plays(&h), vec!["a"]);
    }

    #[test]
    fn navigation_moves_playback_to_exactly_one_entry() {
        let mut h = harness(vec![page(&["a", "b", "c"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);

        assert_eq!(h.feed.scroll_to_prev(), None);
        assert_eq!(h.feed.scroll_to_next(), Some(1));
        assert_eq!(h.feed.active_count(), 1);
        assert!(h.feed.is_entry_active(1));
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Paused));
        assert_eq!(h.feed.playback_state(1), Some(PlaybackState::Playing));

        let held = KeyPress {
            key: NavKey::Down,
            repeat: true,
        };
        assert_eq!(h.feed.handle_key(held), None);
        assert_eq!(h.feed.active_index(), Some(1));

        h.feed.scroll_to_next();
        assert_eq!(h.feed.scroll_to_next(), None);
        assert_eq!(h.feed.active_index(), Some(2));
        assert_eq!(h.feed.active_count(), 1);
    }

    #[test]
    fn unmute_is_sticky_across_entries() {
        let mut h = harness(vec![page(&["a", "b"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        h.factory.clear();

        assert!(!h.feed.toggle_mute());
        let calls = h.factory.calls();
        assert!(calls.contains(&MediaCall::Mute("a".into(), false)));
        // Unmuting the playing entry re-issues play in the same call.
        assert!(calls.contains(&MediaCall::Play("a".into())));

        h.factory.clear();
        h.feed.scroll_to_next();
        let calls = h.factory.calls();
        let mute_then_play = vec![
            MediaCall::Pause("a".into()),
            MediaCall::Mute("b".into(), false),
            MediaCall::Play("b".into()),
        ];
        assert_eq!(calls, mute_then_play);
    }

    #[test]
    fn near_end_prefetches_once_per_page() {
        let mut h = harness(
            vec![page(&["a", "b"], Some("c1")), page(&["c"], None)],
            &[],
        );
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        assert_eq!(h.source.calls().len(), 1);

        h.feed.scroll_to_next();
        assert!(h.feed.is_loading_more());
        h.feed.scroll_by(-10.0);
        h.feed.snap();
        h.feed.wait_for_page(WAIT);

        assert_eq!(h.source.calls().len(), 2);
        let ids: Vec<_> = h.feed.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!h.feed.has_more());
    }

    #[test]
    fn initial_failure_falls_back_and_retry_recovers() {
        let mut h = harness(
            vec![
                Err(FetchError::Transport("Network failed".into())),
                page(&["a", "b"], None),
            ],
            &["f1"],
        );
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        assert_eq!(
            h.feed.error().map(|e| e.to_string()),
            Some("Network failed".to_string())
        );
        assert_eq!(h.feed.entries()[0].id, "f1");
        assert!(!h.feed.has_more());

        h.feed.retry();
        h.feed.wait_for_page(WAIT);
        assert!(h.feed.error().is_none());
        let ids: Vec<_> = h.feed.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(h.feed.active_count(), 1);
    }

    #[test]
    fn media_error_is_contained_to_its_entry() {
        let mut h = harness(vec![page(&["a", "b"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        h.media_tx
            .send(MediaEvent {
                entry_id: "a".into(),
                kind: MediaEventKind::Error("decode failed".into()),
            })
            .unwrap();
        h.feed.poll(Instant::now());
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Unavailable));

        h.feed.scroll_to_next();
        assert_eq!(h.feed.playback_state(1), Some(PlaybackState::Playing));
        h.feed.scroll_to_prev();
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Unavailable));
        assert!(h.feed.error().is_none());
    }

    #[test]
    fn first_frames_report_latency_and_count_views() {
        let ids: Vec<String> = (0..12).map(|i| format!("v{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut h = harness(vec![page(&id_refs, None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);

        let mut goals = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            if index > 0 {
                h.feed.scroll_to_next();
            }
            first_frame(&h, id);
            first_frame(&h, id);
            for event in h.feed.poll(Instant::now()) {
                if let FeedEvent::RetentionGoal { views } = event {
                    goals.push(views);
                }
            }
        }
        assert_eq!(goals, vec![10]);
        assert_eq!(h.feed.session_views(), 12);
        assert!(h.feed.last_latency().is_some());
    }

    #[test]
    fn like_reports_in_background() {
        let mut h = harness(vec![page(&["a"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        assert_eq!(h.feed.toggle_like(), Some(EngageAction::Like));
        assert!(h.feed.is_liked("a"));
        assert_eq!(h.feed.toggle_like(), Some(EngageAction::Unlike));
        assert!(!h.feed.is_liked("a"));

        let deadline = Instant::now() + WAIT;
        while h.sink.calls().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let mut calls = h.sink.calls();
        calls.sort_by_key(|(_, action)| action.as_str());
        assert_eq!(
            calls,
            vec![
                ("a".to_string(), EngageAction::Like),
                ("a".to_string(), EngageAction::Unlike)
            ]
        );
    }

    #[test]
    fn failed_like_is_reported_without_touching_the_feed() {
        let mut h = harness_with_sink(
            vec![page(&["a", "b"], None)],
            &[],
            MockEngagementSink::failing(),
        );
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        h.factory.clear();

        assert_eq!(h.feed.toggle_like(), Some(EngageAction::Like));
        let deadline = Instant::now() + WAIT;
        let mut failed = None;
        while failed.is_none() && Instant::now() < deadline {
            failed = h.feed.poll(Instant::now()).into_iter().find_map(|event| match event {
                FeedEvent::EngageFailed {
                    entry_id, action, ..
                } => Some((entry_id, action)),
                _ => None,
            });
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(failed, Some(("a".to_string(), EngageAction::Like)));

        assert_eq!(h.feed.len(), 2);
        assert!(h.feed.error().is_none());
        assert!(h.feed.is_liked("a"));
        assert_eq!(h.feed.active_index(), Some(0));
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Playing));
        assert!(h.factory.calls().is_empty());
    }

    #[test]
    fn mute_subscribers_see_every_toggle() {
        let mut h = harness(vec![page(&["a"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        let first = h.feed.subscribe_mute();
        let second = h.feed.subscribe_mute();

        h.feed.toggle_mute();
        h.feed.toggle_mute();
        for rx in [first, second] {
            assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![false, true]);
        }
    }

    #[test]
    fn teardown_releases_players_and_ignores_late_pages() {
        let mut h = harness(vec![page(&["a"], None), page(&["b"], None)], &[]);
        h.feed.mount(VH);
        h.feed.wait_for_page(WAIT);
        h.feed.teardown();
        assert_eq!(h.feed.playback_state(0), Some(PlaybackState::Paused));
        assert!(h.feed.poll(Instant::now()).is_empty());
        h.feed.retry();
        assert_eq!(h.source.calls().len(), 1);
    }
}
