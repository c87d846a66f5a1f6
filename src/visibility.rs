//! Visibility sensing for feed entries.
//!
//! The host environment pushes intersection changes; `VisibilityObserver` is
//! the capability a host implements to do so. `LayoutObserver` is the
//! in-process implementation driven by scroll offset and entry layout, used by
//! the terminal frontend and by tests.
//!
//! Observations are always made against a concrete scroll root. A sensor
//! without a root never observes and reports inactive.

use std::collections::HashMap;

/// Fraction of an entry that must be inside the root for it to be active.
pub const ACTIVE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationId(u64);

/// Vertical extent of a target, in the root's content coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub top: f64,
    pub height: f64,
}

impl Span {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObserveOptions {
    /// Ratios at which a change is reported, ascending.
    pub thresholds: Vec<f64>,
    /// Grows the root rectangle on both edges before intersecting.
    pub margin: f64,
}

impl ObserveOptions {
    pub fn threshold(threshold: f64) -> Self {
        Self {
            thresholds: vec![threshold],
            margin: 0.0,
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin.max(0.0);
        self
    }

    fn bucket(&self, ratio: f64) -> usize {
        self.thresholds.iter().filter(|t| ratio >= **t).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub observation: ObservationId,
    pub ratio: f64,
    pub is_intersecting: bool,
}

pub trait VisibilityObserver {
    /// Starts observing `target` against `root`. Returns `None` when the root
    /// is unknown to this observer; nothing will be reported in that case.
    fn observe(
        &mut self,
        root: RootId,
        target: &str,
        options: ObserveOptions,
    ) -> Option<ObservationId>;

    fn unobserve(&mut self, id: ObservationId);

    /// Delivers pending intersection changes in observation order.
    fn drain(&mut self) -> Vec<Intersection>;
}

struct Observation {
    id: ObservationId,
    target: String,
    options: ObserveOptions,
    last: Option<(bool, usize)>,
}

/// Observer backed by a single scroll root's geometry.
pub struct LayoutObserver {
    root: RootId,
    scroll_top: f64,
    viewport_height: f64,
    spans: HashMap<String, Span>,
    observations: Vec<Observation>,
    next_id: u64,
}

impl LayoutObserver {
    pub fn new(root: RootId) -> Self {
        Self {
            root,
            scroll_top: 0.0,
            viewport_height: 0.0,
            spans: HashMap::new(),
            observations: Vec::new(),
            next_id: 1,
        }
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn set_viewport(&mut self, scroll_top: f64, viewport_height: f64) {
        self.scroll_top = scroll_top;
        self.viewport_height = viewport_height.max(0.0);
    }

    pub fn set_span(&mut self, target: &str, span: Span) {
        self.spans.insert(target.to_string(), span);
    }

    pub fn remove_span(&mut self, target: &str) {
        self.spans.remove(target);
    }

    /// Intersection ratio of `span` with the root grown by `margin`.
    pub fn ratio_of(&self, span: Span, margin: f64) -> (f64, bool) {
        let root_top = self.scroll_top - margin;
        let root_bottom = self.scroll_top + self.viewport_height + margin;
        if self.viewport_height <= 0.0 {
            return (0.0, false);
        }
        if span.height <= 0.0 {
            let inside = span.top >= root_top && span.top <= root_bottom;
            return (if inside { 1.0 } else { 0.0 }, inside);
        }
        let visible = (span.bottom().min(root_bottom) - span.top.max(root_top)).max(0.0);
        let ratio = (visible / span.height).clamp(0.0, 1.0);
        (ratio, visible > 0.0)
    }
}

impl VisibilityObserver for LayoutObserver {
    fn observe(
        &mut self,
        root: RootId,
        target: &str,
        options: ObserveOptions,
    ) -> Option<ObservationId> {
        if root != self.root {
            return None;
        }
        let id = ObservationId(self.next_id);
        self.next_id += 1;
        self.observations.push(Observation {
            id,
            target: target.to_string(),
            options,
            last: None,
        });
        Some(id)
    }

    fn unobserve(&mut self, id: ObservationId) {
        self.observations.retain(|obs| obs.id != id);
    }

    fn drain(&mut self) -> Vec<Intersection> {
        let mut events = Vec::new();
        for index in 0..self.observations.len() {
            let (id, span, margin) = {
                let obs = &self.observations[index];
                let Some(span) = self.spans.get(&obs.target).copied() else {
                    continue;
                };
                (obs.id, span, obs.options.margin)
            };
            let (ratio, is_intersecting) = self.ratio_of(span, margin);
            let obs = &mut self.observations[index];
            let state = (is_intersecting, obs.options.bucket(ratio));
            if obs.last == Some(state) {
                continue;
            }
            obs.last = Some(state);
            events.push(Intersection {
                observation: id,
                ratio,
                is_intersecting,
            });
        }
        events
    }
}

/// Reports whether one entry is the active one.
#[derive(Debug)]
pub struct VisibilitySensor {
    target: String,
    threshold: f64,
    observation: Option<ObservationId>,
    active: bool,
}

impl VisibilitySensor {
    pub fn attach(
        target: &str,
        root: Option<RootId>,
        threshold: f64,
        observer: &mut dyn VisibilityObserver,
    ) -> Self {
        let observation =
            root.and_then(|root| observer.observe(root, target, ObserveOptions::threshold(threshold)));
        Self {
            target: target.to_string(),
            threshold,
            observation,
            active: false,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_observing(&self) -> bool {
        self.observation.is_some()
    }

    pub fn observation(&self) -> Option<ObservationId> {
        self.observation
    }

    /// Applies an intersection change. Returns the new state when it flipped.
    pub fn on_intersection(&mut self, change: &Intersection) -> Option<bool> {
        if self.observation != Some(change.observation) {
            return None;
        }
        let active = change.is_intersecting && change.ratio >= self.threshold;
        if active == self.active {
            return None;
        }
        self.active = active;
        Some(active)
    }

    pub fn detach(&mut self, observer: &mut dyn VisibilityObserver) {
        if let Some(id) = self.observation.take() {
            observer.unobserve(id);
        }
        self.active = false;
    }
}
