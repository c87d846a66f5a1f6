use crate::visibility::{Intersection, ObservationId, ObserveOptions, RootId, Span, VisibilityObserver};

/// How far ahead of the true end a prefetch is requested.
pub const DEFAULT_PREFETCH_MARGIN: f64 = 200.0;
pub const SENTINEL_TARGET: &str = "__near_end_sentinel__";
const SENTINEL_HEIGHT: f64 = 1.0;

/// Marker placed right after the last loaded entry.
#[derive(Debug)]
pub struct NearEndSensor {
    root: Option<RootId>,
    margin: f64,
    observation: Option<ObservationId>,
    near: bool,
}

impl NearEndSensor {
    pub fn attach(root: Option<RootId>, margin: f64, observer: &mut dyn VisibilityObserver) -> Self {
        let mut sensor = Self {
            root,
            margin,
            observation: None,
            near: false,
        };
        sensor.observe(observer);
        sensor
    }

    pub fn span(len: usize, viewport_height: f64) -> Span {
        Span::new(len as f64 * viewport_height, SENTINEL_HEIGHT)
    }

    pub fn is_near(&self) -> bool {
        self.near
    }

    /// Re-registers the observation so the current state is delivered again.
    /// Called whenever the load guard may have lifted.
    pub fn rearm(&mut self, observer: &mut dyn VisibilityObserver) {
        if let Some(id) = self.observation.take() {
            observer.unobserve(id);
        }
        self.observe(observer);
    }

    /// Returns true when a page should be requested. `disabled` is the
    /// caller-side guard: a load is in flight or there is nothing left.
    pub fn on_intersection(&mut self, change: &Intersection, disabled: bool) -> bool {
        if self.observation != Some(change.observation) {
            return false;
        }
        self.near = change.is_intersecting;
        self.near && !disabled
    }

    pub fn detach(&mut self, observer: &mut dyn VisibilityObserver) {
        if let Some(id) = self.observation.take() {
            observer.unobserve(id);
        }
        self.near = false;
    }

    fn observe(&mut self, observer: &mut dyn VisibilityObserver) {
        self.near = false;
        self.observation = self.root.and_then(|root| {
            observer.observe(
                root,
                SENTINEL_TARGET,
                ObserveOptions::threshold(0.0).with_margin(self.margin),
            )
        });
    }
}
