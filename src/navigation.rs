use tracing::trace;

/// The scrolling element entries live in. Each entry is one viewport tall.
pub trait ScrollContainer {
    fn scroll_top(&self) -> f64;
    fn viewport_height(&self) -> f64;
    /// Positions the container at `top` immediately. Never animated: an
    /// animated scroll passes through offsets where zero or two entries are
    /// over the active threshold.
    fn jump_to(&mut self, top: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Down,
    PageDown,
    Up,
    PageUp,
}

impl NavKey {
    pub fn direction(self) -> Direction {
        match self {
            NavKey::Down | NavKey::PageDown => Direction::Next,
            NavKey::Up | NavKey::PageUp => Direction::Prev,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: NavKey,
    /// Set by the host for auto-repeat events while the key is held.
    pub repeat: bool,
}

/// `floor(scroll_top / viewport_height)` clamped to the loaded range.
pub fn active_index(scroll_top: f64, viewport_height: f64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if viewport_height <= 0.0 || !scroll_top.is_finite() {
        return Some(0);
    }
    let raw = (scroll_top.max(0.0) / viewport_height).floor();
    let index = if raw >= len as f64 { len - 1 } else { raw as usize };
    Some(index)
}

pub fn entry_top(index: usize, viewport_height: f64) -> f64 {
    index as f64 * viewport_height
}

#[derive(Debug, Default)]
pub struct NavigationEngine;

impl NavigationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn current_index(&self, container: &dyn ScrollContainer, len: usize) -> Option<usize> {
        active_index(container.scroll_top(), container.viewport_height(), len)
    }

    pub fn scroll_to_next(&self, container: &mut dyn ScrollContainer, len: usize) -> Option<usize> {
        self.step(container, len, Direction::Next)
    }

    pub fn scroll_to_prev(&self, container: &mut dyn ScrollContainer, len: usize) -> Option<usize> {
        self.step(container, len, Direction::Prev)
    }

    /// Handles a navigation key. Auto-repeat events are dropped so a held key
    /// moves one entry.
    pub fn handle_key(
        &self,
        press: KeyPress,
        container: &mut dyn ScrollContainer,
        len: usize,
    ) -> Option<usize> {
        if press.repeat {
            trace!(target: "feed.nav", key = ?press.key, "repeat_ignored");
            return None;
        }
        self.step(container, len, press.key.direction())
    }

    /// Jumps one entry in `direction`. Returns the new index, or `None` when
    /// the target equals the current entry and nothing was issued.
    pub fn step(
        &self,
        container: &mut dyn ScrollContainer,
        len: usize,
        direction: Direction,
    ) -> Option<usize> {
        let current = self.current_index(container, len)?;
        let target = match direction {
            Direction::Next => (current + 1).min(len - 1),
            Direction::Prev => current.saturating_sub(1),
        };
        if target == current {
            return None;
        }
        let top = entry_top(target, container.viewport_height());
        trace!(target: "feed.nav", from = current, to = target, top, "jump");
        container.jump_to(top);
        Some(target)
    }
}

/// Plain scroll state for hosts without a native scroll element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollRoot {
    scroll_top: f64,
    viewport_height: f64,
}

impl ScrollRoot {
    pub fn new(viewport_height: f64) -> Self {
        Self {
            scroll_top: 0.0,
            viewport_height: viewport_height.max(0.0),
        }
    }

    /// Resizes while keeping the current entry at the top.
    pub fn resize(&mut self, viewport_height: f64, len: usize) {
        let index = active_index(self.scroll_top, self.viewport_height, len).unwrap_or(0);
        self.viewport_height = viewport_height.max(0.0);
        self.scroll_top = entry_top(index, self.viewport_height);
    }

    /// Free scrolling (wheel, trackpad), clamped to the content.
    pub fn scroll_by(&mut self, delta: f64, len: usize) {
        let max_top = entry_top(len.saturating_sub(1), self.viewport_height);
        self.scroll_top = (self.scroll_top + delta).clamp(0.0, max_top);
    }

    /// Mandatory snap: settles on the entry closest to the current offset.
    pub fn snap(&mut self, len: usize) -> bool {
        if len == 0 || self.viewport_height <= 0.0 {
            return false;
        }
        let nearest = (self.scroll_top / self.viewport_height).round().max(0.0) as usize;
        let top = entry_top(nearest.min(len - 1), self.viewport_height);
        if (top - self.scroll_top).abs() < f64::EPSILON {
            return false;
        }
        self.scroll_top = top;
        true
    }

    pub fn is_snapped(&self) -> bool {
        self.viewport_height <= 0.0 || (self.scroll_top % self.viewport_height).abs() < f64::EPSILON
    }
}

impl ScrollContainer for ScrollRoot {
    fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn jump_to(&mut self, top: f64) {
        self.scroll_top = top.max(0.0);
    }
}
