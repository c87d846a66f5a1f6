use std::io::{self, Stdout};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyboardEnhancementFlags, MouseEvent, MouseEventKind, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, window_size,
    EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::{debug, info};
use unicode_width::UnicodeWidthStr;

use crate::coordinator::{FeedCoordinator, FeedEvent};
use crate::data::EngageAction;
use crate::navigation::{KeyPress, NavKey};
use crate::pagination::LoadMode;
use crate::playback::PlaybackState;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_HEART: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const RETENTION_TOAST: &str = "🎉 10+ videos this session";
const RETENTION_TOAST_DURATION: Duration = Duration::from_secs(3);
const ENGAGE_TOAST_DURATION: Duration = Duration::from_secs(2);
const HEART_FLASH_DURATION: Duration = Duration::from_millis(600);
const SCROLL_HINT_DURATION: Duration = Duration::from_secs(5);
/// Share of a viewport one wheel notch scrolls.
const WHEEL_FRACTION: f64 = 0.25;
/// Wheel silence after which the feed snaps to the nearest entry.
const SNAP_IDLE: Duration = Duration::from_millis(150);
/// Rows taken by the status line and the footer.
const CHROME_ROWS: u16 = 2;
/// Without key event types, the same nav key arriving this soon after the
/// previous one is taken as terminal auto-repeat.
const AUTO_REPEAT_WINDOW: Duration = Duration::from_millis(100);

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// Pixel height of one terminal row, or 1 when the terminal won't say.
fn cell_height() -> f64 {
    static HEIGHT: OnceLock<f64> = OnceLock::new();
    *HEIGHT.get_or_init(|| {
        window_size().ok().map_or(1.0, |size| {
            let rows = size.rows.max(1) as f64;
            if size.height > 0 {
                f64::from(size.height) / rows
            } else {
                1.0
            }
        })
    })
}

struct Toast {
    text: String,
    until: Instant,
}

pub struct Options {
    pub coordinator: FeedCoordinator,
    pub status_message: String,
    pub config_path: String,
}

pub struct Model {
    feed: FeedCoordinator,
    status_message: String,
    config_path: String,
    spinner: Spinner,
    needs_redraw: bool,
    cell_height: f64,
    toast: Option<Toast>,
    heart_until: Option<Instant>,
    hint_until: Instant,
    last_wheel: Option<Instant>,
    key_event_types: bool,
    last_nav: Option<(NavKey, Instant)>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        Self {
            feed: opts.coordinator,
            status_message: opts.status_message,
            config_path: opts.config_path,
            spinner: Spinner::new(),
            needs_redraw: true,
            cell_height: 1.0,
            toast: None,
            heart_until: None,
            hint_until: Instant::now() + SCROLL_HINT_DURATION,
            last_wheel: None,
            key_event_types: false,
            last_nav: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        // Distinguishes held-key repeats from fresh presses where supported.
        let enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
        if enhanced {
            stdout.execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
        }
        self.key_event_types = enhanced;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.cell_height = cell_height();
        let size = terminal.size()?;
        self.feed.mount(self.viewport_height(size.height));

        let result = self.event_loop(&mut terminal);

        self.feed.teardown();
        if enhanced {
            terminal.backend_mut().execute(PopKeyboardEnhancementFlags)?;
        }
        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_feed(Instant::now()) {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) => {
                        if self.handle_key(key) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, rows) => {
                        self.feed.resize(self.viewport_height(rows));
                        self.mark_dirty();
                    }
                    _ => {}
                }
            }

            if self.settle_wheel(Instant::now()) {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.tick(last_tick) {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn viewport_height(&self, terminal_rows: u16) -> f64 {
        f64::from(terminal_rows.saturating_sub(CHROME_ROWS)) * self.cell_height
    }

    /// Applies resolved work from the coordinator. Returns whether anything changed.
    fn poll_feed(&mut self, now: Instant) -> bool {
        let events = self.feed.poll(now);
        let changed = !events.is_empty();
        for event in events {
            match event {
                FeedEvent::PageLoaded { mode, added } => {
                    if mode == LoadMode::Initial {
                        self.status_message = format!("Loaded {added} videos");
                    }
                }
                FeedEvent::PageFailed {
                    mode: LoadMode::Initial,
                    error,
                } => {
                    self.status_message = format!("Couldn't load videos: {error}");
                }
                FeedEvent::PageFailed { .. } => {
                    self.status_message = "End of feed".to_string();
                }
                FeedEvent::RetentionGoal { views } => {
                    info!(target: "feed.retention", views, "retention_toast");
                    self.toast = Some(Toast {
                        text: RETENTION_TOAST.to_string(),
                        until: now + RETENTION_TOAST_DURATION,
                    });
                }
                FeedEvent::EngageFailed { action, .. } => {
                    let verb = match action {
                        EngageAction::Like => "like",
                        EngageAction::Unlike => "unlike",
                    };
                    self.toast = Some(Toast {
                        text: format!("Couldn't save {verb}"),
                        until: now + ENGAGE_TOAST_DURATION,
                    });
                }
                FeedEvent::FirstFrame { .. } => {}
            }
        }
        changed
    }

    fn tick(&mut self, now: Instant) -> bool {
        let mut ticked = false;
        if self.feed.is_loading() || self.feed.is_loading_more() {
            ticked = self.spinner.advance();
        } else {
            self.spinner.reset();
        }
        if self.toast.as_ref().is_some_and(|toast| now >= toast.until) {
            self.toast = None;
            ticked = true;
        }
        if self.heart_until.is_some_and(|until| now >= until) {
            self.heart_until = None;
            ticked = true;
        }
        if now >= self.hint_until && now < self.hint_until + Duration::from_millis(200) {
            ticked = true;
        }
        ticked
    }

    /// Returns true when the app should quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        self.handle_key_at(key, Instant::now())
    }

    fn handle_key_at(&mut self, key: KeyEvent, now: Instant) -> bool {
        let mut repeat = match key.kind {
            KeyEventKind::Press => false,
            KeyEventKind::Repeat => true,
            KeyEventKind::Release => return false,
        };
        let nav = match key.code {
            KeyCode::Down | KeyCode::Char('j') => Some(NavKey::Down),
            KeyCode::PageDown => Some(NavKey::PageDown),
            KeyCode::Up | KeyCode::Char('k') => Some(NavKey::Up),
            KeyCode::PageUp => Some(NavKey::PageUp),
            _ => None,
        };
        if let Some(key) = nav {
            if !self.key_event_types {
                // Auto-repeat shows up as a stream of presses here.
                repeat |= self.last_nav.is_some_and(|(last, at)| {
                    last == key && now.saturating_duration_since(at) < AUTO_REPEAT_WINDOW
                });
                self.last_nav = Some((key, now));
            }
            if self.feed.handle_key(KeyPress { key, repeat }).is_some() {
                self.hint_until = now;
                self.mark_dirty();
            }
            return false;
        }
        self.last_nav = None;
        if repeat {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('m') => {
                let muted = self.feed.toggle_mute();
                self.status_message = if muted { "Muted" } else { "Sound on" }.to_string();
                self.mark_dirty();
            }
            KeyCode::Char('l') => {
                if let Some(action) = self.feed.toggle_like() {
                    if action == EngageAction::Like {
                        self.heart_until = Some(Instant::now() + HEART_FLASH_DURATION);
                    }
                    self.mark_dirty();
                }
            }
            KeyCode::Char('r') => {
                if self.feed.error().is_some() && !self.feed.is_loading() {
                    debug!(target: "feed.pagination", "retry_requested");
                    self.status_message = "Retrying…".to_string();
                    self.feed.retry();
                    self.mark_dirty();
                }
            }
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        let step = self.feed.viewport_height() * WHEEL_FRACTION;
        match event.kind {
            MouseEventKind::ScrollDown => self.feed.scroll_by(step),
            MouseEventKind::ScrollUp => self.feed.scroll_by(-step),
            _ => return,
        }
        self.last_wheel = Some(Instant::now());
        self.hint_until = Instant::now();
        self.mark_dirty();
    }

    /// Snaps once the wheel has been idle for a moment.
    fn settle_wheel(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_wheel else {
            return false;
        };
        if now.saturating_duration_since(last) < SNAP_IDLE {
            return false;
        }
        self.last_wheel = None;
        self.feed.snap()
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_line = Paragraph::new(self.status_text()).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        let body = layout[1];
        if self.feed.is_empty() {
            if self.feed.is_loading() || !self.feed.is_mounted() {
                self.draw_loading(frame, body);
            } else if let Some(err) = self.feed.error() {
                let message = err.to_string();
                self.draw_error(frame, body, &message);
            } else {
                self.draw_empty(frame, body);
            }
        } else {
            let body = match self.feed.error() {
                Some(err) => {
                    let message = err.to_string();
                    self.draw_error_banner(frame, body, &message)
                }
                None => body,
            };
            self.draw_entry(frame, body);
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if let Some(toast) = &self.toast {
            draw_toast(frame, body, &toast.text);
        }
    }

    fn status_text(&self) -> String {
        let mut parts = vec!["snapfeed".to_string()];
        if let Some(index) = self.feed.active_index() {
            parts.push(format!("{}/{}", index + 1, self.feed.len()));
        }
        parts.push(if self.feed.is_muted() { "🔇 muted" } else { "🔊 sound" }.to_string());
        if self.feed.is_loading_more() {
            parts.push(format!("{} loading more", self.spinner.frame()));
        } else if !self.feed.is_empty() && !self.feed.has_more() {
            parts.push("end of feed".to_string());
        }
        if let Some(latency) = self.feed.last_latency() {
            parts.push(format!("start {}ms", latency.as_millis()));
        }
        if !self.status_message.is_empty() {
            parts.push(self.status_message.clone());
        }
        parts.join(" · ")
    }

    fn footer_text(&self) -> String {
        if Instant::now() < self.hint_until && self.feed.len() > 1 {
            return "↓ / j for the next video".to_string();
        }
        let mut text = "j/k next/prev · m mute · l like · q quit".to_string();
        if self.feed.error().is_some() {
            text.push_str(" · r retry");
        }
        text
    }

    fn draw_loading(&self, frame: &mut Frame<'_>, area: Rect) {
        let text = format!("{} Loading videos…", self.spinner.frame());
        let paragraph = Paragraph::new(text)
            .style(Style::default().fg(COLOR_ACCENT))
            .alignment(Alignment::Center);
        frame.render_widget(paragraph, center_line(area));
    }

    fn draw_empty(&self, frame: &mut Frame<'_>, area: Rect) {
        let lines = vec![
            Line::from(Span::styled(
                "No videos yet",
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!("Configure a feed in {}", self.config_path),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        let paragraph = Paragraph::new(lines).alignment(Alignment::Center);
        frame.render_widget(paragraph, center_block(area, 2));
    }

    fn draw_error(&self, frame: &mut Frame<'_>, area: Rect, message: &str) {
        let lines = vec![
            Line::from(Span::styled(
                "Couldn't load videos",
                Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                message.to_string(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::default(),
            Line::from(Span::styled(
                "[ r ] Retry",
                Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
            )),
        ];
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, center_block(area, 4));
    }

    /// Draws a one-line error banner and returns the area left below it.
    fn draw_error_banner(&self, frame: &mut Frame<'_>, area: Rect, message: &str) -> Rect {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(area);
        let banner = Paragraph::new(format!("Offline feed: {message} · r to retry"))
            .style(Style::default().fg(COLOR_BG).bg(COLOR_ERROR));
        frame.render_widget(banner, chunks[0]);
        chunks[1]
    }

    fn draw_entry(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(index) = self.feed.active_index() else {
            return;
        };
        let Some(entry) = self.feed.entries().get(index) else {
            return;
        };
        let active = self.feed.is_entry_active(index);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if active {
                COLOR_BORDER_FOCUSED
            } else {
                COLOR_BORDER_IDLE
            }))
            .padding(Padding::horizontal(1))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let width = inner.width.max(1) as usize;
        let mut lines = Vec::new();
        let state = self.feed.playback_state(index).unwrap_or(PlaybackState::Idle);
        lines.push(Line::from(Span::styled(
            playback_label(state, self.feed.is_snapped()),
            Style::default().fg(match state {
                PlaybackState::Unavailable => COLOR_ERROR,
                PlaybackState::Playing => COLOR_SUCCESS,
                _ => COLOR_TEXT_SECONDARY,
            }),
        )));
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            truncate(&entry.meta.username, width),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        )));
        for row in wrap(&entry.meta.description, WrapOptions::new(width)) {
            lines.push(Line::from(Span::styled(
                row.into_owned(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        lines.push(Line::default());
        let liked = self.feed.is_liked(&entry.id);
        lines.push(Line::from(vec![
            Span::styled(
                if liked { "♥ liked" } else { "♡ like" },
                Style::default().fg(if liked { COLOR_HEART } else { COLOR_TEXT_SECONDARY }),
            ),
            Span::raw("   "),
            Span::styled(
                if self.feed.is_muted() { "🔇" } else { "🔊" },
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ]));

        let paragraph = Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false });
        frame.render_widget(paragraph, inner);

        if self.heart_until.is_some_and(|until| Instant::now() < until) {
            let heart = Paragraph::new(Span::styled(
                "♥",
                Style::default().fg(COLOR_HEART).add_modifier(Modifier::BOLD),
            ))
            .alignment(Alignment::Center);
            frame.render_widget(heart, center_line(inner));
        }
    }
}

fn draw_toast(frame: &mut Frame<'_>, area: Rect, text: &str) {
    let width = (UnicodeWidthStr::width(text) as u16 + 4).min(area.width);
    let rect = Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(3),
        width,
        height: 3.min(area.height),
    };
    frame.render_widget(Clear, rect);
    let toast = Paragraph::new(text.to_string())
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT)),
        )
        .style(Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_PANEL_FOCUSED_BG));
    frame.render_widget(toast, rect);
}

fn playback_label(state: PlaybackState, snapped: bool) -> &'static str {
    match state {
        PlaybackState::Unavailable => "Video unavailable",
        PlaybackState::Playing => "▶ Playing",
        PlaybackState::Paused if snapped => "❚❚ Paused",
        PlaybackState::Paused | PlaybackState::Idle => "…",
    }
}

fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn center_line(area: Rect) -> Rect {
    center_block(area, 1)
}

fn center_block(area: Rect, height: u16) -> Rect {
    let height = height.min(area.height);
    Rect {
        x: area.x,
        y: area.y + area.height.saturating_sub(height) / 2,
        width: area.width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crossbeam_channel::unbounded;
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;

    use crate::coordinator::{Collaborators, CoordinatorOptions};
    use crate::data::{FetchError, MockEngagementSink, MockFeedSource};
    use crate::feed::{Entry, FeedPage};
    use crate::playback::RecordingFactory;
    use crate::resolve::Resolver;
    use crate::retention::SessionRetention;

    fn model(script: Vec<Result<FeedPage, FetchError>>, fallback: Vec<Entry>) -> Model {
        model_with_sink(script, fallback, MockEngagementSink::default())
    }

    fn model_with_sink(
        script: Vec<Result<FeedPage, FetchError>>,
        fallback: Vec<Entry>,
        sink: MockEngagementSink,
    ) -> Model {
        let (_tx, rx) = unbounded();
        let coordinator = FeedCoordinator::new(
            Collaborators {
                source: Arc::new(MockFeedSource::new(script)),
                fallback,
                media: Box::new(RecordingFactory::default()),
                media_events: rx,
                engagement: Arc::new(sink),
                retention: SessionRetention::in_memory(),
                resolver: Resolver::default(),
            },
            CoordinatorOptions::default(),
        );
        let mut model = Model::new(Options {
            coordinator,
            status_message: String::new(),
            config_path: "config.yaml".into(),
        });
        model.feed.mount(400.0);
        model.feed.wait_for_page(Duration::from_secs(5));
        model
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn render(model: &mut Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(60, 16)).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>()
    }

    fn page(ids: &[&str]) -> Result<FeedPage, FetchError> {
        Ok(FeedPage {
            entries: ids
                .iter()
                .map(|id| Entry::new(*id, format!("https://x/{id}.mp4"), "@user", "clip"))
                .collect(),
            next_cursor: None,
        })
    }

    #[test]
    fn keys_drive_navigation_mute_and_quit() {
        let mut model = model(vec![page(&["a", "b"])], Vec::new());
        assert!(!model.handle_key(press(KeyCode::Char('j'))));
        assert_eq!(model.feed.active_index(), Some(1));

        let mut held = press(KeyCode::Char('k'));
        held.kind = KeyEventKind::Repeat;
        model.handle_key(held);
        assert_eq!(model.feed.active_index(), Some(1));

        assert!(model.feed.is_muted());
        model.handle_key(press(KeyCode::Char('m')));
        assert!(!model.feed.is_muted());

        assert!(model.handle_key(press(KeyCode::Char('q'))));
    }

    #[test]
    fn rapid_presses_without_event_types_move_once() {
        let mut model = model(vec![page(&["a", "b", "c"])], Vec::new());
        let start = Instant::now();
        model.handle_key_at(press(KeyCode::Down), start);
        model.handle_key_at(press(KeyCode::Down), start + Duration::from_millis(30));
        model.handle_key_at(press(KeyCode::Down), start + Duration::from_millis(60));
        assert_eq!(model.feed.active_index(), Some(1));

        model.handle_key_at(press(KeyCode::Down), start + Duration::from_millis(400));
        assert_eq!(model.feed.active_index(), Some(2));
    }

    #[test]
    fn error_screen_offers_retry() {
        let mut model = model(
            vec![Err(FetchError::Transport("Network failed".into()))],
            Vec::new(),
        );
        let screen = render(&mut model);
        assert!(screen.contains("Couldn't load videos"));
        assert!(screen.contains("Network failed"));
        assert!(screen.contains("Retry"));
    }

    #[test]
    fn fallback_feed_shows_banner_and_entry() {
        let fallback = vec![Entry::new("f1", "https://x/f1.mp4", "@fallback", "offline clip")];
        let mut model = model(
            vec![Err(FetchError::Transport("Network failed".into()))],
            fallback,
        );
        let screen = render(&mut model);
        assert!(screen.contains("Offline feed"));
        assert!(screen.contains("@fallback"));
    }

    #[test]
    fn like_flashes_heart() {
        let mut model = model(vec![page(&["a"])], Vec::new());
        model.handle_key(press(KeyCode::Char('l')));
        assert!(model.heart_until.is_some());
        assert!(model.feed.is_liked("a"));
    }

    #[test]
    fn failed_like_shows_toast() {
        let mut model = model_with_sink(
            vec![page(&["a"])],
            Vec::new(),
            MockEngagementSink::failing(),
        );
        model.handle_key(press(KeyCode::Char('l')));
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.toast.is_none() && Instant::now() < deadline {
            model.poll_feed(Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
        let toast = model.toast.as_ref().map(|toast| toast.text.clone());
        assert_eq!(toast.as_deref(), Some("Couldn't save like"));
        assert!(render(&mut model).contains("Couldn't save like"));
    }

    #[test]
    fn toast_expires_on_tick() {
        let mut model = model(vec![page(&["a"])], Vec::new());
        model.poll_feed(Instant::now());
        assert!(model.toast.is_none());
        model.toast = Some(Toast {
            text: RETENTION_TOAST.into(),
            until: Instant::now(),
        });
        assert!(model.tick(Instant::now() + Duration::from_millis(1)));
        assert!(model.toast.is_none());
    }

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate("@short", 10), "@short");
        assert_eq!(truncate("@averyverylongname", 6), "@aver…");
    }
}
