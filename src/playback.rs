use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::feed::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    /// The media failed; the entry shows a placeholder from now on.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayError {
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("{0}")]
    Backend(String),
}

/// Control surface of one playable element.
pub trait MediaHandle {
    fn play(&mut self) -> Result<(), PlayError>;
    fn pause(&mut self);
    fn set_muted(&mut self, muted: bool);
}

/// Creates the media handle for an entry once it is laid out in the feed.
pub trait MediaFactory {
    fn create(&self, entry: &Entry, url: &str) -> Box<dyn MediaHandle>;
}

/// Asynchronous notifications coming back from a media backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub entry_id: String,
    pub kind: MediaEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    FirstFrame,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackReport {
    Latency { entry_id: String, elapsed: Duration },
    Viewed { entry_id: String },
}

pub struct PlaybackController {
    entry_id: String,
    handle: Box<dyn MediaHandle>,
    state: PlaybackState,
    started_at: Option<Instant>,
    reported: bool,
}

impl PlaybackController {
    pub fn new(entry_id: &str, handle: Box<dyn MediaHandle>) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            handle,
            state: PlaybackState::Idle,
            started_at: None,
            reported: false,
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Reacts to the visibility sensor. `muted` is the shared flag's current value.
    pub fn set_active(&mut self, active: bool, muted: bool, now: Instant) {
        if self.state == PlaybackState::Unavailable {
            return;
        }
        if active {
            if self.state == PlaybackState::Playing {
                return;
            }
            self.state = PlaybackState::Playing;
            self.started_at = Some(now);
            self.reported = false;
            self.handle.set_muted(muted);
            self.start();
        } else if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            self.started_at = None;
            self.handle.pause();
        }
    }

    /// Applies a mute flag change. Unmuting re-issues play in the same call so
    /// the start is attributed to the user input that caused it.
    pub fn apply_mute(&mut self, muted: bool) {
        if self.state == PlaybackState::Unavailable {
            return;
        }
        self.handle.set_muted(muted);
        if !muted && self.state == PlaybackState::Playing {
            self.start();
        }
    }

    /// First frame reached. Reports latency and a view once per activation.
    pub fn on_first_frame(&mut self, now: Instant) -> Vec<PlaybackReport> {
        if self.state != PlaybackState::Playing || self.reported {
            return Vec::new();
        }
        self.reported = true;
        let elapsed = self
            .started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        vec![
            PlaybackReport::Latency {
                entry_id: self.entry_id.clone(),
                elapsed,
            },
            PlaybackReport::Viewed {
                entry_id: self.entry_id.clone(),
            },
        ]
    }

    pub fn on_media_error(&mut self, message: &str) {
        if self.state == PlaybackState::Unavailable {
            return;
        }
        debug!(target: "feed.playback", entry = %self.entry_id, %message, "media_unavailable");
        if self.state == PlaybackState::Playing {
            self.handle.pause();
        }
        self.state = PlaybackState::Unavailable;
        self.started_at = None;
    }

    fn start(&mut self) {
        if let Err(err) = self.handle.play() {
            debug!(target: "feed.playback", entry = %self.entry_id, %err, "play_rejected");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Play(String),
    Pause(String),
    Mute(String, bool),
}

/// Media handle that records every call; handy for headless runs and tests.
pub struct RecordingMedia {
    entry_id: String,
    log: Arc<Mutex<Vec<MediaCall>>>,
    reject_play: bool,
}

impl MediaHandle for RecordingMedia {
    fn play(&mut self) -> Result<(), PlayError> {
        self.log.lock().push(MediaCall::Play(self.entry_id.clone()));
        if self.reject_play {
            Err(PlayError::Blocked("autoplay not allowed".into()))
        } else {
            Ok(())
        }
    }

    fn pause(&mut self) {
        self.log.lock().push(MediaCall::Pause(self.entry_id.clone()));
    }

    fn set_muted(&mut self, muted: bool) {
        self.log
            .lock()
            .push(MediaCall::Mute(self.entry_id.clone(), muted));
    }
}

#[derive(Default, Clone)]
pub struct RecordingFactory {
    log: Arc<Mutex<Vec<MediaCall>>>,
    pub reject_play: bool,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl MediaFactory for RecordingFactory {
    fn create(&self, entry: &Entry, _url: &str) -> Box<dyn MediaHandle> {
        Box::new(RecordingMedia {
            entry_id: entry.id.clone(),
            log: self.log.clone(),
            reject_play: self.reject_play,
        })
    }
}
