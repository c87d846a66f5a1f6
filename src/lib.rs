#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod fallback;
pub mod feed;
pub mod logging;
pub mod mute;
pub mod navigation;
pub mod pagination;
pub mod playback;
pub mod resolve;
pub mod retention;
pub mod sentinel;
pub mod storage;
pub mod ui;
pub mod video;
pub mod visibility;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use coordinator::{Collaborators, CoordinatorOptions, FeedCoordinator, FeedEvent};
