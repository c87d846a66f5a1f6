use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::unbounded;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::coordinator::{Collaborators, CoordinatorOptions, FeedCoordinator};
use crate::data::{
    EngagementSink, FeedSource, HttpEngagementSink, HttpFeedSource, NoopEngagementSink,
    StaticFeedSource,
};
use crate::fallback;
use crate::logging;
use crate::retention::{SessionRetention, StoreViewCounter};
use crate::storage;
use crate::ui;
use crate::video::{self, MpvFactory, PlayerSettings};

/// Session rows older than this are dropped at startup.
const SESSION_KEEP_DAYS: i64 = 30;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let _log_guard = match logging::default_dir() {
        Some(dir) => logging::init(&dir).context("init logging")?,
        None => None,
    };

    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let config_path = opts.config_file.or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());

    if let Err(err) = video::probe(&cfg.player.mpv_path) {
        warn!(target: "player.mpv", %err, "mpv_unavailable");
    }

    let (retention, store) = open_retention(storage::Options::default());

    let fallback = fallback::resolve(&cfg.feed.fallback, cfg.feed.fallback_json.as_deref());
    let (source, status) = feed_source(&cfg, &fallback)?;
    let engagement = engagement_sink(&cfg)?;

    let (media_tx, media_rx) = unbounded();
    let media = MpvFactory::new(
        PlayerSettings {
            mpv_path: cfg.player.mpv_path.clone(),
            fullscreen: cfg.player.fullscreen,
        },
        media_tx,
    );

    let coordinator = FeedCoordinator::new(
        Collaborators {
            source,
            fallback,
            media: Box::new(media),
            media_events: media_rx,
            engagement,
            retention,
            resolver: cfg.cdn.resolver(),
        },
        coordinator_options(&cfg),
    );

    let mut model = ui::Model::new(ui::Options {
        coordinator,
        status_message: status,
        config_path: display_path,
    });
    model.run()?;
    drop(model);

    if let Some(store) = store {
        match Arc::try_unwrap(store) {
            Ok(store) => store.close()?,
            Err(_) => warn!(target: "feed.retention", "store_still_shared_on_exit"),
        }
    }
    Ok(())
}

/// Opens the view-count store and prunes old sessions. A store that cannot be
/// opened is not fatal; views are then counted in memory for this run.
fn open_retention(opts: storage::Options) -> (SessionRetention, Option<Arc<storage::Store>>) {
    let store = match storage::Store::open(opts) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(target: "feed.retention", err = %format!("{err:#}"), "store_unavailable");
            return (SessionRetention::in_memory(), None);
        }
    };
    let cutoff = Utc::now() - chrono::Duration::days(SESSION_KEEP_DAYS);
    match store.prune_sessions(cutoff) {
        Ok(removed) if removed > 0 => {
            info!(target: "feed.retention", removed, "sessions_pruned");
        }
        Ok(_) => {}
        Err(err) => warn!(target: "feed.retention", err = %format!("{err:#}"), "prune_failed"),
    }
    let counter = StoreViewCounter::new_session(store.clone());
    info!(target: "feed.retention", session = counter.session_id(), "session_started");
    (SessionRetention::new(Box::new(counter)), Some(store))
}

fn coordinator_options(cfg: &Config) -> CoordinatorOptions {
    CoordinatorOptions {
        active_threshold: cfg.playback.active_threshold,
        prefetch_margin: cfg.feed.prefetch_margin,
        start_muted: cfg.playback.start_muted,
        latency_target: cfg.playback.latency_target,
        fetch_timeout: cfg.feed.timeout,
    }
}

type Source = Arc<dyn FeedSource + Send + Sync>;

/// The configured API, or the fallback list paged locally when none is set.
fn feed_source(cfg: &Config, fallback: &[crate::feed::Entry]) -> Result<(Source, String)> {
    let api_url = cfg.feed.api_url.trim();
    if api_url.is_empty() {
        info!(target: "feed.pagination", entries = fallback.len(), "serving_fallback_feed");
        let source: Source = Arc::new(StaticFeedSource::new(
            fallback.to_vec(),
            cfg.feed.page_size,
        ));
        return Ok((source, "Demo feed".to_string()));
    }
    let source: Source = Arc::new(
        HttpFeedSource::new(api_url, cfg.feed.timeout).context("create feed client")?,
    );
    Ok((source, String::new()))
}

fn engagement_sink(cfg: &Config) -> Result<Arc<dyn EngagementSink + Send + Sync>> {
    let url = cfg.engage.url.trim();
    if url.is_empty() {
        return Ok(Arc::new(NoopEngagementSink));
    }
    Ok(Arc::new(
        HttpEngagementSink::new(url).context("create engagement client")?,
    ))
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/snapfeed/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_url_serves_fallback_locally() {
        let cfg = Config::default();
        let fallback = fallback::default_entries();
        let (source, status) = feed_source(&cfg, &fallback).unwrap();
        assert_eq!(status, "Demo feed");
        let page = source.fetch_page(None).unwrap();
        assert_eq!(page.entries.len(), cfg.feed.page_size);
        assert!(page.next_cursor.is_some());
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = Config::default();
        cfg.playback.start_muted = false;
        cfg.feed.prefetch_margin = 50.0;
        let opts = coordinator_options(&cfg);
        assert!(!opts.start_muted);
        assert_eq!(opts.prefetch_margin, 50.0);
    }

    #[test]
    fn unwritable_store_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let (mut retention, store) = open_retention(storage::Options {
            path: Some(blocker.join("snapfeed").join("state.db")),
        });
        assert!(store.is_none());
        retention.record_view("a");
        assert_eq!(retention.views(), 1);
    }

    #[test]
    fn startup_prunes_stale_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let seeded = storage::Store::open(storage::Options {
            path: Some(path.clone()),
        })
        .unwrap();
        seeded.increment_session_views("old").unwrap();
        seeded.close().unwrap();
        let stale = Utc::now() - chrono::Duration::days(SESSION_KEEP_DAYS + 1);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE session_views SET updated_at = ?1 WHERE session_id = 'old'",
            rusqlite::params![stale.timestamp()],
        )
        .unwrap();
        drop(conn);

        let (_retention, store) = open_retention(storage::Options { path: Some(path) });
        let store = store.unwrap();
        assert!(store.session_views("old").unwrap().is_none());
    }

    #[test]
    fn friendly_path_without_config() {
        assert_eq!(friendly_path(None), "~/.config/snapfeed/config.yaml");
    }
}
