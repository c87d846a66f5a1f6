use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::Entry;

const DEFAULT_ENV_PREFIX: &str = "SNAPFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub engage: EngageConfig,
    #[serde(default)]
    pub cdn: CdnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Empty means the fallback list is served locally.
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_prefetch_margin")]
    pub prefetch_margin: f64,
    #[serde(default)]
    pub fallback: Vec<Entry>,
    /// Raw JSON array that replaces `fallback` when set (env only).
    #[serde(skip)]
    pub fallback_json: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            timeout: default_fetch_timeout(),
            page_size: default_page_size(),
            prefetch_margin: default_prefetch_margin(),
            fallback: Vec::new(),
            fallback_json: None,
        }
    }
}

fn default_fetch_timeout() -> Duration {
    crate::data::DEFAULT_FETCH_TIMEOUT
}

fn default_page_size() -> usize {
    2
}

fn default_prefetch_margin() -> f64 {
    crate::sentinel::DEFAULT_PREFETCH_MARGIN
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_active_threshold")]
    pub active_threshold: f64,
    #[serde(default = "default_start_muted")]
    pub start_muted: bool,
    #[serde(default = "default_latency_target", with = "humantime_serde")]
    pub latency_target: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            active_threshold: default_active_threshold(),
            start_muted: default_start_muted(),
            latency_target: default_latency_target(),
        }
    }
}

fn default_active_threshold() -> f64 {
    crate::visibility::ACTIVE_THRESHOLD
}

fn default_start_muted() -> bool {
    true
}

fn default_latency_target() -> Duration {
    Duration::from_millis(300)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            mpv_path: default_mpv_path(),
            fullscreen: false,
        }
    }
}

fn default_mpv_path() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngageConfig {
    /// Empty disables engagement reporting.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CdnConfig {
    #[serde(default = "default_cloud_name")]
    pub cloudinary_cloud_name: String,
    #[serde(default = "default_mux_base")]
    pub mux_base: String,
    #[serde(default = "default_cloudinary_base")]
    pub cloudinary_base: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            cloudinary_cloud_name: default_cloud_name(),
            mux_base: default_mux_base(),
            cloudinary_base: default_cloudinary_base(),
        }
    }
}

fn default_cloud_name() -> String {
    "demo".into()
}

fn default_mux_base() -> String {
    crate::resolve::MUX_HLS_BASE.into()
}

fn default_cloudinary_base() -> String {
    crate::resolve::CLOUDINARY_BASE.into()
}

impl CdnConfig {
    pub fn resolver(&self) -> crate::resolve::Resolver {
        crate::resolve::Resolver {
            mux_base: self.mux_base.clone(),
            cloudinary_base: self.cloudinary_base.clone(),
            cloudinary_cloud_name: self.cloudinary_cloud_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.feed.api_url.is_empty() {
        base.feed.api_url = other.feed.api_url;
    }
    if !other.feed.timeout.is_zero() {
        base.feed.timeout = other.feed.timeout;
    }
    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }
    if other.feed.prefetch_margin >= 0.0 {
        base.feed.prefetch_margin = other.feed.prefetch_margin;
    }
    if !other.feed.fallback.is_empty() {
        base.feed.fallback = other.feed.fallback;
    }

    if other.playback.active_threshold > 0.0 && other.playback.active_threshold <= 1.0 {
        base.playback.active_threshold = other.playback.active_threshold;
    }
    base.playback.start_muted = other.playback.start_muted;
    if !other.playback.latency_target.is_zero() {
        base.playback.latency_target = other.playback.latency_target;
    }

    if !other.player.mpv_path.is_empty() {
        base.player.mpv_path = other.player.mpv_path;
    }
    base.player.fullscreen = other.player.fullscreen;

    if !other.engage.url.is_empty() {
        base.engage.url = other.engage.url;
    }

    if !other.cdn.cloudinary_cloud_name.is_empty() {
        base.cdn.cloudinary_cloud_name = other.cdn.cloudinary_cloud_name;
    }
    if !other.cdn.mux_base.is_empty() {
        base.cdn.mux_base = other.cdn.mux_base;
    }
    if !other.cdn.cloudinary_base.is_empty() {
        base.cdn.cloudinary_base = other.cdn.cloudinary_base;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feed.api_url" => cfg.feed.api_url = value,
        "feed.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                if !duration.is_zero() {
                    cfg.feed.timeout = duration;
                }
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                if parsed > 0 {
                    cfg.feed.page_size = parsed;
                }
            }
        }
        "feed.prefetch_margin" => {
            if let Ok(parsed) = value.parse::<f64>() {
                if parsed >= 0.0 {
                    cfg.feed.prefetch_margin = parsed;
                }
            }
        }
        "feed.fallback" => cfg.feed.fallback_json = Some(value),
        "playback.active_threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                if parsed > 0.0 && parsed <= 1.0 {
                    cfg.playback.active_threshold = parsed;
                }
            }
        }
        "playback.start_muted" => cfg.playback.start_muted = parse_bool(&value),
        "playback.latency_target" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                if !duration.is_zero() {
                    cfg.playback.latency_target = duration;
                }
            }
        }
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.fullscreen" => cfg.player.fullscreen = parse_bool(&value),
        "engage.url" => cfg.engage.url = value,
        "cdn.cloudinary_cloud_name" => cfg.cdn.cloudinary_cloud_name = value,
        "cdn.mux_base" => cfg.cdn.mux_base = value,
        "cdn.cloudinary_base" => cfg.cdn.cloudinary_base = value,
        _ => {}
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("snapfeed").join("config.yaml"))
}
