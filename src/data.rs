use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::feed::{Cursor, Entry, FeedPage, PageResponse};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const ENGAGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("feed API error: {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid response: {0}")]
    Malformed(String),
    #[error("feed request timed out after {}", format_timeout(.0))]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

pub trait FeedSource: Send + Sync {
    /// Fetches the page after `cursor`, or the first page when `cursor` is `None`.
    fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<FeedPage, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngageAction {
    Like,
    Unlike,
}

impl EngageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngageAction::Like => "like",
            EngageAction::Unlike => "unlike",
        }
    }
}

impl fmt::Display for EngageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngageError {
    #[error("engage API error: {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
}

pub trait EngagementSink: Send + Sync {
    fn engage(&self, entry_id: &str, action: EngageAction) -> Result<(), EngageError>;
}

pub struct HttpFeedSource {
    http: HttpClient,
    base_url: Url,
    timeout: Duration,
}

impl HttpFeedSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("feed: parse api url {base_url:?}"))?;
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("feed: build http client")?;
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    fn page_url(&self, cursor: Option<&Cursor>) -> Url {
        let mut url = self.base_url.clone();
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor.as_str());
        }
        url
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<FeedPage, FetchError> {
        let url = self.page_url(cursor);
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, format!("snapfeed/{}", crate::VERSION))
            .send()
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body = response.text().map_err(|err| self.transport_error(err))?;
        parse_page(&body)
    }
}

pub(crate) fn parse_page(body: &str) -> Result<FeedPage, FetchError> {
    let decoded: PageResponse = serde_json::from_str(body)
        .map_err(|err| FetchError::Malformed(format!("decode page: {err}")))?;
    decoded
        .into_page()
        .ok_or_else(|| FetchError::Malformed("missing videos array".to_string()))
}

/// Serves a fixed list in pages of `page_size`. The cursor is the offset of
/// the next page; ids are passed through untouched.
pub struct StaticFeedSource {
    entries: Vec<Entry>,
    page_size: usize,
}

impl StaticFeedSource {
    pub fn new(entries: Vec<Entry>, page_size: usize) -> Self {
        Self {
            entries,
            page_size: page_size.max(1),
        }
    }
}

impl FeedSource for StaticFeedSource {
    fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<FeedPage, FetchError> {
        let start = match cursor {
            None => 0,
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| FetchError::Malformed(format!("unknown cursor {cursor}")))?,
        };
        let start = start.min(self.entries.len());
        let end = (start + self.page_size).min(self.entries.len());
        let next_cursor = if end < self.entries.len() {
            Cursor::new(end.to_string())
        } else {
            None
        };
        Ok(FeedPage {
            entries: self.entries[start..end].to_vec(),
            next_cursor,
        })
    }
}

pub struct HttpEngagementSink {
    http: HttpClient,
    url: Url,
}

impl HttpEngagementSink {
    pub fn new(url: &str) -> Result<Self> {
        let url =
            Url::parse(url.trim()).with_context(|| format!("engage: parse url {url:?}"))?;
        let http = HttpClient::builder()
            .timeout(ENGAGE_TIMEOUT)
            .build()
            .context("engage: build http client")?;
        Ok(Self { http, url })
    }
}

#[derive(Deserialize)]
struct EngageErrorBody {
    error: Option<String>,
}

impl EngagementSink for HttpEngagementSink {
    fn engage(&self, entry_id: &str, action: EngageAction) -> Result<(), EngageError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({ "videoId": entry_id, "action": action.as_str() }))
            .send()
            .map_err(|err| EngageError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        let message = serde_json::from_str::<EngageErrorBody>(&text)
            .ok()
            .and_then(|body| body.error)
            .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| status.to_string());
        Err(EngageError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Used when no engagement endpoint is configured.
#[derive(Default)]
pub struct NoopEngagementSink;

impl EngagementSink for NoopEngagementSink {
    fn engage(&self, _entry_id: &str, _action: EngageAction) -> Result<(), EngageError> {
        Ok(())
    }
}

/// Scripted source for tests and demos: each call pops the next response.
/// Once the script runs out it keeps failing.
#[derive(Default)]
pub struct MockFeedSource {
    script: Mutex<Vec<Result<FeedPage, FetchError>>>,
    calls: Mutex<Vec<Option<Cursor>>>,
}

impl MockFeedSource {
    pub fn new(script: Vec<Result<FeedPage, FetchError>>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<FeedPage, FetchError>) {
        self.script.lock().insert(0, response);
    }

    pub fn calls(&self) -> Vec<Option<Cursor>> {
        self.calls.lock().clone()
    }
}

impl FeedSource for MockFeedSource {
    fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<FeedPage, FetchError> {
        self.calls.lock().push(cursor.cloned());
        self.script
            .lock()
            .pop()
            .unwrap_or_else(|| Err(FetchError::Transport("mock script exhausted".into())))
    }
}

#[derive(Default)]
pub struct MockEngagementSink {
    pub fail: bool,
    calls: Mutex<Vec<(String, EngageAction)>>,
}

impl MockEngagementSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, EngageAction)> {
        self.calls.lock().clone()
    }
}

impl EngagementSink for MockEngagementSink {
    fn engage(&self, entry_id: &str, action: EngageAction) -> Result<(), EngageError> {
        self.calls.lock().push((entry_id.to_string(), action));
        if self.fail {
            Err(EngageError::Transport("engage unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ids: &[&str]) -> Vec<Entry> {
        ids.iter()
            .map(|id| Entry::new(*id, format!("https://x/{id}.mp4"), "@u", "d"))
            .collect()
    }

    #[test]
    fn static_source_pages_with_opaque_cursor() {
        let source = StaticFeedSource::new(entries(&["a", "b", "c"]), 2);
        let first = source.fetch_page(None).unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.clone().unwrap();

        let second = source.fetch_page(Some(&cursor)).unwrap();
        let ids: Vec<_> = second.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn static_source_rejects_foreign_cursor() {
        let source = StaticFeedSource::new(entries(&["a"]), 2);
        let cursor = Cursor::new("page-two").unwrap();
        assert!(matches!(
            source.fetch_page(Some(&cursor)),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn parse_page_distinguishes_malformed_payloads() {
        assert_eq!(
            parse_page(r#"{"items":[]}"#),
            Err(FetchError::Malformed("missing videos array".into()))
        );
        assert!(matches!(parse_page("<html>"), Err(FetchError::Malformed(_))));

        let page = parse_page(
            r#"{"videos":[{"id":"a","src":"https://x/a.mp4","username":"@a","description":"A"}],"nextCursor":"n2"}"#,
        )
        .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next_cursor.unwrap().as_str(), "n2");
    }

    #[test]
    fn parse_page_keeps_items_missing_display_fields() {
        let page = parse_page(
            r#"{"videos":[
                {"id":"a","src":"https://x/a.mp4","username":"@a","description":"A"},
                {"id":"b","src":"https://x/b.mp4","username":"@b"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<_> = page.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn cursor_is_appended_as_query_param() {
        let source =
            HttpFeedSource::new("https://api.test/videos?region=eu", DEFAULT_FETCH_TIMEOUT).unwrap();
        let cursor = Cursor::new("a b&c").unwrap();
        let url = source.page_url(Some(&cursor));
        assert_eq!(
            url.as_str(),
            "https://api.test/videos?region=eu&cursor=a+b%26c"
        );
        assert_eq!(source.page_url(None).as_str(), "https://api.test/videos?region=eu");
    }

    #[test]
    fn transport_error_displays_bare_message() {
        let err = FetchError::Transport("Network failed".into());
        assert_eq!(err.to_string(), "Network failed");
        let err = FetchError::Timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "feed request timed out after 15s");
    }

    #[test]
    fn mock_source_replays_script_in_order() {
        let source = MockFeedSource::new(vec![
            Ok(FeedPage {
                entries: entries(&["a"]),
                next_cursor: Cursor::new("1"),
            }),
            Err(FetchError::Transport("boom".into())),
        ]);
        assert!(source.fetch_page(None).is_ok());
        assert!(source.fetch_page(Cursor::new("1").as_ref()).is_err());
        assert!(source.fetch_page(None).is_err());
        assert_eq!(source.calls().len(), 3);
    }
}
