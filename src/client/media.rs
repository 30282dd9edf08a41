//! Video link parsing and title lookup for submissions.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Title used when the lookup fails or times out
pub const FALLBACK_TITLE: &str = "Mystery track";

const NOEMBED_ENDPOINT: &str = "https://noembed.com/embed";
const VIDEO_ID_LEN: usize = 11;

/// A playable video reference extracted from a user-entered link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// The link as entered
    pub url: String,
    pub video_id: String,
    pub start_offset_seconds: u32,
}

impl SourceRef {
    /// Parse a link. A positive `manual_start` wins over an offset embedded
    /// in the link (`t=` or `start=`).
    pub fn parse(raw: &str, manual_start: u32) -> Result<Self, ClientError> {
        let video_id =
            extract_video_id(raw).ok_or_else(|| ClientError::InvalidSourceUrl(raw.to_string()))?;
        let start_offset_seconds = if manual_start > 0 {
            manual_start
        } else {
            extract_timecode(raw)
        };
        Ok(Self {
            url: raw.trim().to_string(),
            video_id,
            start_offset_seconds,
        })
    }

    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

fn parse_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        Url::parse(trimmed).ok()
    } else {
        Url::parse(&format!("https://{trimmed}")).ok()
    }
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extract the 11-character video id from the usual link shapes:
/// `youtu.be/ID`, `/watch?v=ID`, `/embed/ID`, `/v/ID` and `/shorts/ID`
pub fn extract_video_id(raw: &str) -> Option<String> {
    let url = parse_url(raw)?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .or_else(|| host.strip_prefix("music."))
        .unwrap_or(&host);

    let query_v = || {
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    };

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let candidate = match host {
        "youtu.be" => segments.first().map(|s| s.to_string()),
        "youtube.com" | "youtube-nocookie.com" => match segments.as_slice() {
            ["embed" | "v" | "shorts" | "live", id, ..] => Some(id.to_string()),
            _ => query_v(),
        },
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Start offset in seconds from a `t` or `start` query parameter, 0 if absent
pub fn extract_timecode(raw: &str) -> u32 {
    let Some(url) = parse_url(raw) else {
        return 0;
    };
    url.query_pairs()
        .find(|(key, _)| key == "t" || key == "start")
        .map(|(_, value)| parse_timecode(&value))
        .unwrap_or(0)
}

/// Parse `90`, `90s`, `1m30s` or `1h2m3s`. A trailing bare number counts as
/// seconds. Anything else yields 0.
pub fn parse_timecode(raw: &str) -> u32 {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<u32>() {
        return seconds;
    }

    let mut total: u32 = 0;
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let Ok(n) = digits.parse::<u32>() else {
            return 0;
        };
        digits.clear();
        let unit = match c.to_ascii_lowercase() {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return 0,
        };
        total = total.saturating_add(n.saturating_mul(unit));
    }
    if let Ok(n) = digits.parse::<u32>() {
        total = total.saturating_add(n);
    }
    total
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Title request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response carried no title")]
    MissingTitle,
}

/// Resolves a human-readable title for a video link
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn lookup_title(&self, source_url: &str) -> Result<String, LookupError>;
}

/// oEmbed lookup through noembed.com
pub struct NoembedLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl NoembedLookup {
    pub fn new() -> Self {
        Self::with_endpoint(NOEMBED_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for NoembedLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct NoembedResponse {
    title: Option<String>,
}

#[async_trait]
impl TitleLookup for NoembedLookup {
    async fn lookup_title(&self, source_url: &str) -> Result<String, LookupError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", source_url)])
            .send()
            .await?
            .error_for_status()?;

        let body: NoembedResponse = response.json().await?;
        body.title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(LookupError::MissingTitle)
    }
}

/// Look up a title, falling back to [`FALLBACK_TITLE`] on error or timeout
pub async fn resolve_title(
    lookup: &dyn TitleLookup,
    source: &SourceRef,
    timeout: Duration,
) -> String {
    let url = source.canonical_url();
    match tokio::time::timeout(timeout, lookup.lookup_title(&url)).await {
        Ok(Ok(title)) => title,
        Ok(Err(e)) => {
            tracing::warn!("Title lookup for {} failed: {}", source.video_id, e);
            FALLBACK_TITLE.to_string()
        }
        Err(_) => {
            tracing::warn!("Title lookup for {} timed out", source.video_id);
            FALLBACK_TITLE.to_string()
        }
    }
}
