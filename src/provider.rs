//! Video metadata provider backed by the YouTube Data API v3.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::video_id::VideoId;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const THUMBNAIL_PREFERENCE: [&str; 5] = ["maxres", "high", "standard", "medium", "default"];

/// Current state of a video as reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMetadata {
    pub video_id: VideoId,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub publish_date: DateTime<Utc>,
    pub view_count: i64,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
}

/// Source of fresh video metadata. `Ok(None)` means the platform does not
/// know the id.
pub trait MetadataProvider {
    fn fetch(&self, video_id: &VideoId) -> TrackerResult<Option<FetchedMetadata>>;
}

pub struct YouTubeDataApi {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl YouTubeDataApi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl MetadataProvider for YouTubeDataApi {
    fn fetch(&self, video_id: &VideoId) -> TrackerResult<Option<FetchedMetadata>> {
        debug!(video_id = %video_id, "requesting videos.list");
        let response = self
            .agent
            .get(&format!("{}/videos", self.base_url))
            .query("part", "snippet,statistics")
            .query("id", video_id.as_str())
            .query("key", &self.api_key)
            .call();

        // ureq errors carry the full URL, which includes the key.
        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let reason = response.status_text().to_string();
                warn!(video_id = %video_id, code, "YouTube API rejected the request");
                return Err(TrackerError::metadata_unavailable(
                    video_id.as_str(),
                    format!("HTTP {code} {reason}"),
                ));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(TrackerError::metadata_unavailable(
                    video_id.as_str(),
                    format!("transport error: {}", transport.kind()),
                ));
            }
        };

        let body = response.into_string().map_err(|err| {
            TrackerError::metadata_unavailable(video_id.as_str(), format!("reading body: {err}"))
        })?;
        parse_videos_response(video_id, &body)
    }
}

/// Decodes a `videos.list` body into the metadata for `video_id`.
pub fn parse_videos_response(
    video_id: &VideoId,
    body: &str,
) -> TrackerResult<Option<FetchedMetadata>> {
    let unavailable = |reason: String| TrackerError::metadata_unavailable(video_id.as_str(), reason);

    let response: VideoListResponse =
        serde_json::from_str(body).map_err(|err| unavailable(format!("decoding response: {err}")))?;
    let Some(item) = response
        .items
        .into_iter()
        .find(|item| item.id.as_deref().is_none_or(|id| id == video_id.as_str()))
    else {
        warn!(video_id = %video_id, "video not found");
        return Ok(None);
    };

    let publish_date = DateTime::parse_from_rfc3339(&item.snippet.published_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| unavailable(format!("publishedAt {:?}: {err}", item.snippet.published_at)))?;
    let statistics = item.statistics.unwrap_or_default();
    let view_count = parse_count(statistics.view_count.as_deref())
        .map_err(|value| unavailable(format!("viewCount {value:?}")))?
        .unwrap_or(0);
    let thumbnail_url = THUMBNAIL_PREFERENCE
        .iter()
        .find_map(|key| item.snippet.thumbnails.get(*key))
        .map(|thumbnail| thumbnail.url.clone());

    Ok(Some(FetchedMetadata {
        video_id: video_id.clone(),
        title: item.snippet.title,
        thumbnail_url,
        publish_date,
        view_count,
        like_count: optional_count(video_id, "likeCount", statistics.like_count.as_deref()),
        comment_count: optional_count(
            video_id,
            "commentCount",
            statistics.comment_count.as_deref(),
        ),
    }))
}

// Unreadable like/comment counters are logged and dropped.
fn optional_count(video_id: &VideoId, field: &str, value: Option<&str>) -> Option<i64> {
    match parse_count(value) {
        Ok(count) => count,
        Err(raw) => {
            warn!(video_id = %video_id, field, value = %raw, "ignoring non-numeric counter");
            None
        }
    }
}

// The API serializes counters as decimal strings.
fn parse_count(value: Option<&str>) -> Result<Option<i64>, String> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| raw.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: Option<String>,
    snippet: Snippet,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    published_at: String,
    #[serde(default)]
    thumbnails: HashMap<String, Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}
