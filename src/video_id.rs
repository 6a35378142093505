#![forbid(unsafe_code)]

//! Canonical YouTube video identifiers.
//!
//! Operators paste whatever they have at hand: a bare id, a watch URL with
//! extra query parameters, a `youtu.be` short link or a `/shorts/` page. All of
//! them collapse into the same 11 character [`VideoId`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

pub const VIDEO_ID_LEN: usize = 11;
const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// Extracts the canonical id from a bare id or a supported URL shape.
    pub fn parse(raw: &str) -> TrackerResult<Self> {
        let input = raw.trim();
        let invalid = || TrackerError::InvalidIdentifier(raw.to_owned());

        if is_valid_id(input) {
            return Ok(Self(input.to_owned()));
        }

        // A `v` parameter is authoritative; a malformed value is not retried
        // against the path.
        if let Some(value) = query_param(input, "v") {
            return if is_valid_id(value) {
                Ok(Self(value.to_owned()))
            } else {
                Err(invalid())
            };
        }

        if !input.contains('/') {
            return Err(invalid());
        }
        let path = strip_query_and_fragment(input).trim_end_matches('/');
        match path.rsplit('/').next() {
            Some(segment) if is_valid_id(segment) => Ok(Self(segment.to_owned())),
            _ => Err(invalid()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The canonical watch link stored as `video_link`.
    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VideoId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VideoId {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn strip_query_and_fragment(input: &str) -> &str {
    let without_fragment = input.split('#').next().unwrap_or(input);
    without_fragment.split('?').next().unwrap_or(without_fragment)
}

fn query_param<'a>(input: &'a str, key: &str) -> Option<&'a str> {
    let without_fragment = input.split('#').next().unwrap_or(input);
    let (_, query) = without_fragment.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then_some(value)
    })
}
