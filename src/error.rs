#![forbid(unsafe_code)]

//! Error taxonomy shared by the extractor, the repository and the reconciler.

use chrono::NaiveDate;
use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("not a valid YouTube video URL or id: {0:?}")]
    InvalidIdentifier(String),

    #[error("no metadata available for video {video_id}: {reason}")]
    MetadataUnavailable { video_id: String, reason: String },

    #[error("relational store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("video {0} is not tracked")]
    UnknownVideo(String),

    #[error("iteration {0} does not exist")]
    UnknownIteration(i64),

    #[error("iteration {iteration_id} already has a metric sample for {date}")]
    DuplicateMetricDate { iteration_id: i64, date: NaiveDate },

    #[error("stored row could not be decoded: {0}")]
    CorruptRow(String),
}

impl TrackerError {
    pub fn metadata_unavailable(video_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataUnavailable {
            video_id: video_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<libsql::Error> for TrackerError {
    fn from(err: libsql::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_metric_date_names_iteration_and_day() {
        let err = TrackerError::DuplicateMetricDate {
            iteration_id: 7,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "iteration 7 already has a metric sample for 2024-03-01"
        );
    }

    #[test]
    fn io_errors_surface_as_store_unavailable() {
        let err: TrackerError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, TrackerError::StoreUnavailable(ref msg) if msg == "disk gone"));
    }
}
