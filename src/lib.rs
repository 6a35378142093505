#![forbid(unsafe_code)]

//! Tracks YouTube videos, their title/thumbnail iterations and daily
//! performance samples in a local libsql database.

pub mod chart;
pub mod config;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod video_id;

pub use error::{TrackerError, TrackerResult};
pub use video_id::VideoId;
