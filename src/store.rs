//! Relational persistence for tracked videos, their title/thumbnail
//! iterations and the daily metric samples attached to each iteration.
//!
//! The store owns the consistency rules: first-seen video values are never
//! overwritten, iterations only hang off known videos and every iteration has
//! at most one sample per calendar day.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::video_id::VideoId;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// First-seen record for a platform video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub video_id: VideoId,
    pub video_link: String,
    pub original_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_thumbnail: String,
    pub publish_date: DateTime<Utc>,
}

/// Input for [`TrackingStore::upsert_video`]. The link is derived from the id.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub video_id: VideoId,
    pub title: String,
    pub thumbnail: String,
    pub publish_date: DateTime<Utc>,
}

/// A title/thumbnail variant under test for a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration_id: i64,
    pub video_id: VideoId,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,
    pub start_date: NaiveDate,
    pub views_start: i64,
}

#[derive(Debug, Clone)]
pub struct NewIteration {
    pub video_id: VideoId,
    pub title: String,
    pub thumbnail: String,
    pub start_date: NaiveDate,
    pub views_start: i64,
}

/// One day's sample for an iteration. `ctr` is cached from `views` and
/// `impressions` at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub iteration_id: i64,
    pub metric_date: NaiveDate,
    pub views: i64,
    pub impressions: i64,
    pub ctr: f64,
}

/// Row of the `video_performance` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub video_id: VideoId,
    pub original_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_views: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_views: Option<i64>,
}

/// Result of [`TrackingStore::upsert_video`]. A duplicate is benign: the
/// stored record comes back untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Video),
    DuplicateIgnored(Video),
}

impl UpsertOutcome {
    pub fn video(&self) -> &Video {
        match self {
            UpsertOutcome::Inserted(video) | UpsertOutcome::DuplicateIgnored(video) => video,
        }
    }

    pub fn into_video(self) -> Video {
        match self {
            UpsertOutcome::Inserted(video) | UpsertOutcome::DuplicateIgnored(video) => video,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

pub fn click_through_rate(views: i64, impressions: i64) -> f64 {
    if impressions > 0 {
        views as f64 / impressions as f64
    } else {
        0.0
    }
}

async fn configure_connection(conn: &Connection) -> TrackerResult<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> TrackerResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            video_id TEXT PRIMARY KEY,
            video_link TEXT NOT NULL,
            original_title TEXT NOT NULL,
            original_thumbnail TEXT NOT NULL DEFAULT '',
            publish_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS iterations (
            iteration_id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id TEXT NOT NULL REFERENCES videos(video_id),
            title TEXT NOT NULL,
            thumbnail TEXT NOT NULL DEFAULT '',
            start_date TEXT NOT NULL,
            views_start INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_iterations_video ON iterations(video_id);

        CREATE TABLE IF NOT EXISTS daily_metrics (
            iteration_id INTEGER NOT NULL REFERENCES iterations(iteration_id),
            metric_date TEXT NOT NULL,
            views INTEGER NOT NULL,
            impressions INTEGER NOT NULL,
            ctr REAL NOT NULL,
            UNIQUE (iteration_id, metric_date)
        );

        CREATE VIEW IF NOT EXISTS video_performance AS
        SELECT
            v.video_id,
            v.original_title,
            (SELECT i.title FROM iterations i
              WHERE i.video_id = v.video_id
              ORDER BY i.iteration_id DESC LIMIT 1) AS last_title,
            (SELECT i.views_start FROM iterations i
              WHERE i.video_id = v.video_id
              ORDER BY i.iteration_id DESC LIMIT 1) AS views_start,
            (SELECT m.views FROM daily_metrics m
              JOIN iterations i ON i.iteration_id = m.iteration_id
              WHERE i.video_id = v.video_id
              ORDER BY m.metric_date ASC, m.iteration_id ASC LIMIT 1) AS first_views,
            (SELECT m.views FROM daily_metrics m
              JOIN iterations i ON i.iteration_id = m.iteration_id
              WHERE i.video_id = v.video_id
              ORDER BY m.metric_date DESC, m.iteration_id DESC LIMIT 1) AS latest_views,
            v.rowid AS video_seq
        FROM videos v;
        "#,
    )
    .await?;
    Ok(())
}

/// Handle over one store connection. Opened per invocation and released when
/// dropped.
pub struct TrackingStore {
    conn: Connection,
}

impl std::fmt::Debug for TrackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingStore").finish_non_exhaustive()
    }
}

impl TrackingStore {
    /// Opens (and if necessary creates) the database and ensures the schema.
    pub async fn open(path: &Path) -> TrackerResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Inserts the video unless the id is already tracked, in which case the
    /// stored first-seen record is returned unchanged.
    pub async fn upsert_video(&self, video: &NewVideo) -> TrackerResult<UpsertOutcome> {
        let inserted = self
            .conn
            .execute(
                r#"
                INSERT INTO videos (
                    video_id, video_link, original_title, original_thumbnail, publish_date
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(video_id) DO NOTHING
                "#,
                params![
                    video.video_id.as_str(),
                    video.video_id.watch_url(),
                    video.title.as_str(),
                    video.thumbnail.as_str(),
                    video.publish_date.to_rfc3339(),
                ],
            )
            .await?;

        let stored = self.get_video(&video.video_id).await?.ok_or_else(|| {
            TrackerError::CorruptRow(format!("video {} missing after insert", video.video_id))
        })?;

        if inserted == 0 {
            warn!(video_id = %video.video_id, "video already tracked; keeping first-seen values");
            Ok(UpsertOutcome::DuplicateIgnored(stored))
        } else {
            info!(video_id = %video.video_id, title = %stored.original_title, "video inserted");
            Ok(UpsertOutcome::Inserted(stored))
        }
    }

    pub async fn add_iteration(&self, iteration: &NewIteration) -> TrackerResult<Iteration> {
        if self.get_video(&iteration.video_id).await?.is_none() {
            return Err(TrackerError::UnknownVideo(iteration.video_id.to_string()));
        }

        self.conn
            .execute(
                r#"
                INSERT INTO iterations (video_id, title, thumbnail, start_date, views_start)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    iteration.video_id.as_str(),
                    iteration.title.as_str(),
                    iteration.thumbnail.as_str(),
                    format_date(iteration.start_date),
                    iteration.views_start,
                ],
            )
            .await?;
        let iteration_id = self.conn.last_insert_rowid();

        info!(
            video_id = %iteration.video_id,
            iteration_id,
            title = %iteration.title,
            "iteration inserted"
        );
        Ok(Iteration {
            iteration_id,
            video_id: iteration.video_id.clone(),
            title: iteration.title.clone(),
            thumbnail: iteration.thumbnail.clone(),
            start_date: iteration.start_date,
            views_start: iteration.views_start,
        })
    }

    /// Records one day's sample. A second sample for the same iteration and
    /// date is rejected; the first one stays as written.
    pub async fn append_daily_metric(
        &self,
        iteration_id: i64,
        metric_date: NaiveDate,
        views: i64,
        impressions: i64,
    ) -> TrackerResult<DailyMetric> {
        let ctr = click_through_rate(views, impressions);
        let date = format_date(metric_date);

        let tx = self.conn.transaction().await?;
        let mut rows = tx
            .query(
                "SELECT 1 FROM iterations WHERE iteration_id = ?1",
                params![iteration_id],
            )
            .await?;
        let known = rows.next().await?.is_some();
        drop(rows);
        if !known {
            tx.rollback().await?;
            return Err(TrackerError::UnknownIteration(iteration_id));
        }

        let inserted = tx
            .execute(
                r#"
                INSERT INTO daily_metrics (iteration_id, metric_date, views, impressions, ctr)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(iteration_id, metric_date) DO NOTHING
                "#,
                params![iteration_id, date.as_str(), views, impressions, ctr],
            )
            .await?;
        if inserted == 0 {
            tx.rollback().await?;
            return Err(TrackerError::DuplicateMetricDate {
                iteration_id,
                date: metric_date,
            });
        }
        tx.commit().await?;

        info!(iteration_id, date = %date, views, impressions, ctr, "daily metric inserted");
        Ok(DailyMetric {
            iteration_id,
            metric_date,
            views,
            impressions,
            ctr,
        })
    }

    pub async fn get_video(&self, video_id: &VideoId) -> TrackerResult<Option<Video>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT video_id, video_link, original_title, original_thumbnail, publish_date
                FROM videos
                WHERE video_id = ?1
                "#,
                [video_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Every tracked video in insertion order.
    pub async fn list_videos(&self) -> TrackerResult<Vec<Video>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT video_id, video_link, original_title, original_thumbnail, publish_date
                FROM videos
                ORDER BY rowid ASC
                "#,
                params![],
            )
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    /// Case-insensitive substring match on the original title, in insertion
    /// order.
    pub async fn query_by_title_keyword(&self, keyword: &str) -> TrackerResult<Vec<Video>> {
        let needle = keyword.to_lowercase();
        let mut videos = self.list_videos().await?;
        videos.retain(|video| video.original_title.to_lowercase().contains(&needle));
        Ok(videos)
    }

    /// Oldest first.
    pub async fn list_iterations(&self, video_id: &VideoId) -> TrackerResult<Vec<Iteration>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT iteration_id, video_id, title, thumbnail, start_date, views_start
                FROM iterations
                WHERE video_id = ?1
                ORDER BY iteration_id ASC
                "#,
                [video_id.as_str()],
            )
            .await?;
        let mut iterations = Vec::new();
        while let Some(row) = rows.next().await? {
            iterations.push(row_to_iteration(&row)?);
        }
        Ok(iterations)
    }

    pub async fn latest_iteration(&self, video_id: &VideoId) -> TrackerResult<Option<Iteration>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT iteration_id, video_id, title, thumbnail, start_date, views_start
                FROM iterations
                WHERE video_id = ?1
                ORDER BY iteration_id DESC
                LIMIT 1
                "#,
                [video_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_iteration(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_daily_metrics(&self, iteration_id: i64) -> TrackerResult<Vec<DailyMetric>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT iteration_id, metric_date, views, impressions, ctr
                FROM daily_metrics
                WHERE iteration_id = ?1
                ORDER BY metric_date ASC
                "#,
                params![iteration_id],
            )
            .await?;
        let mut metrics = Vec::new();
        while let Some(row) = rows.next().await? {
            metrics.push(row_to_metric(&row)?);
        }
        Ok(metrics)
    }

    pub async fn query_performance_summary(&self) -> TrackerResult<Vec<PerformanceSummary>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT video_id, original_title, last_title, views_start,
                       first_views, latest_views
                FROM video_performance
                ORDER BY video_seq ASC
                "#,
                params![],
            )
            .await?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await? {
            let video_id: String = row.get(0)?;
            summaries.push(PerformanceSummary {
                video_id: parse_video_id(&video_id)?,
                original_title: row.get(1)?,
                last_title: row.get(2)?,
                views_start: row.get(3)?,
                first_views: row.get(4)?,
                latest_views: row.get(5)?,
            });
        }
        Ok(summaries)
    }

    /// Views per day across every iteration of the video, oldest day first.
    /// Days sampled by more than one iteration keep the highest count.
    pub async fn view_series(&self, video_id: &VideoId) -> TrackerResult<Vec<(NaiveDate, i64)>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT m.metric_date, MAX(m.views)
                FROM daily_metrics m
                JOIN iterations i ON i.iteration_id = m.iteration_id
                WHERE i.video_id = ?1
                GROUP BY m.metric_date
                ORDER BY m.metric_date ASC
                "#,
                [video_id.as_str()],
            )
            .await?;
        let mut series = Vec::new();
        while let Some(row) = rows.next().await? {
            let date: String = row.get(0)?;
            series.push((parse_date(&date)?, row.get::<i64>(1)?));
        }
        Ok(series)
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(value: &str) -> TrackerResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|err| TrackerError::CorruptRow(format!("date {value:?}: {err}")))
}

fn parse_timestamp(value: &str) -> TrackerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| TrackerError::CorruptRow(format!("timestamp {value:?}: {err}")))
}

fn parse_video_id(value: &str) -> TrackerResult<VideoId> {
    VideoId::parse(value).map_err(|_| TrackerError::CorruptRow(format!("video id {value:?}")))
}

// Column order must match the SELECT statements above.
fn row_to_video(row: &Row) -> TrackerResult<Video> {
    let video_id: String = row.get(0)?;
    let publish_date: String = row.get(4)?;
    Ok(Video {
        video_id: parse_video_id(&video_id)?,
        video_link: row.get(1)?,
        original_title: row.get(2)?,
        original_thumbnail: row.get(3)?,
        publish_date: parse_timestamp(&publish_date)?,
    })
}

fn row_to_iteration(row: &Row) -> TrackerResult<Iteration> {
    let video_id: String = row.get(1)?;
    let start_date: String = row.get(4)?;
    Ok(Iteration {
        iteration_id: row.get(0)?,
        video_id: parse_video_id(&video_id)?,
        title: row.get(2)?,
        thumbnail: row.get(3)?,
        start_date: parse_date(&start_date)?,
        views_start: row.get(5)?,
    })
}

fn row_to_metric(row: &Row) -> TrackerResult<DailyMetric> {
    let metric_date: String = row.get(1)?;
    Ok(DailyMetric {
        iteration_id: row.get(0)?,
        metric_date: parse_date(&metric_date)?,
        views: row.get(2)?,
        impressions: row.get(3)?,
        ctr: row.get(4)?,
    })
}
