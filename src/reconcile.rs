//! Bridges freshly fetched metadata into the store.
//!
//! The sequence is linear: extract the id, fetch, record the video, then
//! optionally register an operator-requested variant and a metric snapshot.
//! Any failure stops the run; whatever was committed before stays committed.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::provider::{FetchedMetadata, MetadataProvider};
use crate::store::{DailyMetric, Iteration, NewIteration, NewVideo, TrackingStore, Video};
use crate::video_id::VideoId;

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    /// URL or bare id as typed by the operator.
    pub raw_input: String,
    pub variant: Option<VariantRequest>,
    pub snapshot: Option<SnapshotRequest>,
}

/// Operator-registered title/thumbnail variant. Missing fields keep the
/// current value.
#[derive(Debug, Clone)]
pub struct VariantRequest {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub start_date: NaiveDate,
    /// Falls back to the view count fetched during this run.
    pub views_start: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub metric_date: NaiveDate,
    pub impressions: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    NotRequested,
    /// The requested variant matches what is already being tracked.
    Unchanged,
    Created(Iteration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Recorded(DailyMetric),
    /// Metrics attach to iterations and the video has none yet.
    NoIteration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub video: Video,
    pub newly_tracked: bool,
    pub fetched: FetchedMetadata,
    pub iteration: IterationOutcome,
    pub snapshot: Option<SnapshotOutcome>,
}

pub struct Reconciler<'a, P> {
    store: &'a TrackingStore,
    provider: &'a P,
}

impl<'a, P: MetadataProvider> Reconciler<'a, P> {
    pub fn new(store: &'a TrackingStore, provider: &'a P) -> Self {
        Self { store, provider }
    }

    pub async fn reconcile(&self, request: ReconcileRequest) -> TrackerResult<ReconcileReport> {
        let video_id = VideoId::parse(&request.raw_input)?;

        let fetched = self.provider.fetch(&video_id)?.ok_or_else(|| {
            TrackerError::metadata_unavailable(video_id.as_str(), "provider returned no video")
        })?;

        let outcome = self
            .store
            .upsert_video(&NewVideo {
                video_id: video_id.clone(),
                title: fetched.title.clone(),
                thumbnail: fetched.thumbnail_url.clone().unwrap_or_default(),
                publish_date: fetched.publish_date,
            })
            .await?;
        let newly_tracked = outcome.is_inserted();
        let video = outcome.into_video();

        let iteration = match request.variant {
            Some(variant) => self.register_variant(&video, &fetched, variant).await?,
            None => IterationOutcome::NotRequested,
        };

        let snapshot = match request.snapshot {
            Some(snapshot) => Some(self.record_snapshot(&video, &fetched, snapshot).await?),
            None => None,
        };

        Ok(ReconcileReport {
            video,
            newly_tracked,
            fetched,
            iteration,
            snapshot,
        })
    }

    async fn register_variant(
        &self,
        video: &Video,
        fetched: &FetchedMetadata,
        variant: VariantRequest,
    ) -> TrackerResult<IterationOutcome> {
        let latest = self.store.latest_iteration(&video.video_id).await?;
        let (current_title, current_thumbnail) = match &latest {
            Some(iteration) => (iteration.title.as_str(), iteration.thumbnail.as_str()),
            None => (
                video.original_title.as_str(),
                video.original_thumbnail.as_str(),
            ),
        };
        let title = variant.title.unwrap_or_else(|| current_title.to_owned());
        let thumbnail = variant
            .thumbnail
            .unwrap_or_else(|| current_thumbnail.to_owned());

        let matches_original =
            title == video.original_title && thumbnail == video.original_thumbnail;
        let matches_latest = latest
            .as_ref()
            .is_some_and(|iteration| iteration.title == title && iteration.thumbnail == thumbnail);
        if matches_original || matches_latest {
            info!(video_id = %video.video_id, "variant matches tracked values; no iteration added");
            return Ok(IterationOutcome::Unchanged);
        }

        let iteration = self
            .store
            .add_iteration(&NewIteration {
                video_id: video.video_id.clone(),
                title,
                thumbnail,
                start_date: variant.start_date,
                views_start: variant.views_start.unwrap_or(fetched.view_count),
            })
            .await?;
        Ok(IterationOutcome::Created(iteration))
    }

    async fn record_snapshot(
        &self,
        video: &Video,
        fetched: &FetchedMetadata,
        snapshot: SnapshotRequest,
    ) -> TrackerResult<SnapshotOutcome> {
        let Some(iteration) = self.store.latest_iteration(&video.video_id).await? else {
            warn!(video_id = %video.video_id, "no iteration to attach the snapshot to");
            return Ok(SnapshotOutcome::NoIteration);
        };
        let metric = self
            .store
            .append_daily_metric(
                iteration.iteration_id,
                snapshot.metric_date,
                fetched.view_count,
                snapshot.impressions,
            )
            .await?;
        Ok(SnapshotOutcome::Recorded(metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PerformanceSummary;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use tempfile::tempdir;

    const RICK_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
    const RICK_TITLE: &str = "Rick Astley - Never Gonna Give You Up";

    /// Serves canned metadata and counts how often it was asked.
    struct FakeProvider {
        response: Option<FetchedMetadata>,
        calls: Cell<usize>,
    }

    impl FakeProvider {
        fn serving(title: &str, views: i64) -> Self {
            Self {
                response: Some(FetchedMetadata {
                    video_id: VideoId::parse("dQw4w9WgXcQ").unwrap(),
                    title: title.to_owned(),
                    thumbnail_url: Some("thumb1.jpg".into()),
                    publish_date: Utc.with_ymd_and_hms(2009, 10, 25, 6, 57, 33).unwrap(),
                    view_count: views,
                    like_count: None,
                    comment_count: None,
                }),
                calls: Cell::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                response: None,
                calls: Cell::new(0),
            }
        }
    }

    impl MetadataProvider for FakeProvider {
        fn fetch(&self, _video_id: &VideoId) -> TrackerResult<Option<FetchedMetadata>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.response.clone())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn plain(raw: &str) -> ReconcileRequest {
        ReconcileRequest {
            raw_input: raw.to_owned(),
            variant: None,
            snapshot: None,
        }
    }

    fn variant(title: &str, thumbnail: &str, views_start: Option<i64>) -> VariantRequest {
        VariantRequest {
            title: Some(title.to_owned()),
            thumbnail: Some(thumbnail.to_owned()),
            start_date: today(),
            views_start,
        }
    }

    async fn create_store() -> TrackerResult<(tempfile::TempDir, TrackingStore)> {
        let dir = tempdir()?;
        let store = TrackingStore::open(&dir.path().join("tracker.db")).await?;
        Ok((dir, store))
    }

    #[tokio::test]
    async fn invalid_identifier_touches_neither_provider_nor_store() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 1);
        let err = Reconciler::new(&store, &provider)
            .reconcile(plain("https://www.youtube.com/watch?v=tooshort"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidIdentifier(_)));
        assert_eq!(provider.calls.get(), 0);
        assert!(store.list_videos().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_metadata_aborts_before_any_write() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::empty();
        let err = Reconciler::new(&store, &provider)
            .reconcile(plain(RICK_URL))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::MetadataUnavailable { .. }));
        assert_eq!(provider.calls.get(), 1);
        assert!(store.list_videos().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn metadata_drift_never_creates_iterations() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let first = Reconciler::new(&store, &FakeProvider::serving(RICK_TITLE, 10))
            .reconcile(plain(RICK_URL))
            .await?;
        assert!(first.newly_tracked);
        assert_eq!(first.iteration, IterationOutcome::NotRequested);

        let drifted = FakeProvider::serving("Totally New Title", 20);
        let second = Reconciler::new(&store, &drifted)
            .reconcile(plain(RICK_URL))
            .await?;
        assert!(!second.newly_tracked);
        assert_eq!(second.video.original_title, RICK_TITLE);
        assert!(store.list_iterations(&second.video.video_id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn variant_equal_to_original_is_not_recorded() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 10);
        let report = Reconciler::new(&store, &provider)
            .reconcile(ReconcileRequest {
                variant: Some(variant(RICK_TITLE, "thumb1.jpg", None)),
                ..plain(RICK_URL)
            })
            .await?;
        assert_eq!(report.iteration, IterationOutcome::Unchanged);
        Ok(())
    }

    #[tokio::test]
    async fn repeating_the_latest_variant_is_not_recorded_twice() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 10);
        let reconciler = Reconciler::new(&store, &provider);
        let request = ReconcileRequest {
            variant: Some(variant("Remastered Title", "thumb2.jpg", Some(5))),
            ..plain(RICK_URL)
        };

        let first = reconciler.reconcile(request.clone()).await?;
        assert!(matches!(first.iteration, IterationOutcome::Created(_)));
        let second = reconciler.reconcile(request).await?;
        assert_eq!(second.iteration, IterationOutcome::Unchanged);
        assert_eq!(store.list_iterations(&first.video.video_id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn partial_variant_keeps_current_thumbnail_and_defaults_views_start() -> TrackerResult<()>
    {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 4321);
        let report = Reconciler::new(&store, &provider)
            .reconcile(ReconcileRequest {
                variant: Some(VariantRequest {
                    title: Some("Only the title changed".into()),
                    thumbnail: None,
                    start_date: today(),
                    views_start: None,
                }),
                ..plain(RICK_URL)
            })
            .await?;
        let IterationOutcome::Created(iteration) = &report.iteration else {
            panic!("expected a new iteration, got {:?}", report.iteration);
        };
        assert_eq!(iteration.thumbnail, "thumb1.jpg");
        assert_eq!(iteration.views_start, 4321);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_without_iteration_is_skipped() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 10);
        let report = Reconciler::new(&store, &provider)
            .reconcile(ReconcileRequest {
                snapshot: Some(SnapshotRequest {
                    metric_date: today(),
                    impressions: 100,
                }),
                ..plain(RICK_URL)
            })
            .await?;
        assert_eq!(report.snapshot, Some(SnapshotOutcome::NoIteration));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_snapshot_fails_but_keeps_earlier_state() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        let provider = FakeProvider::serving(RICK_TITLE, 150);
        let reconciler = Reconciler::new(&store, &provider);
        let request = ReconcileRequest {
            variant: Some(variant("Remastered Title", "thumb2.jpg", Some(1000))),
            snapshot: Some(SnapshotRequest {
                metric_date: today(),
                impressions: 2000,
            }),
            ..plain(RICK_URL)
        };
        reconciler.reconcile(request.clone()).await?;

        let err = reconciler.reconcile(request).await.unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateMetricDate { .. }));
        let video_id = VideoId::parse(RICK_URL)?;
        assert_eq!(store.list_iterations(&video_id).await?.len(), 1);
        assert_eq!(store.view_series(&video_id).await?, vec![(today(), 150)]);
        Ok(())
    }

    #[tokio::test]
    async fn end_to_end_tracking_scenario() -> TrackerResult<()> {
        let (_temp, store) = create_store().await?;
        assert_eq!(VideoId::parse(RICK_URL)?.as_str(), "dQw4w9WgXcQ");

        let provider = FakeProvider::serving(RICK_TITLE, 150);
        let report = Reconciler::new(&store, &provider)
            .reconcile(ReconcileRequest {
                raw_input: RICK_URL.into(),
                variant: Some(variant("Remastered Title", "thumb2.jpg", Some(1000))),
                snapshot: Some(SnapshotRequest {
                    metric_date: today(),
                    impressions: 2000,
                }),
            })
            .await?;

        assert!(report.newly_tracked);
        assert_eq!(report.video.original_title, RICK_TITLE);
        let IterationOutcome::Created(iteration) = &report.iteration else {
            panic!("expected a new iteration, got {:?}", report.iteration);
        };
        assert_eq!(iteration.views_start, 1000);
        let Some(SnapshotOutcome::Recorded(metric)) = &report.snapshot else {
            panic!("expected a recorded metric, got {:?}", report.snapshot);
        };
        assert_eq!(metric.iteration_id, iteration.iteration_id);
        assert!((metric.ctr - 0.075).abs() < 1e-12);

        let summary = store.query_performance_summary().await?;
        assert_eq!(
            summary,
            vec![PerformanceSummary {
                video_id: VideoId::parse("dQw4w9WgXcQ")?,
                original_title: RICK_TITLE.into(),
                last_title: Some("Remastered Title".into()),
                views_start: Some(1000),
                first_views: Some(150),
                latest_views: Some(150),
            }]
        );
        Ok(())
    }
}
