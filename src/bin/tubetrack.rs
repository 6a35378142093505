#![forbid(unsafe_code)]

//! Operator CLI: registers videos and title/thumbnail iterations, records
//! daily samples, runs the stored queries and renders view charts.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubetrack_tools::{
    TrackerError, VideoId,
    chart::write_svg,
    config::{ConfigOverrides, TrackerConfig, resolve_config},
    provider::YouTubeDataApi,
    reconcile::{
        IterationOutcome, ReconcileReport, ReconcileRequest, Reconciler, SnapshotOutcome,
        SnapshotRequest, VariantRequest,
    },
    store::{NewIteration, PerformanceSummary, TrackingStore, Video},
};

#[derive(Debug, Parser)]
#[command(name = "tubetrack", version, about = "Track YouTube video iterations and daily performance")]
struct Cli {
    /// Env file holding YOUTUBE_API_KEY, DB_USER, DB_PASSWORD and DB_DSN.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Database file; overrides DB_DSN.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Overrides YOUTUBE_API_KEY.
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the canonical video id for a URL or id.
    Extract { input: String },
    /// Fetch a video from YouTube and record it, optionally with a new variant
    /// and a metric snapshot.
    Track(TrackArgs),
    /// Register a title/thumbnail variant without calling YouTube.
    AddIteration(AddIterationArgs),
    /// Record one day's views and impressions for an iteration.
    RecordMetric(RecordMetricArgs),
    /// List the iterations of a video and their samples.
    Iterations { video: String },
    /// Search tracked videos by original title.
    Search {
        keyword: String,
        #[arg(long)]
        json: bool,
    },
    /// Original vs latest title with start and latest views per video.
    Performance {
        #[arg(long)]
        json: bool,
    },
    /// Render the views-over-time chart of a video as SVG.
    Chart {
        video: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Interactive loop: pick a tracked video and chart it.
    Menu {
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Debug, Args)]
struct TrackArgs {
    input: String,
    /// New title to register as an iteration.
    #[arg(long)]
    title: Option<String>,
    /// New thumbnail URL to register as an iteration.
    #[arg(long)]
    thumbnail: Option<String>,
    /// Start date of the new iteration (defaults to today).
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// View count at iteration start (defaults to the live count).
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    views_start: Option<i64>,
    /// Append today's view count to the latest iteration.
    #[arg(long)]
    snapshot: bool,
    /// Impressions for the snapshot day (defaults to 0, which stores a CTR of 0).
    #[arg(long, requires = "snapshot", value_parser = clap::value_parser!(i64).range(0..))]
    impressions: Option<i64>,
    #[arg(long, requires = "snapshot")]
    date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
struct AddIterationArgs {
    video: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    thumbnail: String,
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    views_start: i64,
    #[arg(long)]
    start_date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
struct RecordMetricArgs {
    iteration_id: i64,
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    views: i64,
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    impressions: i64,
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}

/// Dispatches one subcommand. Inputs naming a video are validated before the
/// store is opened so a malformed id never creates the database file.
async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(ConfigOverrides {
        api_key: cli.api_key.clone(),
        db_dsn: cli.db.clone(),
        env_path: cli.env_file.clone(),
    })?;

    match cli.command {
        Command::Extract { input } => {
            println!("{}", VideoId::parse(&input)?);
        }
        Command::Track(args) => {
            VideoId::parse(&args.input)?;
            let provider = YouTubeDataApi::new(config.require_api_key()?);
            let store = open_store(&config).await?;
            let report = Reconciler::new(&store, &provider)
                .reconcile(track_request(args, today()))
                .await
                .context("tracking video")?;
            print_report(&report);
        }
        Command::AddIteration(args) => {
            let video_id = VideoId::parse(&args.video)?;
            let store = open_store(&config).await?;
            let iteration = store
                .add_iteration(&NewIteration {
                    video_id,
                    title: args.title,
                    thumbnail: args.thumbnail,
                    start_date: args.start_date.unwrap_or_else(today),
                    views_start: args.views_start,
                })
                .await?;
            println!(
                "Iteration {} registered for {}: {}",
                iteration.iteration_id, iteration.video_id, iteration.title
            );
        }
        Command::RecordMetric(args) => {
            let store = open_store(&config).await?;
            let metric = store
                .append_daily_metric(
                    args.iteration_id,
                    args.date.unwrap_or_else(today),
                    args.views,
                    args.impressions,
                )
                .await?;
            println!(
                "Recorded {} views / {} impressions for iteration {} on {} (CTR {:.2}%)",
                metric.views,
                metric.impressions,
                metric.iteration_id,
                metric.metric_date,
                metric.ctr * 100.0
            );
        }
        Command::Iterations { video } => {
            let video_id = VideoId::parse(&video)?;
            let store = open_store(&config).await?;
            print_iterations(&store, &video_id).await?;
        }
        Command::Search { keyword, json } => {
            let store = open_store(&config).await?;
            let videos = store.query_by_title_keyword(&keyword).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&videos)?);
            } else if videos.is_empty() {
                println!("No tracked video title contains {keyword:?}.");
            } else {
                for video in &videos {
                    print_video(video);
                }
            }
        }
        Command::Performance { json } => {
            let store = open_store(&config).await?;
            let summary = store.query_performance_summary().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if summary.is_empty() {
                println!("No videos tracked yet.");
            } else {
                for row in &summary {
                    print_performance(row);
                }
            }
        }
        Command::Chart { video, output } => {
            let video_id = VideoId::parse(&video)?;
            let store = open_store(&config).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{video_id}.svg")));
            chart_video(&store, &video_id, &output).await?;
            println!("Chart written to {}", output.display());
        }
        Command::Menu { output_dir } => {
            let store = open_store(&config).await?;
            let stdin = io::stdin();
            run_menu(&store, &output_dir, stdin.lock(), io::stdout()).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn open_store(config: &TrackerConfig) -> Result<TrackingStore> {
    if config.has_db_credentials() {
        warn!("DB_USER/DB_PASSWORD are set but the local store does not authenticate");
    }
    info!(dsn = %config.db_dsn.display(), "opening store");
    TrackingStore::open(&config.db_dsn)
        .await
        .with_context(|| format!("opening store {}", config.db_dsn.display()))
}

fn track_request(args: TrackArgs, today: NaiveDate) -> ReconcileRequest {
    let variant = (args.title.is_some() || args.thumbnail.is_some()).then(|| VariantRequest {
        title: args.title,
        thumbnail: args.thumbnail,
        start_date: args.start_date.unwrap_or(today),
        views_start: args.views_start,
    });
    let snapshot = args.snapshot.then(|| SnapshotRequest {
        metric_date: args.date.unwrap_or(today),
        impressions: args.impressions.unwrap_or(0),
    });
    ReconcileRequest {
        raw_input: args.input,
        variant,
        snapshot,
    }
}

fn print_report(report: &ReconcileReport) {
    let video = &report.video;
    if report.newly_tracked {
        println!("Now tracking {}: {}", video.video_id, video.original_title);
    } else {
        println!("Already tracking {}: {}", video.video_id, video.original_title);
        if report.fetched.title != video.original_title {
            println!("  Current title on YouTube: {}", report.fetched.title);
        }
    }
    println!("  Link: {}", video.video_link);
    println!("  Views now: {}", report.fetched.view_count);

    match &report.iteration {
        IterationOutcome::NotRequested => {}
        IterationOutcome::Unchanged => {
            println!("  Variant matches what is already tracked; no iteration added.");
        }
        IterationOutcome::Created(iteration) => println!(
            "  Iteration {} started {} at {} views: {}",
            iteration.iteration_id, iteration.start_date, iteration.views_start, iteration.title
        ),
    }

    match &report.snapshot {
        None => {}
        Some(SnapshotOutcome::NoIteration) => {
            println!("  Snapshot skipped: register an iteration first.");
        }
        Some(SnapshotOutcome::Recorded(metric)) => println!(
            "  Snapshot {}: {} views, {} impressions, CTR {:.2}%",
            metric.metric_date,
            metric.views,
            metric.impressions,
            metric.ctr * 100.0
        ),
    }
}

fn print_video(video: &Video) {
    println!(
        "{}  {}  {}",
        video.video_id, video.original_title, video.video_link
    );
}

fn print_performance(row: &PerformanceSummary) {
    fn or_dash(value: Option<i64>) -> String {
        value.map_or_else(|| "-".to_string(), |v| v.to_string())
    }
    println!("{}  {}", row.video_id, row.original_title);
    println!(
        "  Last title: {}",
        row.last_title.as_deref().unwrap_or("(no iterations)")
    );
    println!(
        "  Views start: {}  First sample: {}  Latest sample: {}",
        or_dash(row.views_start),
        or_dash(row.first_views),
        or_dash(row.latest_views)
    );
}

async fn print_iterations(store: &TrackingStore, video_id: &VideoId) -> Result<()> {
    let Some(video) = store.get_video(video_id).await? else {
        return Err(TrackerError::UnknownVideo(video_id.to_string()).into());
    };
    print_video(&video);
    let iterations = store.list_iterations(video_id).await?;
    if iterations.is_empty() {
        println!("  No iterations registered.");
    }
    for iteration in iterations {
        println!(
            "  [{}] {} (from {}, {} views at start)",
            iteration.iteration_id, iteration.title, iteration.start_date, iteration.views_start
        );
        for metric in store.list_daily_metrics(iteration.iteration_id).await? {
            println!(
                "      {}  views {}  impressions {}  CTR {:.2}%",
                metric.metric_date,
                metric.views,
                metric.impressions,
                metric.ctr * 100.0
            );
        }
    }
    Ok(())
}

async fn chart_video(store: &TrackingStore, video_id: &VideoId, output: &Path) -> Result<()> {
    let Some(video) = store.get_video(video_id).await? else {
        return Err(TrackerError::UnknownVideo(video_id.to_string()).into());
    };
    let series = store.view_series(video_id).await?;
    if series.is_empty() {
        bail!("no metrics recorded for {video_id} yet");
    }
    write_svg(
        output,
        &format!("Views over time: {}", video.original_title),
        &series,
    )
}

/// Blocking prompt loop over the tracked videos. Chart failures are reported
/// and the loop carries on; end of input or `q` ends it.
async fn run_menu(
    store: &TrackingStore,
    output_dir: &Path,
    mut input: impl BufRead,
    mut out: impl Write,
) -> Result<()> {
    loop {
        let videos = store.list_videos().await?;
        if videos.is_empty() {
            writeln!(out, "No videos tracked yet.")?;
            return Ok(());
        }

        writeln!(out)?;
        writeln!(out, "Tracked videos:")?;
        for (index, video) in videos.iter().enumerate() {
            writeln!(out, "  {}. {} ({})", index + 1, video.original_title, video.video_id)?;
        }
        write!(out, "Select a video to chart (q to quit): ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }
        let choice = line.trim();
        if choice.eq_ignore_ascii_case("q") {
            return Ok(());
        }

        let Some(video) = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| videos.get(index))
        else {
            writeln!(out, "Invalid choice: {choice:?}")?;
            continue;
        };

        let path = output_dir.join(format!("{}.svg", video.video_id));
        match chart_video(store, &video.video_id, &path).await {
            Ok(()) => writeln!(out, "Chart written to {}", path.display())?,
            Err(err) => writeln!(out, "Could not chart {}: {err:#}", video.video_id)?,
        }
    }
}
