//! Line charts of daily views rendered as standalone SVG documents.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 90.0;
const Y_TICKS: i64 = 5;
const MAX_X_LABELS: usize = 10;

/// Renders `points` (ascending by date) as a line chart with markers.
pub fn render_svg(title: &str, points: &[(NaiveDate, i64)]) -> Result<String> {
    if points.is_empty() {
        bail!("nothing to chart: no metric samples");
    }

    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let first_day = points[0].0;
    let span_days = (points[points.len() - 1].0 - first_day).num_days().max(0) as f64;
    let y_max = nice_ceiling(points.iter().map(|(_, views)| *views).max().unwrap_or(0));

    let x_of = |date: NaiveDate| {
        if span_days == 0.0 {
            MARGIN_LEFT + plot_width / 2.0
        } else {
            MARGIN_LEFT + (date - first_day).num_days() as f64 / span_days * plot_width
        }
    };
    let y_of = |views: i64| MARGIN_TOP + plot_height - views as f64 / y_max as f64 * plot_height;

    let mut svg = String::new();
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    )?;
    writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        svg,
        r#"<text x="{}" y="28" text-anchor="middle" font-size="16">{}</text>"#,
        WIDTH / 2.0,
        escape_xml(title)
    )?;

    for tick in 0..=Y_TICKS {
        let value = (i128::from(y_max) * i128::from(tick) / i128::from(Y_TICKS)) as i64;
        let y = y_of(value);
        writeln!(
            svg,
            r##"<line x1="{MARGIN_LEFT}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#e5e5e5"/>"##,
            WIDTH - MARGIN_RIGHT
        )?;
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{value}</text>"#,
            MARGIN_LEFT - 8.0,
            y + 4.0
        )?;
    }

    let baseline = MARGIN_TOP + plot_height;
    writeln!(
        svg,
        r##"<line x1="{MARGIN_LEFT}" y1="{baseline}" x2="{:.1}" y2="{baseline}" stroke="#333"/>"##,
        WIDTH - MARGIN_RIGHT
    )?;
    writeln!(
        svg,
        r##"<line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{baseline}" stroke="#333"/>"##
    )?;

    let label_every = points.len().div_ceil(MAX_X_LABELS).max(1);
    for (index, (date, _)) in points.iter().enumerate() {
        if index % label_every != 0 && index != points.len() - 1 {
            continue;
        }
        let x = x_of(*date);
        let y = baseline + 16.0;
        writeln!(
            svg,
            r#"<text x="{x:.1}" y="{y:.1}" text-anchor="end" transform="rotate(-45 {x:.1} {y:.1})">{date}</text>"#
        )?;
    }

    let path: Vec<String> = points
        .iter()
        .map(|(date, views)| format!("{:.1},{:.1}", x_of(*date), y_of(*views)))
        .collect();
    writeln!(
        svg,
        r##"<polyline fill="none" stroke="#1f77b4" stroke-width="2" points="{}"/>"##,
        path.join(" ")
    )?;
    for (date, views) in points {
        writeln!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="3.5" fill="#1f77b4"><title>{date}: {views}</title></circle>"##,
            x_of(*date),
            y_of(*views)
        )?;
    }

    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">Date</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        HEIGHT - 12.0
    )?;
    writeln!(
        svg,
        r#"<text x="18" y="{:.1}" text-anchor="middle" transform="rotate(-90 18 {:.1})">Views</text>"#,
        MARGIN_TOP + plot_height / 2.0,
        MARGIN_TOP + plot_height / 2.0
    )?;
    svg.push_str("</svg>\n");
    Ok(svg)
}

pub fn write_svg(path: &Path, title: &str, points: &[(NaiveDate, i64)]) -> Result<()> {
    let svg = render_svg(title, points)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }
    fs::write(path, svg).with_context(|| format!("Writing chart {}", path.display()))?;
    Ok(())
}

/// Rounds up to 1, 2 or 5 times a power of ten so axis labels stay readable.
fn nice_ceiling(max: i64) -> i64 {
    if max <= 0 {
        return 1;
    }
    let mut magnitude = 1i64;
    while magnitude.saturating_mul(10) <= max {
        magnitude *= 10;
    }
    for step in [1, 2, 5, 10] {
        let candidate = magnitude.saturating_mul(step);
        if candidate >= max {
            return candidate;
        }
    }
    max
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn renders_one_marker_per_point() {
        let points = [(day(1), 100), (day(2), 250), (day(5), 400)];
        let svg = render_svg("Views", &points).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("2024-01-05"));
        assert!(svg.contains("<title>2024-01-02: 250</title>"));
    }

    #[test]
    fn single_point_is_centered() {
        let svg = render_svg("Solo", &[(day(3), 42)]).unwrap();
        assert_eq!(svg.matches("<circle").count(), 1);
        assert!(svg.contains(&format!(r#"cx="{:.1}""#, MARGIN_LEFT + (WIDTH - MARGIN_LEFT - MARGIN_RIGHT) / 2.0)));
    }

    #[test]
    fn empty_series_is_an_error() {
        assert!(render_svg("Empty", &[]).is_err());
    }

    #[test]
    fn title_is_escaped() {
        let svg = render_svg("Tom & Jerry <live>", &[(day(1), 1)]).unwrap();
        assert!(svg.contains("Tom &amp; Jerry &lt;live&gt;"));
    }

    #[test]
    fn extreme_view_counts_render_without_overflow() {
        let svg = render_svg("Huge", &[(day(1), 0), (day(2), i64::MAX)]).unwrap();
        assert_eq!(svg.matches("<circle").count(), 2);
        assert!(svg.contains(&format!(">{}</text>", i64::MAX)));
    }

    #[test]
    fn nice_ceiling_rounds_to_readable_steps() {
        assert_eq!(nice_ceiling(0), 1);
        assert_eq!(nice_ceiling(7), 10);
        assert_eq!(nice_ceiling(10), 10);
        assert_eq!(nice_ceiling(130), 200);
        assert_eq!(nice_ceiling(450), 500);
        assert_eq!(nice_ceiling(501), 1000);
    }

    #[test]
    fn write_svg_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("charts/video.svg");
        write_svg(&path, "Views", &[(day(1), 10), (day(2), 20)]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("<polyline"));
    }
}
