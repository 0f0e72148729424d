//! PNG trend charts for occupancy-rate series.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use plotters::coord::types::RangedDateTime;
use plotters::prelude::*;

const CHART_SIZE: (u32, u32) = (900, 420);

/// Draws a rate series (values in `[0, 1]`) as a line chart.
///
/// Returns `false` without touching the filesystem when the series is
/// too short to plot; callers then simply skip the image.
pub fn rate_series_png(
    path: &Path,
    title: &str,
    points: &[(DateTime<Utc>, f64)],
) -> Result<bool> {
    if points.len() < 2 {
        return Ok(false);
    }

    let min_t = points.iter().map(|(t, _)| *t).min().unwrap();
    let max_t = points.iter().map(|(t, _)| *t).max().unwrap();
    if min_t == max_t {
        return Ok(false);
    }

    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(RangedDateTime::from(min_t..max_t), 0f64..1f64)?;

    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&|t: &DateTime<Utc>| t.format("%m-%d %H:%M").to_string())
        .y_desc("occupancy")
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;

    root.present()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_short_series_is_skipped() {
        let path = std::env::temp_dir().join("parkride_test_short.png");
        let _ = std::fs::remove_file(&path);

        let one = vec![(Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(), 0.5)];
        assert!(!rate_series_png(&path, "t", &[]).unwrap());
        assert!(!rate_series_png(&path, "t", &one).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_chart_is_written() {
        let path = std::env::temp_dir().join("parkride_test_chart.png");
        let _ = std::fs::remove_file(&path);

        let points: Vec<_> = (0..24)
            .map(|h| {
                (
                    Utc.with_ymd_and_hms(2026, 1, 5, h, 0, 0).unwrap(),
                    h as f64 / 24.0,
                )
            })
            .collect();
        assert!(rate_series_png(&path, "occupancy", &points).unwrap());
        assert!(path.exists());

        std::fs::remove_file(&path).unwrap();
    }
}
