//! Aggregation over measurement rows: per-timestamp means, rankings,
//! and time-bucket summaries.
//!
//! Grouping uses ordered maps and every ranking has a total tie-break;
//! identical input files reproduce identical artifacts byte for byte.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Timelike, Utc};

use crate::analyzers::types::{BucketPoint, CarRow, SeriesPoint};
use crate::analyzers::utility::mean;

/// Occupancy at or above this rate counts as saturated.
pub const SATURATION_THRESHOLD: f64 = 0.95;

/// Collapses `(timestamp, value)` observations into one mean per
/// timestamp, sorted chronologically.
pub fn mean_by_timestamp<I>(observations: I) -> Vec<SeriesPoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64)>,
{
    let mut grouped: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for (ts, value) in observations {
        grouped.entry(ts).or_default().push(value);
    }

    grouped
        .into_iter()
        .map(|(timestamp, values)| SeriesPoint {
            timestamp,
            value: mean(&values),
        })
        .collect()
}

/// Valid `(timestamp, occupancy)` observations from `PARK` rows,
/// skipping excluded sensors and rows with missing fields.
pub fn park_observations<'a>(
    rows: &'a [CarRow],
    exclude: &'a BTreeSet<String>,
) -> impl Iterator<Item = (DateTime<Utc>, f64)> + 'a {
    rows.iter().filter_map(|r| {
        if r.kind != "PARK" || exclude.contains(&r.name) {
            return None;
        }
        Some((r.timestamp()?, r.occupancy?))
    })
}

/// How often each park was saturated, most often first.
pub fn saturation_ranking(rows: &[CarRow], exclude: &BTreeSet<String>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for r in rows {
        if r.kind != "PARK" || exclude.contains(&r.name) {
            continue;
        }
        if r.occupancy.is_some_and(|o| o >= SATURATION_THRESHOLD) {
            *counts.entry(r.name.as_str()).or_default() += 1;
        }
    }

    let mut ranking: Vec<_> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranking
}

/// Mean occupancy per park, busiest first.
pub fn mean_occupancy_ranking(rows: &[CarRow], exclude: &BTreeSet<String>) -> Vec<(String, f64)> {
    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for r in rows {
        if r.kind != "PARK" || exclude.contains(&r.name) {
            continue;
        }
        if let Some(o) = r.occupancy {
            values.entry(r.name.as_str()).or_default().push(o);
        }
    }

    let mut ranking: Vec<_> = values
        .into_iter()
        .map(|(name, vals)| (name.to_string(), mean(&vals)))
        .collect();
    ranking.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranking
}

/// Mean per calendar day (UTC), chronological.
pub fn daily_means(points: &[SeriesPoint]) -> Vec<BucketPoint> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for p in points {
        grouped
            .entry(p.timestamp.format("%Y-%m-%d").to_string())
            .or_default()
            .push(p.value);
    }
    bucketize(grouped)
}

/// Mean per hour of day (UTC), `"00"` through `"23"`.
pub fn hourly_profile(points: &[SeriesPoint]) -> Vec<BucketPoint> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for p in points {
        grouped
            .entry(format!("{:02}", p.timestamp.hour()))
            .or_default()
            .push(p.value);
    }
    bucketize(grouped)
}

fn bucketize(grouped: BTreeMap<String, Vec<f64>>) -> Vec<BucketPoint> {
    grouped
        .into_iter()
        .map(|(bucket, values)| BucketPoint {
            bucket,
            mean: mean(&values),
            count: values.len(),
        })
        .collect()
}
