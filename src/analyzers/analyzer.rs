//! Orchestration of the weekly analysis step.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::analyzers::aggregate::{
    daily_means, hourly_profile, mean_by_timestamp, mean_occupancy_ranking, park_observations,
    saturation_ranking,
};
use crate::analyzers::correlation::{self, DEFAULT_WINDOW, Series};
use crate::analyzers::sensors::{ExclusionThresholds, detect_stuck_parks, exclusion_report};
use crate::analyzers::types::{BikeRow, BucketSeries, CarRow, RelayRow, SeriesExport, SeriesPoint};
use crate::charts::rate_series_png;
use crate::output::Stage;
use crate::snapshot::{RawSnapshot, load_raw_snapshots, parse_bike_stations, parse_car_parks};
use crate::stats::{city_rate, mean_station_rate};

/// Lists the per-day CSV files with the given suffix, ordered by day
/// index. Day 10 must sort after day 2, so the index is parsed rather
/// than compared lexically.
pub fn day_files(data_dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut indexed = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if let Some(index) = name
            .strip_prefix("day_")
            .and_then(|rest| rest.strip_suffix(suffix))
            .and_then(|idx| idx.parse::<u32>().ok())
        {
            indexed.push((index, entry.path()));
        }
    }

    indexed.sort();
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Reads every deserializable row from one CSV file.
///
/// Returns the rows plus the count of rows that failed to deserialize;
/// a malformed row is dropped, never fatal.
pub fn load_rows<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize)> {
    let file =
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.deserialize() {
        match result {
            Ok(row) => rows.push(row),
            Err(_) => skipped += 1,
        }
    }
    Ok((rows, skipped))
}

/// Loads all rows of one measurement kind across every day file.
pub fn load_all_rows<T: DeserializeOwned>(data_dir: &Path, suffix: &str) -> Result<Vec<T>> {
    let mut all = Vec::new();
    for path in day_files(data_dir, suffix)? {
        let (rows, skipped) = load_rows(&path)?;
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "Dropped malformed CSV rows");
        }
        all.extend(rows);
    }
    Ok(all)
}

/// Runs the whole weekly analysis against one data directory.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn run_weekly(data_dir: &Path) -> Result<()> {
    let images_dir = data_dir.join("images");
    let series_dir = data_dir.join("series_global");
    std::fs::create_dir_all(data_dir)?;

    // All derived artifacts land together at the end of the run.
    let mut stage = Stage::new();

    // Stuck sensors first: every car aggregate below excludes them.
    let raw_cars = load_raw_snapshots(&data_dir.join("raw_car_parks.jsonl"))?;
    let thresholds = ExclusionThresholds::default();
    let stuck = detect_stuck_parks(&raw_cars, &thresholds);
    stage.json(
        &data_dir.join("excluded_car_parks.json"),
        &exclusion_report(&stuck, &thresholds),
    )?;
    info!(excluded = stuck.len(), "Stuck car park sensors excluded");

    let car_rows: Vec<CarRow> = load_all_rows(data_dir, "_cars.csv")?;
    let bike_rows: Vec<BikeRow> = load_all_rows(data_dir, "_bikes.csv")?;
    let relay_rows: Vec<RelayRow> = load_all_rows(data_dir, "_relays.csv")?;
    info!(
        car_rows = car_rows.len(),
        bike_rows = bike_rows.len(),
        relay_rows = relay_rows.len(),
        "Measurement rows loaded"
    );

    // City car series: recomputed from per-park rows so the exclusion
    // list applies; the recorded CITY rows are only a fallback when no
    // park rows survive.
    let mut city_points = mean_by_timestamp(park_observations(&car_rows, &stuck));
    if city_points.is_empty() {
        city_points = mean_by_timestamp(car_rows.iter().filter_map(|r| {
            if r.kind != "CITY" {
                return None;
            }
            Some((r.timestamp()?, r.occupancy?))
        }));
    }
    stage_series(
        &mut stage,
        &images_dir.join("cars_city.png"),
        &series_dir.join("cars_city.json"),
        "City car park occupancy",
        &city_points,
    )?;

    stage.json_compact(
        &series_dir.join("cars_daily.json"),
        &BucketSeries {
            title: "City car park occupancy - daily mean".to_string(),
            buckets: daily_means(&city_points),
        },
    )?;
    stage.json_compact(
        &series_dir.join("cars_hourly.json"),
        &BucketSeries {
            title: "City car park occupancy - hour of day".to_string(),
            buckets: hourly_profile(&city_points),
        },
    )?;

    let bike_points = mean_by_timestamp(bike_rows.iter().filter_map(|r| {
        if r.kind != "STATION" {
            return None;
        }
        Some((r.timestamp()?, r.occupancy?))
    }));
    stage_series(
        &mut stage,
        &images_dir.join("bikes_mean.png"),
        &series_dir.join("bikes_mean.json"),
        "Bike stations - mean slot occupancy",
        &bike_points,
    )?;

    let relay_points = mean_by_timestamp(relay_rows.iter().filter_map(|r| {
        if r.car_park != "SUMMARY" {
            return None;
        }
        Some((r.timestamp()?, r.relay_ok?))
    }));
    stage_series(
        &mut stage,
        &images_dir.join("relays_ok.png"),
        &series_dir.join("relays_ok.json"),
        "Park-and-ride relays - share available",
        &relay_points,
    )?;

    for (name, count) in saturation_ranking(&car_rows, &stuck).into_iter().take(10) {
        info!(park = %name, count, "Often saturated");
    }
    for (name, rate) in mean_occupancy_ranking(&car_rows, &stuck).into_iter().take(10) {
        info!(park = %name, mean_occupancy = format!("{rate:.3}"), "Busiest on average");
    }

    // Correlations come from the snapshot archives: exact timestamps,
    // with stuck sensors removed from the car side.
    let raw_bikes = load_raw_snapshots(&data_dir.join("raw_bike_stations.jsonl"))?;
    let car_series = car_rate_series(&raw_cars, &stuck);
    let bike_series = bike_rate_series(&raw_bikes);

    let summary = correlation::global_summary(&car_series, &bike_series);
    info!(
        correlation = ?summary.correlation,
        n_points = summary.n_points,
        "Global car-bike correlation"
    );
    stage.json(&data_dir.join("correlation_global.json"), &summary)?;

    stage.json_compact(
        &series_dir.join("corr_cars_bikes.json"),
        &correlation::rolling(&car_series, &bike_series, DEFAULT_WINDOW),
    )?;

    stage.publish()
}

/// City car rate per snapshot timestamp, excluding stuck sensors.
pub fn car_rate_series(snapshots: &[RawSnapshot], exclude: &BTreeSet<String>) -> Series {
    let mut series = Series::new();
    for snap in snapshots {
        let parks: Vec<_> = parse_car_parks(&snap.entities)
            .into_iter()
            .filter(|p| !exclude.contains(&p.name))
            .collect();
        if let Some(rate) = city_rate(&parks) {
            series.insert(snap.timestamp, rate);
        }
    }
    series
}

/// Mean station rate per snapshot timestamp.
pub fn bike_rate_series(snapshots: &[RawSnapshot]) -> Series {
    let mut series = Series::new();
    for snap in snapshots {
        if let Some(rate) = mean_station_rate(&parse_bike_stations(&snap.entities)) {
            series.insert(snap.timestamp, rate);
        }
    }
    series
}

/// Stages one global series as both a PNG chart and a JSON artifact.
fn stage_series(
    stage: &mut Stage,
    image: &Path,
    json: &Path,
    title: &str,
    points: &[SeriesPoint],
) -> Result<()> {
    let pairs: Vec<(DateTime<Utc>, f64)> =
        points.iter().map(|p| (p.timestamp, p.value)).collect();
    let image_tmp = stage.reserve(image)?;
    rate_series_png(&image_tmp, title, &pairs)?;

    stage.json_compact(
        json,
        &SeriesExport {
            title: title.to_string(),
            points: points.to_vec(),
        },
    )
}
