//! Row and artifact types used by the weekly analysis and the exporter.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

fn parse_stamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?;
    Some(date.and_time(time).and_utc())
}

/// A row deserialized from a `day_<n>_cars.csv` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarRow {
    pub date: String,
    pub time: String,
    pub kind: String,
    pub name: String,
    pub free: i64,
    pub total: i64,
    pub occupancy: Option<f64>,
}

impl CarRow {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_stamp(&self.date, &self.time)
    }
}

/// A row deserialized from a `day_<n>_bikes.csv` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BikeRow {
    pub date: String,
    pub time: String,
    pub kind: String,
    pub name: String,
    pub bikes: i64,
    pub free_slots: i64,
    pub total: i64,
    pub occupancy: Option<f64>,
}

impl BikeRow {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_stamp(&self.date, &self.time)
    }
}

/// A row deserialized from a `day_<n>_relays.csv` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRow {
    pub date: String,
    pub time: String,
    pub car_park: String,
    pub relay_ok: Option<f64>,
}

impl RelayRow {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_stamp(&self.date, &self.time)
    }
}

/// One timestamped value of an exported series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A global series artifact under `series_global/`, one curve for the
/// dashboard's interactive charts.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesExport {
    pub title: String,
    pub points: Vec<SeriesPoint>,
}

/// A per-entity series artifact under `series/`, linked from map popups.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntitySeries {
    pub name: String,
    pub column: String,
    pub points: Vec<SeriesPoint>,
}

/// The thresholds that flagged each excluded sensor, echoed into the
/// artifact so the dashboard can display why a park is missing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub min_points: usize,
    pub eps_std: f64,
    pub round_for_unique: i32,
    pub max_unique_values: usize,
}

/// `excluded_car_parks.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExcludedParks {
    pub rule: ExclusionRule,
    pub count_excluded: usize,
    pub excluded: Vec<String>,
}

/// `correlation_global.json`: Pearson between the city car rate and the
/// mean bike rate, `null` when too few aligned points exist.
#[derive(Debug, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub correlation: Option<f64>,
    pub n_points: usize,
    pub method: String,
    pub aligned: String,
}

/// `series_global/corr_cars_bikes.json`: the rolling-window correlation
/// curve. `points` is empty when the aligned series is shorter than the
/// window.
#[derive(Debug, Serialize, Deserialize)]
pub struct RollingCorrelation {
    pub title: String,
    pub window: usize,
    pub n_points: usize,
    pub aligned: String,
    pub method: String,
    pub points: Vec<SeriesPoint>,
}

/// One time bucket (a calendar day or an hour of day) with its mean.
#[derive(Debug, Serialize, Deserialize)]
pub struct BucketPoint {
    pub bucket: String,
    pub mean: f64,
    pub count: usize,
}

/// A bucketed aggregate artifact (daily means, hour-of-day profile).
#[derive(Debug, Serialize, Deserialize)]
pub struct BucketSeries {
    pub title: String,
    pub buckets: Vec<BucketPoint>,
}
