//! Stuck-sensor detection.
//!
//! Some park occupancy sensors freeze and report the same count for
//! days. The weekly analysis rebuilds each park's occupancy series from
//! the raw snapshot archive and excludes the ones that barely move.

use std::collections::{BTreeMap, BTreeSet};

use crate::analyzers::types::{ExcludedParks, ExclusionRule};
use crate::analyzers::utility::{mean, round_to, stddev};
use crate::snapshot::{RawSnapshot, parse_car_parks};

/// Detection thresholds. A park is excluded only once it has enough
/// points to judge; short histories are given the benefit of the doubt.
#[derive(Debug, Clone)]
pub struct ExclusionThresholds {
    pub min_points: usize,
    pub eps_std: f64,
    pub round_digits: i32,
    pub max_unique_values: usize,
}

impl Default for ExclusionThresholds {
    fn default() -> Self {
        Self {
            min_points: 20,
            eps_std: 0.001,
            round_digits: 3,
            max_unique_values: 2,
        }
    }
}

impl ExclusionThresholds {
    pub fn as_rule(&self) -> ExclusionRule {
        ExclusionRule {
            min_points: self.min_points,
            eps_std: self.eps_std,
            round_for_unique: self.round_digits,
            max_unique_values: self.max_unique_values,
        }
    }
}

/// Returns the names of car parks whose occupancy series looks frozen:
/// near-zero standard deviation, or at most a couple of distinct values
/// after rounding away float noise.
pub fn detect_stuck_parks(
    snapshots: &[RawSnapshot],
    thresholds: &ExclusionThresholds,
) -> BTreeSet<String> {
    let mut series_by_name: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for snap in snapshots {
        for park in parse_car_parks(&snap.entities) {
            series_by_name
                .entry(park.name.clone())
                .or_default()
                .push(park.occupancy());
        }
    }

    let mut stuck = BTreeSet::new();

    for (name, values) in series_by_name {
        if values.len() < thresholds.min_points {
            continue;
        }

        let sd = stddev(&values, mean(&values));

        let unique: BTreeSet<_> = values
            .iter()
            .map(|v| round_to(*v, thresholds.round_digits).to_bits())
            .collect();

        if sd <= thresholds.eps_std || unique.len() <= thresholds.max_unique_values {
            stuck.insert(name);
        }
    }

    stuck
}

/// Builds the `excluded_car_parks.json` artifact body.
pub fn exclusion_report(
    stuck: &BTreeSet<String>,
    thresholds: &ExclusionThresholds,
) -> ExcludedParks {
    ExcludedParks {
        rule: thresholds.as_rule(),
        count_excluded: stuck.len(),
        excluded: stuck.iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn snapshot_with_rate(hour: u32, name: &str, free: i64) -> RawSnapshot {
        RawSnapshot {
            timestamp: Utc
                .with_ymd_and_hms(2026, 1, 5, hour % 24, (hour / 24) % 60, 0)
                .unwrap(),
            entities: vec![json!({
                "name": {"value": name},
                "status": {"value": "Open"},
                "availableSpotNumber": {"value": free},
                "totalSpotNumber": {"value": 100},
            })],
        }
    }

    #[test]
    fn test_frozen_sensor_is_excluded() {
        let snaps: Vec<_> = (0..25).map(|h| snapshot_with_rate(h, "Frozen", 40)).collect();
        let stuck = detect_stuck_parks(&snaps, &ExclusionThresholds::default());
        assert!(stuck.contains("Frozen"));
    }

    #[test]
    fn test_live_sensor_is_kept() {
        let snaps: Vec<_> = (0..25)
            .map(|h| snapshot_with_rate(h, "Live", (h as i64 * 3) % 90))
            .collect();
        let stuck = detect_stuck_parks(&snaps, &ExclusionThresholds::default());
        assert!(stuck.is_empty());
    }

    #[test]
    fn test_short_history_is_not_judged() {
        let snaps: Vec<_> = (0..5).map(|h| snapshot_with_rate(h, "Frozen", 40)).collect();
        let stuck = detect_stuck_parks(&snaps, &ExclusionThresholds::default());
        assert!(stuck.is_empty());
    }

    #[test]
    fn test_two_value_flapper_is_excluded() {
        // Alternates between exactly two readings: stddev is well above
        // eps but the distinct-value rule catches it.
        let snaps: Vec<_> = (0..30)
            .map(|h| snapshot_with_rate(h, "Flapper", if h % 2 == 0 { 20 } else { 60 }))
            .collect();
        let stuck = detect_stuck_parks(&snaps, &ExclusionThresholds::default());
        assert!(stuck.contains("Flapper"));
    }

    #[test]
    fn test_exclusion_report_is_sorted() {
        let mut stuck = BTreeSet::new();
        stuck.insert("b".to_string());
        stuck.insert("a".to_string());
        let report = exclusion_report(&stuck, &ExclusionThresholds::default());
        assert_eq!(report.count_excluded, 2);
        assert_eq!(report.excluded, vec!["a", "b"]);
    }
}
