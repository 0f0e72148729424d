//! Car↔bike occupancy correlation.
//!
//! Both the global coefficient and the rolling curve align the two
//! series on exact common timestamps; timestamps present on only one
//! side drop out, never interpolated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::analyzers::types::{CorrelationSummary, RollingCorrelation, SeriesPoint};
use crate::analyzers::utility::pearson;

/// Minimum aligned points before the global coefficient is reported.
pub const MIN_GLOBAL_POINTS: usize = 5;

/// Rolling window length in aligned points.
pub const DEFAULT_WINDOW: usize = 12;

pub type Series = BTreeMap<DateTime<Utc>, f64>;

/// Aligns two series on their exact common timestamps, chronologically.
pub fn align(a: &Series, b: &Series) -> Vec<(DateTime<Utc>, f64, f64)> {
    a.iter()
        .filter_map(|(ts, &va)| b.get(ts).map(|&vb| (*ts, va, vb)))
        .collect()
}

/// Pearson over all aligned points; `correlation` is `null` below
/// [`MIN_GLOBAL_POINTS`].
pub fn global_summary(cars: &Series, bikes: &Series) -> CorrelationSummary {
    let aligned = align(cars, bikes);

    let correlation = if aligned.len() < MIN_GLOBAL_POINTS {
        None
    } else {
        let x: Vec<f64> = aligned.iter().map(|(_, a, _)| *a).collect();
        let y: Vec<f64> = aligned.iter().map(|(_, _, b)| *b).collect();
        pearson(&x, &y)
    };

    CorrelationSummary {
        correlation,
        n_points: aligned.len(),
        method: "pearson".to_string(),
        aligned: "exact_timestamp".to_string(),
    }
}

/// Pearson over each trailing window of aligned points; each emitted
/// point is stamped with the window's last timestamp. Windows where the
/// coefficient is undefined (constant values) are omitted.
pub fn rolling(cars: &Series, bikes: &Series, window: usize) -> RollingCorrelation {
    let aligned = align(cars, bikes);

    let mut points = Vec::new();
    if aligned.len() >= window.max(MIN_GLOBAL_POINTS) {
        let x: Vec<f64> = aligned.iter().map(|(_, a, _)| *a).collect();
        let y: Vec<f64> = aligned.iter().map(|(_, _, b)| *b).collect();

        for end in window..=aligned.len() {
            let start = end - window;
            if let Some(r) = pearson(&x[start..end], &y[start..end]) {
                points.push(SeriesPoint {
                    timestamp: aligned[end - 1].0,
                    value: r,
                });
            }
        }
    }

    RollingCorrelation {
        title: "Car ↔ bike occupancy correlation (rolling)".to_string(),
        window,
        n_points: aligned.len(),
        aligned: "exact_timestamp".to_string(),
        method: "pearson".to_string(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h % 24, (h / 24) * 5, 0).unwrap()
    }

    fn series<I: IntoIterator<Item = (u32, f64)>>(items: I) -> Series {
        items.into_iter().map(|(h, v)| (ts(h), v)).collect()
    }

    #[test]
    fn test_align_keeps_only_common_timestamps() {
        let a = series([(8, 1.0), (9, 2.0), (10, 3.0)]);
        let b = series([(9, 5.0), (10, 6.0), (11, 7.0)]);
        let aligned = align(&a, &b);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0], (ts(9), 2.0, 5.0));
    }

    #[test]
    fn test_global_summary_below_minimum_is_null() {
        let a = series([(8, 1.0), (9, 2.0)]);
        let b = series([(8, 2.0), (9, 4.0)]);
        let summary = global_summary(&a, &b);
        assert_eq!(summary.correlation, None);
        assert_eq!(summary.n_points, 2);
        assert_eq!(summary.method, "pearson");
    }

    #[test]
    fn test_global_summary_detects_inverse_coupling() {
        let a = series((0..10).map(|h| (h, h as f64 / 10.0)));
        let b = series((0..10).map(|h| (h, 1.0 - h as f64 / 10.0)));
        let summary = global_summary(&a, &b);
        let r = summary.correlation.unwrap();
        assert!((r + 1.0).abs() < 1e-9);
        assert_eq!(summary.n_points, 10);
    }

    #[test]
    fn test_rolling_emits_one_point_per_full_window() {
        let a = series((0..20).map(|h| (h, (h as f64).sin().abs())));
        let b = series((0..20).map(|h| (h, 1.0 - (h as f64).sin().abs())));
        let rolled = rolling(&a, &b, 12);
        assert_eq!(rolled.n_points, 20);
        // 20 aligned points, window 12: windows end at points 12..=20.
        assert_eq!(rolled.points.len(), 9);
        assert!(rolled.points.iter().all(|p| (p.value + 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_rolling_with_short_series_has_no_points() {
        let a = series((0..5).map(|h| (h, h as f64)));
        let b = series((0..5).map(|h| (h, h as f64)));
        let rolled = rolling(&a, &b, 12);
        assert!(rolled.points.is_empty());
        assert_eq!(rolled.window, 12);
    }
}
