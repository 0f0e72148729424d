//! Occupancy heat layer and the park↔station correlation matrix.

use serde::Serialize;

use crate::analyzers::correlation::{Series, align};
use crate::analyzers::utility::pearson;

/// Minimum exact common timestamps before a matrix cell gets a value.
pub const MIN_CELL_POINTS: usize = 12;

/// Matrix size caps: the dashboard heatmap becomes unreadable past this.
pub const TOP_PARKS: usize = 30;
pub const TOP_STATIONS: usize = 40;

/// `heatmap_correlation.json`: rows are car parks, columns stations.
/// Cells without enough aligned points are `null`, with the count in
/// `n_points` either way.
#[derive(Debug, Serialize)]
pub struct HeatmapMatrix {
    pub title: String,
    pub method: String,
    pub aligned: String,
    pub min_points: usize,
    pub car_parks_count: usize,
    pub stations_count: usize,
    pub car_parks: Vec<String>,
    pub stations: Vec<String>,
    pub corr: Vec<Vec<Option<f64>>>,
    pub n_points: Vec<Vec<usize>>,
}

/// Picks the densest entities first when capping the matrix.
fn select_densest<'a>(
    entities: &'a [(String, &'a Series)],
    cap: usize,
) -> Vec<&'a (String, &'a Series)> {
    let mut sorted: Vec<_> = entities.iter().collect();
    sorted.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(cap);
    sorted
}

/// Correlates every selected park against every selected station.
pub fn correlation_matrix(
    parks: &[(String, &Series)],
    stations: &[(String, &Series)],
) -> HeatmapMatrix {
    let parks = select_densest(parks, TOP_PARKS);
    let stations = select_densest(stations, TOP_STATIONS);

    let mut corr = Vec::with_capacity(parks.len());
    let mut n_points = Vec::with_capacity(parks.len());

    for (_, park_series) in &parks {
        let mut corr_row = Vec::with_capacity(stations.len());
        let mut n_row = Vec::with_capacity(stations.len());

        for (_, station_series) in &stations {
            let aligned = align(park_series, station_series);
            n_row.push(aligned.len());

            if aligned.len() < MIN_CELL_POINTS {
                corr_row.push(None);
                continue;
            }
            let x: Vec<f64> = aligned.iter().map(|(_, a, _)| *a).collect();
            let y: Vec<f64> = aligned.iter().map(|(_, _, b)| *b).collect();
            corr_row.push(pearson(&x, &y));
        }

        corr.push(corr_row);
        n_points.push(n_row);
    }

    HeatmapMatrix {
        title: "Park / station occupancy correlation (Pearson)".to_string(),
        method: "pearson".to_string(),
        aligned: "exact_timestamp".to_string(),
        min_points: MIN_CELL_POINTS,
        car_parks_count: parks.len(),
        stations_count: stations.len(),
        car_parks: parks.iter().map(|(n, _)| n.clone()).collect(),
        stations: stations.iter().map(|(n, _)| n.clone()).collect(),
        corr,
        n_points,
    }
}
