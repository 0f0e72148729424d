//! The unified map build.
//!
//! Rebuilds every geographic artifact from the raw snapshot archives:
//! per-entity series and charts, the entity catalog, the relay
//! selection, the heat layer, and the combined interactive map page.

pub mod heatmap;
pub mod page;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzers::correlation::Series;
use crate::analyzers::types::{EntitySeries, SeriesPoint};
use crate::charts::rate_series_png;
use crate::geo::Coords;
use crate::map::page::{DEFAULT_CENTER, DEFAULT_ZOOM, Marker, html_escape};
use crate::output::Stage;
use crate::relay::{RelayCriteria, RelayEndpoint, select_relays};
use crate::snapshot::{
    BikeStationState, CarParkState, RawSnapshot, load_raw_snapshots, parse_bike_stations,
    parse_car_parks,
};

/// One entry of `catalog.json`. The `series` path is relative to the
/// data directory root; the dashboard resolves it against its own copy.
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub series: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// `catalog.json`: every entity with a series artifact.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub car_parks: Vec<CatalogEntry>,
    pub stations: Vec<CatalogEntry>,
}

#[derive(Debug, Serialize)]
struct LastUpdate {
    last_update: DateTime<Utc>,
}

/// Relay pairs as inlined into the map pages: line endpoints plus a
/// pre-rendered popup.
#[derive(Debug, Serialize)]
struct RelayLine {
    car_park_lat: f64,
    car_park_lon: f64,
    station_lat: f64,
    station_lon: f64,
    popup: String,
}

/// Everything observed about one entity across the archive.
struct History<T> {
    latest: T,
    coords: Option<Coords>,
    points: Series,
}

fn collect_park_histories(snapshots: &[RawSnapshot]) -> BTreeMap<String, History<CarParkState>> {
    let mut histories: BTreeMap<String, History<CarParkState>> = BTreeMap::new();
    for snap in snapshots {
        for park in parse_car_parks(&snap.entities) {
            let occupancy = park.occupancy();
            match histories.get_mut(&park.name) {
                Some(h) => {
                    // Latest state wins; coordinates survive from any
                    // snapshot that carried them.
                    if park.coords.is_some() {
                        h.coords = park.coords;
                    }
                    h.latest = park;
                    h.points.insert(snap.timestamp, occupancy);
                }
                None => {
                    let mut points = Series::new();
                    points.insert(snap.timestamp, occupancy);
                    histories.insert(
                        park.name.clone(),
                        History {
                            coords: park.coords,
                            latest: park,
                            points,
                        },
                    );
                }
            }
        }
    }
    histories
}

fn collect_station_histories(
    snapshots: &[RawSnapshot],
) -> BTreeMap<String, History<BikeStationState>> {
    let mut histories: BTreeMap<String, History<BikeStationState>> = BTreeMap::new();
    for snap in snapshots {
        for station in parse_bike_stations(&snap.entities) {
            let occupancy = station.slot_occupancy();
            match histories.get_mut(&station.name) {
                Some(h) => {
                    if station.coords.is_some() {
                        h.coords = station.coords;
                    }
                    h.latest = station;
                    h.points.insert(snap.timestamp, occupancy);
                }
                None => {
                    let mut points = Series::new();
                    points.insert(snap.timestamp, occupancy);
                    histories.insert(
                        station.name.clone(),
                        History {
                            coords: station.coords,
                            latest: station,
                            points,
                        },
                    );
                }
            }
        }
    }
    histories
}

/// Turns an entity name into a safe artifact file stem.
fn file_slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn series_points(points: &Series) -> Vec<SeriesPoint> {
    points
        .iter()
        .map(|(&timestamp, &value)| SeriesPoint { timestamp, value })
        .collect()
}

/// Points of the most recent calendar day in the series.
fn last_day_points(points: &Series) -> Vec<(DateTime<Utc>, f64)> {
    let Some(last_day) = points.keys().next_back().map(|t| t.date_naive()) else {
        return Vec::new();
    };
    points
        .iter()
        .filter(|(t, _)| t.date_naive() == last_day)
        .map(|(&t, &v)| (t, v))
        .collect()
}

struct EntityArtifacts {
    series_rel: String,
    daily_rel: Option<String>,
    global_rel: Option<String>,
}

/// Stages the series JSON and charts for one entity; returns the
/// relative paths that will exist after publication.
fn stage_entity_artifacts(
    stage: &mut Stage,
    data_dir: &Path,
    prefix: &str,
    name: &str,
    points: &Series,
) -> Result<EntityArtifacts> {
    let slug = file_slug(name);
    let series_rel = format!("series/{prefix}_{slug}.json");
    stage.json_compact(
        &data_dir.join(&series_rel),
        &EntitySeries {
            name: name.to_string(),
            column: "occupancy".to_string(),
            points: series_points(points),
        },
    )?;

    let all: Vec<(DateTime<Utc>, f64)> = points.iter().map(|(&t, &v)| (t, v)).collect();
    let daily = last_day_points(points);

    let daily_rel = format!("images/{prefix}_{slug}_daily.png");
    let daily_tmp = stage.reserve(&data_dir.join(&daily_rel))?;
    let daily_rel =
        rate_series_png(&daily_tmp, &format!("{name} - last day"), &daily)?.then_some(daily_rel);

    let global_rel = format!("images/{prefix}_{slug}_global.png");
    let global_tmp = stage.reserve(&data_dir.join(&global_rel))?;
    let global_rel =
        rate_series_png(&global_tmp, &format!("{name} - full period"), &all)?.then_some(global_rel);

    Ok(EntityArtifacts {
        series_rel,
        daily_rel,
        global_rel,
    })
}

fn popup_images(web_prefix: &str, artifacts: &EntityArtifacts) -> String {
    let mut html = String::new();
    if let Some(rel) = &artifacts.daily_rel {
        html.push_str(&format!(
            "<hr><b>Last day</b><br><img src=\"{web_prefix}/{rel}\" width=\"300\">"
        ));
    }
    if let Some(rel) = &artifacts.global_rel {
        html.push_str(&format!(
            "<hr><b>Full period</b><br><img src=\"{web_prefix}/{rel}\" width=\"300\">"
        ));
    }
    html
}

fn park_popup(park: &CarParkState, web_prefix: &str, artifacts: &EntityArtifacts) -> String {
    format!(
        "<div style=\"width: 320px;\">\
           <h4 style=\"margin:0;\">Car park {name}</h4><hr>\
           <b>Free spots:</b> {free}<br>\
           <b>Capacity:</b> {total}<br>\
           <b>Occupancy:</b> {occ:.1}%<br>\
           <a href=\"{web_prefix}/{series}\" target=\"_blank\">Series (JSON)</a>\
           {images}\
         </div>",
        name = html_escape(&park.name),
        free = park.free as i64,
        total = park.total as i64,
        occ = park.occupancy() * 100.0,
        series = artifacts.series_rel,
        images = popup_images(web_prefix, artifacts),
    )
}

fn station_popup(
    station: &BikeStationState,
    web_prefix: &str,
    artifacts: &EntityArtifacts,
) -> String {
    format!(
        "<div style=\"width: 320px;\">\
           <h4 style=\"margin:0;\">Bike station {name}</h4><hr>\
           <b>Bikes available:</b> {bikes}<br>\
           <b>Free slots:</b> {slots}<br>\
           <b>Total slots:</b> {total}<br>\
           <b>Slot occupancy:</b> {occ:.1}%<br>\
           <a href=\"{web_prefix}/{series}\" target=\"_blank\">Series (JSON)</a>\
           {images}\
         </div>",
        name = html_escape(&station.name),
        bikes = station.bikes as i64,
        slots = station.free_slots as i64,
        total = station.total as i64,
        occ = station.slot_occupancy() * 100.0,
        series = artifacts.series_rel,
        images = popup_images(web_prefix, artifacts),
    )
}

/// Builds every map artifact from the raw archives under `data_dir` and
/// publishes the combined page at `map_path` (with `relays.html` and
/// `heatmap.html` as siblings).
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn run_map(data_dir: &Path, map_path: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;

    // One stage for the full artifact set; nothing replaces a prior
    // artifact until everything has rendered.
    let mut stage = Stage::new();

    let raw_cars = load_raw_snapshots(&data_dir.join("raw_car_parks.jsonl"))?;
    let raw_bikes = load_raw_snapshots(&data_dir.join("raw_bike_stations.jsonl"))?;

    let parks = collect_park_histories(&raw_cars);
    let stations = collect_station_histories(&raw_bikes);
    info!(
        parks = parks.len(),
        stations = stations.len(),
        "Entity histories rebuilt from raw archives"
    );

    // Asset links in popups are relative to where the HTML pages live;
    // the scheduler runs from the repository root with a relative data
    // directory.
    let web_prefix = data_dir.to_string_lossy().to_string();

    let last_update = parks
        .values()
        .flat_map(|h| h.points.keys().copied())
        .chain(stations.values().flat_map(|h| h.points.keys().copied()))
        .max();
    if let Some(ts) = last_update {
        stage.json(
            &data_dir.join("last_update.json"),
            &LastUpdate { last_update: ts },
        )?;
    }

    let mut catalog = Catalog::default();
    let mut park_markers = Vec::new();
    let mut park_endpoints = Vec::new();

    for (name, history) in &parks {
        let artifacts = stage_entity_artifacts(&mut stage, data_dir, "park", name, &history.points)?;
        catalog.car_parks.push(CatalogEntry {
            name: name.clone(),
            series: artifacts.series_rel.clone(),
            lat: history.coords.map(|c| c.lat),
            lon: history.coords.map(|c| c.lon),
        });
        if let Some(coords) = history.coords {
            park_markers.push(Marker {
                lat: coords.lat,
                lon: coords.lon,
                popup: park_popup(&history.latest, &web_prefix, &artifacts),
            });
            park_endpoints.push(RelayEndpoint {
                name: name.clone(),
                coords,
                series_path: artifacts.series_rel,
                points: history.points.clone(),
            });
        }
    }

    let mut station_markers = Vec::new();
    let mut station_endpoints = Vec::new();

    for (name, history) in &stations {
        let artifacts =
            stage_entity_artifacts(&mut stage, data_dir, "station", name, &history.points)?;
        catalog.stations.push(CatalogEntry {
            name: name.clone(),
            series: artifacts.series_rel.clone(),
            lat: history.coords.map(|c| c.lat),
            lon: history.coords.map(|c| c.lon),
        });
        if let Some(coords) = history.coords {
            station_markers.push(Marker {
                lat: coords.lat,
                lon: coords.lon,
                popup: station_popup(&history.latest, &web_prefix, &artifacts),
            });
            station_endpoints.push(RelayEndpoint {
                name: name.clone(),
                coords,
                series_path: artifacts.series_rel,
                points: history.points.clone(),
            });
        }
    }

    stage.json(&data_dir.join("catalog.json"), &catalog)?;

    // Relay selection over every located entity.
    let selection = select_relays(&park_endpoints, &station_endpoints, &RelayCriteria::default());
    info!(
        candidates = selection.count_total,
        kept = selection.items.len(),
        "Relay selection"
    );
    stage.json(&data_dir.join("relevant_relays.json"), &selection)?;

    let relay_lines: Vec<RelayLine> = selection
        .items
        .iter()
        .map(|p| RelayLine {
            car_park_lat: p.car_park_lat,
            car_park_lon: p.car_park_lon,
            station_lat: p.station_lat,
            station_lon: p.station_lon,
            popup: format!(
                "<b>{}</b> ↔ <b>{}</b><br>{:.0} m, r = {:.2} over {} points",
                html_escape(&p.car_park),
                html_escape(&p.station),
                p.distance_m,
                p.correlation,
                p.n_points,
            ),
        })
        .collect();
    let relay_lines_json = serde_json::to_string(&relay_lines)?;

    // Heat layer: latest occupancy at every located park.
    let heat_points: Vec<[f64; 3]> = parks
        .values()
        .filter_map(|h| {
            h.coords
                .map(|c| [c.lat, c.lon, h.latest.occupancy()])
        })
        .collect();

    // Correlation matrix for the dashboard heatmap page.
    let park_series: Vec<(String, &Series)> = parks
        .iter()
        .map(|(n, h)| (n.clone(), &h.points))
        .collect();
    let station_series: Vec<(String, &Series)> = stations
        .iter()
        .map(|(n, h)| (n.clone(), &h.points))
        .collect();
    stage.json(
        &data_dir.join("heatmap_correlation.json"),
        &heatmap::correlation_matrix(&park_series, &station_series),
    )?;

    let center = map_center(&park_endpoints, &station_endpoints);

    // Combined page: markers, heat, relays, layer control.
    let mut layers = String::new();
    layers.push_str(&page::marker_layer_js("parkLayer", &park_markers)?);
    layers.push_str(&page::marker_layer_js("stationLayer", &station_markers)?);
    layers.push_str(&page::heat_layer_js("heatLayer", &heat_points)?);
    layers.push_str(&page::relay_layer_js("relayLayer", &relay_lines_json)?);
    layers.push_str(&page::layer_control_js(&[
        ("Car parks", "parkLayer"),
        ("Bike stations", "stationLayer"),
        ("Occupancy heat", "heatLayer"),
        ("Relays", "relayLayer"),
    ])?);
    stage.text(
        map_path,
        &page::render_page("Parking and bike-share map", center, DEFAULT_ZOOM, &layers),
    )?;

    let mut heat_only = String::new();
    heat_only.push_str(&page::heat_layer_js("heatLayer", &heat_points)?);
    stage.text(
        &map_path.with_file_name("heatmap.html"),
        &page::render_page("Car park occupancy heatmap", center, DEFAULT_ZOOM, &heat_only),
    )?;

    let mut relays_only = String::new();
    relays_only.push_str(&page::relay_layer_js("relayLayer", &relay_lines_json)?);
    stage.text(
        &map_path.with_file_name("relays.html"),
        &page::render_page("Relevant park-and-ride relays", center, DEFAULT_ZOOM, &relays_only),
    )?;

    stage.publish()?;
    info!(map = %map_path.display(), "Map artifacts published");
    Ok(())
}

/// Mean position of all located entities, or the configured default
/// when nothing carries coordinates.
fn map_center(parks: &[RelayEndpoint], stations: &[RelayEndpoint]) -> (f64, f64) {
    let coords: Vec<Coords> = parks
        .iter()
        .chain(stations.iter())
        .map(|e| e.coords)
        .collect();
    if coords.is_empty() {
        return DEFAULT_CENTER;
    }
    let n = coords.len() as f64;
    (
        coords.iter().map(|c| c.lat).sum::<f64>() / n,
        coords.iter().map(|c| c.lon).sum::<f64>() / n,
    )
}
