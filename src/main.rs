//! CLI entry point for the parkride pipeline.
//!
//! Provides the subcommands the scheduler runs: `measure` hourly, then
//! `weekly`, `export` and `map` once a day. Every step is self-contained
//! and safe to re-run; a failed run is simply retried on the next timer
//! tick.

mod sources;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use parkride::analyzers::analyzer::run_weekly;
use parkride::export::run_export;
use parkride::fetch::fetch_bytes;
use parkride::map::run_map;
use parkride::output::{append_jsonl, append_records};
use parkride::snapshot::{RawSnapshot, parse_bike_stations, parse_car_parks, parse_entities};
use parkride::stats::{
    BikeCsvRow, CarCsvRow, RelayCsvRow, RelayRules, RowStamp, city_rate, relay_ok,
};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "parkride")]
#[command(about = "Urban parking and bike-share occupancy pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take one portal snapshot and append it to the data store
    Measure {
        /// Data directory holding raw archives and artifacts
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Run the weekly analysis over the accumulated measurements
    Weekly {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Export the per-day CSVs as JSON for the dashboard
    Export {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Rebuild the maps, relay selection and per-entity artifacts
    Map {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Path of the combined map page
        #[arg(short, long, default_value = "map.html")]
        output: PathBuf,
    },
    /// Show the configured portal sources
    ListSources,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/parkride.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("parkride.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Measure { data_dir } => measure_round(&data_dir).await?,
        Commands::Weekly { data_dir } => run_weekly(&data_dir)?,
        Commands::Export { data_dir } => run_export(&data_dir)?,
        Commands::Map { data_dir, output } => run_map(&data_dir, &output)?,
        Commands::ListSources => list_sources()?,
    }

    Ok(())
}

/// 1-based index of `today` within the measurement campaign; names the
/// per-day CSV files.
fn day_index(today: NaiveDate, start: NaiveDate) -> i64 {
    (today - start).num_days() + 1
}

/// Fetches both portal endpoints, derives the measurement rows, and
/// appends everything to the per-day CSVs and raw JSONL archives.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
async fn measure_round(data_dir: &Path) -> Result<()> {
    let config = sources::PortalConfig::from_env()?;
    let client = config.build_client()?;
    std::fs::create_dir_all(data_dir)?;

    let now = Utc::now();
    let stamp = RowStamp::from_timestamp(now);
    let day = day_index(now.date_naive(), config.start_date);

    info!(day, cars = %config.cars.url, bikes = %config.bikes.url, "Fetching portal snapshot");
    let (car_bytes, bike_bytes) = tokio::try_join!(
        fetch_bytes(client.as_ref(), &config.cars.url),
        fetch_bytes(client.as_ref(), &config.bikes.url),
    )?;

    let car_entities = parse_entities(&car_bytes)?;
    let bike_entities = parse_entities(&bike_bytes)?;

    let parks = parse_car_parks(&car_entities);
    let stations = parse_bike_stations(&bike_entities);
    info!(
        car_entities = car_entities.len(),
        parks = parks.len(),
        bike_entities = bike_entities.len(),
        stations = stations.len(),
        "Snapshot parsed"
    );

    // Raw archives are appended before any derived rows.
    append_jsonl(
        &data_dir.join("raw_car_parks.jsonl"),
        &RawSnapshot {
            timestamp: now,
            entities: car_entities,
        },
    )?;
    append_jsonl(
        &data_dir.join("raw_bike_stations.jsonl"),
        &RawSnapshot {
            timestamp: now,
            entities: bike_entities,
        },
    )?;

    let mut car_rows = Vec::with_capacity(parks.len() + 1);
    if let Some(rate) = city_rate(&parks) {
        car_rows.push(CarCsvRow::city(&stamp, rate));
    }
    car_rows.extend(parks.iter().map(|p| CarCsvRow::park(&stamp, p)));
    append_records(&data_dir.join(format!("day_{day}_cars.csv")), &car_rows)?;

    let bike_rows: Vec<BikeCsvRow> = stations
        .iter()
        .map(|s| BikeCsvRow::station(&stamp, s))
        .collect();
    append_records(&data_dir.join(format!("day_{day}_bikes.csv")), &bike_rows)?;

    let rules = RelayRules::default();
    let mut relay_rows = Vec::with_capacity(parks.len() + 1);
    let mut ok_count = 0usize;
    for park in &parks {
        let ok = relay_ok(park, &stations, &rules);
        if ok {
            ok_count += 1;
        }
        relay_rows.push(RelayCsvRow::park(&stamp, &park.name, ok));
    }
    if !parks.is_empty() {
        relay_rows.push(RelayCsvRow::summary(
            &stamp,
            ok_count as f64 / parks.len() as f64,
        ));
    }
    append_records(&data_dir.join(format!("day_{day}_relays.csv")), &relay_rows)?;

    info!(
        car_rows = car_rows.len(),
        bike_rows = bike_rows.len(),
        relays_ok = ok_count,
        "Snapshot appended"
    );
    Ok(())
}

fn list_sources() -> Result<()> {
    let config = sources::PortalConfig::from_env()?;

    for source in [&config.cars, &config.bikes] {
        info!(
            name = source.name,
            url = %source.url,
            auth = %config.auth.describe(),
            "Source"
        );
    }
    info!(start_date = %config.start_date, "Campaign start date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_index_counts_from_one() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(day_index(start, start), 1);
        assert_eq!(
            day_index(NaiveDate::from_ymd_opt(2026, 1, 11).unwrap(), start),
            7
        );
    }
}
