//! JSON exports for the dashboard.
//!
//! Concatenates the per-day CSVs into one JSON array per measurement
//! kind. The arrays are the dashboard's only data feed, so their shape
//! is part of the external contract: the row fields plus `source_file`,
//! identical keys whatever the data volume, `[]` when nothing has been
//! collected yet.

use std::path::Path;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::analyzers::analyzer::{day_files, load_rows};
use crate::analyzers::types::{BikeRow, CarRow, RelayRow};
use crate::output::Stage;

/// A CSV row tagged with the day file it came from.
#[derive(Debug, Serialize)]
struct ExportedRow<T: Serialize> {
    #[serde(flatten)]
    row: T,
    source_file: String,
}

fn export_kind<T>(stage: &mut Stage, data_dir: &Path, suffix: &str, out_name: &str) -> Result<usize>
where
    T: Serialize + DeserializeOwned,
{
    let mut exported: Vec<ExportedRow<T>> = Vec::new();

    for path in day_files(data_dir, suffix)? {
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // An unreadable day file loses that day, not the export.
        let (rows, skipped) = match load_rows::<T>(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable day file");
                continue;
            }
        };
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "Dropped malformed CSV rows");
        }

        exported.extend(rows.into_iter().map(|row| ExportedRow {
            row,
            source_file: source_file.clone(),
        }));
    }

    let count = exported.len();
    stage.json(&data_dir.join(out_name), &exported)?;
    Ok(count)
}

/// Writes the three dashboard exports under `data_dir`.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn run_export(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let mut stage = Stage::new();

    let cars = export_kind::<CarRow>(&mut stage, data_dir, "_cars.csv", "export_cars.json")?;
    let bikes = export_kind::<BikeRow>(&mut stage, data_dir, "_bikes.csv", "export_bikes.json")?;
    let relays =
        export_kind::<RelayRow>(&mut stage, data_dir, "_relays.csv", "export_relays.json")?;
    stage.publish()?;

    info!(cars, bikes, relays, "Dashboard exports written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const CAR_HEADER: &str = "date,time,kind,name,free,total,occupancy\n";

    #[test]
    fn test_empty_data_dir_exports_empty_arrays() {
        let dir = scratch("parkride_test_export_empty");

        run_export(&dir).unwrap();

        for name in ["export_cars.json", "export_bikes.json", "export_relays.json"] {
            let content = fs::read_to_string(dir.join(name)).unwrap();
            let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
            assert!(parsed.is_empty(), "{name} should be an empty array");
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rows_are_tagged_with_source_file() {
        let dir = scratch("parkride_test_export_tag");
        fs::write(
            dir.join("day_1_cars.csv"),
            format!("{CAR_HEADER}2026-01-05,08:00:00,PARK,A,10,100,0.9\n"),
        )
        .unwrap();
        fs::write(
            dir.join("day_2_cars.csv"),
            format!("{CAR_HEADER}2026-01-06,08:00:00,PARK,A,20,100,0.8\n"),
        )
        .unwrap();

        run_export(&dir).unwrap();

        let content = fs::read_to_string(dir.join("export_cars.json")).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["source_file"], "day_1_cars.csv");
        assert_eq!(rows[1]["source_file"], "day_2_cars.csv");
        assert_eq!(rows[0]["name"], "A");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_schema_keys_are_stable_across_volumes() {
        let small = scratch("parkride_test_export_small");
        fs::write(
            small.join("day_1_cars.csv"),
            format!("{CAR_HEADER}2026-01-05,08:00:00,PARK,A,10,100,0.9\n"),
        )
        .unwrap();
        run_export(&small).unwrap();

        let large = scratch("parkride_test_export_large");
        let mut body = CAR_HEADER.to_string();
        for day in 1..=7 {
            for hour in 0..24 {
                body.push_str(&format!("2026-01-{day:02},{hour:02}:00:00,PARK,A,10,100,0.9\n"));
            }
        }
        fs::write(large.join("day_1_cars.csv"), &body).unwrap();
        run_export(&large).unwrap();

        let keys = |dir: &PathBuf| -> BTreeSet<String> {
            let content = fs::read_to_string(dir.join("export_cars.json")).unwrap();
            let rows: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
            rows[0].as_object().unwrap().keys().cloned().collect()
        };
        assert_eq!(keys(&small), keys(&large));

        fs::remove_dir_all(&small).unwrap();
        fs::remove_dir_all(&large).unwrap();
    }

    #[test]
    fn test_malformed_rows_are_dropped_not_fatal() {
        let dir = scratch("parkride_test_export_bad");
        fs::write(
            dir.join("day_1_relays.csv"),
            "date,time,car_park,relay_ok\n\
             2026-01-05,08:00:00,A,1\n\
             2026-01-05,08:00:00,B,broken\n\
             2026-01-05,08:00:00,SUMMARY,0.5\n",
        )
        .unwrap();

        run_export(&dir).unwrap();

        let content = fs::read_to_string(dir.join("export_relays.json")).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(rows.len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }
}
