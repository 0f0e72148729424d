//! Persistence for measurement rows and derived artifacts.
//!
//! The raw stores (per-day CSVs, JSONL archives) are append-only.
//! Derived artifacts go through a [`Stage`]: each file is written to a
//! temp sibling and nothing is renamed into place until the step has
//! produced its full set, so a failed run leaves every prior artifact
//! untouched.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Appends a batch of records to a CSV file with one open/flush cycle.
/// No-op for an empty batch; never creates a headerless empty file.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, count = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Appends one JSON line to a JSONL archive.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Staged publication of one run's derived artifacts.
///
/// Every file is first written to a hidden temp sibling; [`Stage::publish`]
/// renames the whole set into place. Dropping an unpublished stage
/// removes its temp files.
#[derive(Default)]
pub struct Stage {
    pending: Vec<(PathBuf, PathBuf)>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an artifact path and returns the temp sibling to write
    /// into. Parent directories are created here.
    pub fn reserve(&mut self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("artifact path has no file name: {}", path.display()))?;
        // Hidden prefix rather than a suffix: writers that pick an
        // encoding from the file extension must still see it.
        let tmp = path.with_file_name(format!(".stage.{file_name}"));

        self.pending.push((tmp.clone(), path.to_path_buf()));
        Ok(tmp)
    }

    /// Stages `value` as pretty-printed JSON.
    pub fn json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(value)?;
        body.push(b'\n');
        self.bytes(path, &body)
    }

    /// Stages `value` as compact JSON. Used for the point series the
    /// dashboard loads in bulk.
    pub fn json_compact<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<()> {
        self.bytes(path, &serde_json::to_vec(value)?)
    }

    /// Stages a text artifact (HTML pages).
    pub fn text(&mut self, path: &Path, content: &str) -> Result<()> {
        self.bytes(path, content.as_bytes())
    }

    fn bytes(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self.reserve(path)?;
        fs::write(&tmp, bytes)?;
        Ok(())
    }

    /// Renames every staged file into place. Reserved paths whose temp
    /// file was never produced (a skipped chart) are dropped silently.
    pub fn publish(mut self) -> Result<()> {
        let count = self.pending.len();
        for (tmp, dest) in std::mem::take(&mut self.pending) {
            if !tmp.exists() {
                continue;
            }
            fs::rename(&tmp, &dest)
                .with_context(|| format!("failed to publish artifact {}", dest.display()))?;
        }
        debug!(count, "Artifacts published");
        Ok(())
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        for (tmp, _) in &self.pending {
            let _ = fs::remove_file(tmp);
        }
    }
}
