// Export/import file handling
//
// The store only produces and consumes text. Reading and writing the
// actual files happens here.

use chrono::NaiveDate;
use eyre::{Context, Result, eyre};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// `todo-tasks-<YYYY-MM-DD>.json`
pub fn export_filename(date: NaiveDate) -> String {
    format!("todo-tasks-{}.json", date.format("%Y-%m-%d"))
}

/// Write an export document into `dir`, returning the file path
pub fn write_export(dir: &Path, contents: &str, date: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(dir).context("Failed to create export directory")?;

    let path = dir.join(export_filename(date));
    fs::write(&path, contents).context(format!("Failed to write {}", path.display()))?;

    info!(path = ?path, bytes = contents.len(), "Wrote export file");
    Ok(path)
}

/// Read an import file into memory
pub fn read_import(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(eyre!("Import file not found: {}", path.display()));
    }
    fs::read_to_string(path).context(format!("Error reading file {}", path.display()))
}
