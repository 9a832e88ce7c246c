//! CSV export of the computed tables
//!
//! Each file is written to a temp file in the destination directory and then
//! renamed into place, so a failed export never leaves a partial file behind.

use crate::attach_rate::entries_to_dataframe;
use crate::error::{AttachError, Result};
use crate::session::AnalysisReport;
use polars::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

pub const FULL_TABLE_FILE: &str = "attach_rates_full.csv";

/// Files written by one export
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportPaths {
    pub full: Option<PathBuf>,
    pub per_key: Option<PathBuf>,
    pub pairs: Option<PathBuf>,
}

/// Keep key values usable as file names
pub fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn write_csv_atomic(df: &mut DataFrame, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    CsvWriter::new(tmp.as_file_mut())
        .include_header(true)
        .finish(df)?;
    tmp.persist(path).map_err(|e| AttachError::Io(e.error))?;

    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Write the full table, the per-key table and (when non-empty) the pair
/// table into `dir`.
pub fn export_report(report: &AnalysisReport, dir: &Path) -> Result<ExportPaths> {
    let mut paths = ExportPaths::default();

    let full_path = dir.join(FULL_TABLE_FILE);
    write_csv_atomic(&mut report.attach.to_dataframe()?, &full_path)?;
    paths.full = Some(full_path);

    let Some(key) = report.selection.key() else {
        return Ok(paths);
    };
    let stem = file_stem(key);

    let per_key_path = dir.join(format!("{}_attach_rates.csv", stem));
    let mut per_key = entries_to_dataframe(
        &report.top_options,
        report.attach.grouping,
        report.attach.attribute,
    )?;
    write_csv_atomic(&mut per_key, &per_key_path)?;
    paths.per_key = Some(per_key_path);

    if let Some(pairs) = report.pairs.as_ref().filter(|p| !p.is_empty()) {
        let pairs_path = dir.join(format!("{}_pair_counts.csv", stem));
        write_csv_atomic(&mut pairs.to_dataframe()?, &pairs_path)?;
        paths.pairs = Some(pairs_path);
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("M-100/B"), "M-100_B");
        assert_eq!(file_stem("FC 10"), "FC_10");
    }

    #[test]
    fn test_atomic_write_leaves_only_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut df = df!["a" => ["x", "y"], "b" => [1u64, 2]].unwrap();

        write_csv_atomic(&mut df, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("a,b"));
        assert_eq!(content.lines().count(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
