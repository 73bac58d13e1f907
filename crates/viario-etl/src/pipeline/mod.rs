//! Pipeline stages
//!
//! One module per source family. Each stage discovers its input files,
//! reconciles them unit by unit (a unit is a file, or a sheet inside a
//! workbook), and hands the merged dataset to the loader. A bad unit is
//! counted and skipped; it never aborts the stage.

pub mod crashes;
pub mod management;
pub mod mortality;
pub mod population;

use std::path::{Path, PathBuf};

use tracing::info;
use viario_common::{Result, ViarioError};

use crate::load::LoadReport;

/// Outcome of one stage run
#[derive(Debug, Default)]
pub struct StageSummary {
    pub stage: &'static str,
    /// Units reconciled into the output
    pub processed: usize,
    /// Units skipped for structural reasons (informational)
    pub skipped: usize,
    /// Units that errored
    pub failed: usize,
    pub reports: Vec<LoadReport>,
}

impl StageSummary {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Default::default()
        }
    }

    /// True when something went wrong but the stage still landed data
    pub fn is_partial(&self) -> bool {
        self.failed > 0 || self.reports.iter().any(|r| !r.is_complete())
    }

    pub fn rows_loaded(&self) -> u64 {
        self.reports.iter().map(|r| r.rows_loaded).sum()
    }

    pub fn log(&self) {
        info!(
            stage = self.stage,
            processed = self.processed,
            skipped = self.skipped,
            failed = self.failed,
            rows_loaded = self.rows_loaded(),
            partial = self.is_partial(),
            "stage finished"
        );
    }
}

/// Files in `dir` whose name matches the predicate, sorted for stable
/// processing order
pub fn discover_files<F>(dir: &Path, predicate: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    if !dir.is_dir() {
        return Err(ViarioError::InputDirNotFound(dir.display().to_string()));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| predicate(&n.to_lowercase()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// True for the spreadsheet extensions the workbook reader understands
pub fn is_workbook_name(name: &str) -> bool {
    name.ends_with(".xlsx") || name.ends_with(".xls") || name.ends_with(".ods")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_discover_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["acidentes2023.csv", "acidentes2022.csv", "notas.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let files = discover_files(dir.path(), |n| {
            n.starts_with("acidentes") && n.ends_with(".csv")
        })
        .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["acidentes2022.csv", "acidentes2023.csv"]);
    }

    #[test]
    fn test_discover_files_missing_dir() {
        let err = discover_files(Path::new("/nonexistent-dir"), |_| true);
        assert!(matches!(err, Err(ViarioError::InputDirNotFound(_))));
    }

    #[test]
    fn test_is_workbook_name() {
        assert!(is_workbook_name("obitos.xlsx"));
        assert!(is_workbook_name("pop.ods"));
        assert!(!is_workbook_name("dados.csv"));
    }

    #[test]
    fn test_stage_summary_partial() {
        let mut s = StageSummary::new("t");
        assert!(!s.is_partial());
        s.failed = 1;
        assert!(s.is_partial());
    }
}
