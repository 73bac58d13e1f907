//! Federal highway crash stage
//!
//! One CSV per year, published with drifting schemas: older files only
//! carry the crash cause in `causa_acidente`, while newer ones keep the
//! text there and reuse `causa_principal` as a SIM/NAO flag. The stored
//! column is `causa_principal`, so whenever it holds a boolean the text
//! from `causa_acidente` replaces it. This stage also derives year and
//! month and backfills the injured total.

use std::path::Path;
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;
use tracing::{error, info, warn};
use viario_common::Result;

use crate::dataset::{CanonicalDataset, CleanValue};
use crate::load::BulkLoader;
use crate::reader::read_csv;
use crate::schema::{reconcile, SheetOutcome, CRASH_SCHEMA};
use crate::tables::CRASH_TABLE;

use super::{discover_files, StageSummary};

static FILE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(20\d{2})").expect("year pattern is valid"));

fn year_from_name(path: &Path) -> Option<i64> {
    let name = path.file_stem()?.to_str()?;
    FILE_YEAR_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn is_boolean_token(text: &str) -> bool {
    matches!(text, "SIM" | "NAO" | "NÃO" | "TRUE" | "FALSE")
}

/// Per-file patches applied after reconciliation
fn postprocess(dataset: &mut CanonicalDataset, file_year: Option<i64>) {
    let date_idx = dataset.column_index("data_inversa");
    let ano_idx = dataset.column_index("ano");
    let mes_idx = dataset.column_index("mes");
    let causa_idx = dataset.column_index("causa_acidente");
    let principal_idx = dataset.column_index("causa_principal");
    let feridos_idx = dataset.column_index("feridos");
    let leves_idx = dataset.column_index("feridos_leves");
    let graves_idx = dataset.column_index("feridos_graves");

    let feridos_missing = feridos_idx
        .map(|i| {
            dataset
                .rows
                .iter()
                .all(|r| r[i].as_int().unwrap_or(0) == 0)
        })
        .unwrap_or(false);

    for row in &mut dataset.rows {
        let date = date_idx.and_then(|i| match &row[i] {
            CleanValue::Date(d) => Some(*d),
            _ => None,
        });
        if let Some(i) = ano_idx {
            if row[i].as_int().unwrap_or(0) == 0 {
                if let Some(year) = file_year.or_else(|| date.map(|d| i64::from(d.year()))) {
                    row[i] = CleanValue::Int(year);
                }
            }
        }
        if let Some(i) = mes_idx {
            if row[i].as_int().unwrap_or(0) == 0 {
                if let Some(d) = date {
                    row[i] = CleanValue::Int(i64::from(d.month()));
                }
            }
        }
        // Newer extracts turned causa_principal into a SIM/NAO flag;
        // the stored column takes the text from causa_acidente then
        if let (Some(ci), Some(pi)) = (causa_idx, principal_idx) {
            let principal_is_bool =
                row[pi].as_text().map(is_boolean_token).unwrap_or(false);
            if principal_is_bool {
                row[pi] = row[ci].clone();
            }
        }
        if feridos_missing {
            if let (Some(fi), Some(li), Some(gi)) = (feridos_idx, leves_idx, graves_idx) {
                let total =
                    row[li].as_int().unwrap_or(0) + row[gi].as_int().unwrap_or(0);
                row[fi] = CleanValue::Int(total);
            }
        }
    }
}

/// Ingest every `acidentes*.csv` in the input directory
pub async fn run(input_dir: &Path, loader: &BulkLoader) -> Result<StageSummary> {
    let mut summary = StageSummary::new("crashes");
    let files = discover_files(input_dir, |n| {
        n.starts_with("acidentes") && n.ends_with(".csv")
    })?;
    info!(files = files.len(), "crash stage starting");

    let mut merged: Option<CanonicalDataset> = None;
    for path in &files {
        let table = match read_csv(path) {
            Ok(t) => t,
            Err(e) => {
                error!(path = %path.display(), error = %e, "unreadable crash file skipped");
                summary.failed += 1;
                continue;
            }
        };
        match reconcile(&table, &CRASH_SCHEMA) {
            SheetOutcome::Table(mut reconciled) => {
                postprocess(&mut reconciled.dataset, year_from_name(path));
                if reconciled.stats.total() > 0 {
                    info!(
                        path = %path.display(),
                        fallbacks = %reconciled.stats.summary(),
                        "cleaning substitutions"
                    );
                }
                match merged.as_mut() {
                    Some(acc) => {
                        if let Err(e) = acc.concat(reconciled.dataset) {
                            error!(path = %path.display(), error = %e, "incompatible file skipped");
                            summary.failed += 1;
                            continue;
                        }
                    }
                    None => merged = Some(reconciled.dataset),
                }
                summary.processed += 1;
            }
            SheetOutcome::Skipped { source, reason } => {
                warn!(%source, %reason, "crash file skipped");
                summary.skipped += 1;
            }
        }
    }

    let Some(dataset) = merged else {
        warn!("no usable crash input found");
        return Err(viario_common::ViarioError::NoUsableInput(
            summary.stage.to_string(),
        ));
    };
    let report = loader.load(&dataset, &CRASH_TABLE).await?;
    summary.reports.push(report);
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;
    use crate::reader::RawTable;
    use chrono::NaiveDate;

    #[test]
    fn test_year_from_name() {
        assert_eq!(year_from_name(Path::new("/x/acidentes2023_todas.csv")), Some(2023));
        assert_eq!(year_from_name(Path::new("/x/acidentes.csv")), None);
    }

    fn reconciled(headers: &[&str], rows: &[&[&str]]) -> CanonicalDataset {
        let table = RawTable::new(
            "test".to_string(),
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        );
        match reconcile(&table, &CRASH_SCHEMA) {
            SheetOutcome::Table(r) => r.dataset,
            SheetOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_postprocess_derives_year_and_month() {
        let mut ds = reconciled(
            &["data_inversa", "uf", "mortos"],
            &[&["15/03/2023", "SP", "1"]],
        );
        assert_eq!(ds.kind, DatasetKind::Crash);
        postprocess(&mut ds, None);
        let ano = ds.column_index("ano").unwrap();
        let mes = ds.column_index("mes").unwrap();
        assert_eq!(ds.rows[0][ano].as_int(), Some(2023));
        assert_eq!(ds.rows[0][mes].as_int(), Some(3));
    }

    #[test]
    fn test_postprocess_filename_year_wins() {
        let mut ds = reconciled(
            &["data_inversa", "uf"],
            &[&["15/03/2022", "SP"]],
        );
        postprocess(&mut ds, Some(2023));
        let ano = ds.column_index("ano").unwrap();
        assert_eq!(ds.rows[0][ano].as_int(), Some(2023));
    }

    #[test]
    fn test_postprocess_backfills_injured_total() {
        let mut ds = reconciled(
            &["uf", "feridos_leves", "feridos_graves"],
            &[&["SP", "3", "2"], &["RJ", "1", "0"]],
        );
        postprocess(&mut ds, Some(2023));
        let f = ds.column_index("feridos").unwrap();
        assert_eq!(ds.rows[0][f].as_int(), Some(5));
        assert_eq!(ds.rows[1][f].as_int(), Some(1));
    }

    #[test]
    fn test_postprocess_patches_boolean_principal_cause() {
        let mut ds = reconciled(
            &["uf", "causa_acidente", "causa_principal"],
            &[&["SP", "Falta de atenção", "Sim"], &["RJ", "Animais na pista", "Animais na pista"]],
        );
        postprocess(&mut ds, Some(2023));
        let p = ds.column_index("causa_principal").unwrap();
        assert_eq!(ds.rows[0][p].as_text(), Some("FALTA DE ATENÇÃO"));
        assert_eq!(ds.rows[1][p].as_text(), Some("ANIMAIS NA PISTA"));
    }

    #[test]
    fn test_postprocess_keeps_valid_date_fields() {
        let mut ds = reconciled(
            &["data_inversa", "uf", "ano", "mes"],
            &[&["2023-05-10", "BA", "2023", "5"]],
        );
        postprocess(&mut ds, None);
        let d = ds.column_index("data_inversa").unwrap();
        assert_eq!(
            ds.rows[0][d],
            CleanValue::Date(NaiveDate::from_ymd_opt(2023, 5, 10).unwrap())
        );
    }
}
