//! Transport mortality stage
//!
//! Health ministry extracts arrive as workbooks with one sheet per year
//! plus summary and notes sheets, or as loose CSVs. Every sheet is judged
//! on its own: data sheets reconcile, the rest are skipped. Rows append to
//! the destination because extracts land one year at a time.

use std::path::Path;

use tracing::{error, info, warn};
use viario_common::Result;

use crate::dataset::{CanonicalDataset, CleanValue};
use crate::geo::GeoAggregator;
use crate::load::BulkLoader;
use crate::reader::{read_csv, read_workbook, RawTable};
use crate::schema::{reconcile, SheetOutcome, MONTH_FIELDS, MORTALITY_SCHEMA};
use crate::tables::MORTALITY_TABLE;

use super::{discover_files, is_workbook_name, StageSummary};

/// Dimensions that keep their values on region and country rollup rows
const GROUP_FIELDS: &[&str] = &[
    "ano_uid",
    "ano_nome",
    "indicador_uid",
    "indicador_nome",
    "categoria_uid",
    "categoria_nome",
    "estatistica_uid",
    "estatistica_nome",
    "lococor_uid",
    "lococor_nome",
    "atestante_uid",
    "atestante_nome",
    "grupoetario_uid",
    "grupoetario_nome",
    "racacor_uid",
    "racacor_nome",
    "sexo_uid",
    "sexo_nome",
];

fn matches_mortality_name(name: &str) -> bool {
    let relevant = name.contains("obito") || name.contains("ms");
    let known_ext = name.ends_with(".csv") || is_workbook_name(name);
    relevant && known_ext
}

/// Sheet-level patches applied after reconciliation
///
/// Source footers ("Fonte: MS/SVS...") reconcile into rows whose year uid
/// is zero; real years never are. The footer filter only applies when the
/// sheet actually shipped a year uid column: month-only sheets default
/// every `ano_uid` to zero and would be emptied wholesale. Year labels
/// carry revision asterisks. Sheets without a total column get it
/// recomputed from the months.
fn postprocess(dataset: &mut CanonicalDataset, has_year_uid: bool) {
    if has_year_uid {
        if let Some(i) = dataset.column_index("ano_uid") {
            dataset.retain(|row| row[i].as_int().unwrap_or(0) > 0);
        }
    }
    let ano_nome = dataset.column_index("ano_nome");
    let total_idx = dataset.column_index("total_anual");
    let month_idx: Vec<usize> = MONTH_FIELDS
        .iter()
        .filter_map(|m| dataset.column_index(m))
        .collect();
    for row in &mut dataset.rows {
        if let Some(i) = ano_nome {
            if let CleanValue::Text(label) = &row[i] {
                if label.contains('*') {
                    row[i] = CleanValue::Text(label.replace('*', "").trim().to_string());
                }
            }
        }
        if let Some(ti) = total_idx {
            if row[ti].as_int().unwrap_or(0) == 0 {
                let sum: i64 = month_idx.iter().map(|&m| row[m].as_int().unwrap_or(0)).sum();
                if sum > 0 {
                    row[ti] = CleanValue::Int(sum);
                }
            }
        }
    }
}

fn units_for(path: &Path) -> Result<Vec<RawTable>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if is_workbook_name(&name) {
        read_workbook(path, 0)
    } else {
        Ok(vec![read_csv(path)?])
    }
}

/// Ingest every mortality extract in the input directory
pub async fn run(input_dir: &Path, loader: &BulkLoader) -> Result<StageSummary> {
    let mut summary = StageSummary::new("mortality");
    let files = discover_files(input_dir, matches_mortality_name)?;
    info!(files = files.len(), "mortality stage starting");

    let mut merged: Option<CanonicalDataset> = None;
    for path in &files {
        let units = match units_for(path) {
            Ok(u) => u,
            Err(e) => {
                error!(path = %path.display(), error = %e, "unreadable mortality file skipped");
                summary.failed += 1;
                continue;
            }
        };
        for table in units {
            match reconcile(&table, &MORTALITY_SCHEMA) {
                SheetOutcome::Table(mut reconciled) => {
                    let has_year_uid = !reconciled.missing_fields.contains(&"ano_uid");
                    postprocess(&mut reconciled.dataset, has_year_uid);
                    match merged.as_mut() {
                        Some(acc) => {
                            if let Err(e) = acc.concat(reconciled.dataset) {
                                error!(source = %table.source, error = %e, "incompatible sheet skipped");
                                summary.failed += 1;
                                continue;
                            }
                        }
                        None => merged = Some(reconciled.dataset),
                    }
                    summary.processed += 1;
                }
                SheetOutcome::Skipped { source, reason } => {
                    info!(%source, %reason, "sheet skipped");
                    summary.skipped += 1;
                }
            }
        }
    }

    let Some(dataset) = merged else {
        warn!("no usable mortality input found");
        return Err(viario_common::ViarioError::NoUsableInput(
            summary.stage.to_string(),
        ));
    };
    let mut measures: Vec<&str> = MONTH_FIELDS.to_vec();
    measures.push("total_anual");
    let aggregator = GeoAggregator::new("local_nome", GROUP_FIELDS, &measures);
    let report = aggregator.aggregate(dataset)?;
    let load_report = loader.load(&report.dataset, &MORTALITY_TABLE).await?;
    summary.reports.push(load_report);
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;

    #[test]
    fn test_file_name_match() {
        assert!(matches_mortality_name("obitos_transporte_2023.xlsx"));
        assert!(matches_mortality_name("dados_ms.csv"));
        assert!(matches_mortality_name("extrato_ms_2022.ods"));
        assert!(!matches_mortality_name("acidentes2023.csv"));
        assert!(!matches_mortality_name("obitos.pdf"));
    }

    fn dataset_with(rows: Vec<(i64, &str, i64, i64)>) -> CanonicalDataset {
        // (ano_uid, ano_nome, janeiro, total_anual)
        let mut ds = CanonicalDataset::new(
            DatasetKind::Mortality,
            vec![
                "ano_uid".to_string(),
                "ano_nome".to_string(),
                "janeiro".to_string(),
                "total_anual".to_string(),
            ],
        );
        for (uid, nome, jan, total) in rows {
            ds.rows.push(vec![
                CleanValue::Int(uid),
                CleanValue::Text(nome.to_string()),
                CleanValue::Int(jan),
                CleanValue::Int(total),
            ]);
        }
        ds
    }

    #[test]
    fn test_postprocess_drops_footer_rows() {
        let mut ds = dataset_with(vec![(2023, "2023", 10, 120), (0, "FONTE: MS/SVS", 0, 0)]);
        postprocess(&mut ds, true);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.rows[0][0].as_int(), Some(2023));
    }

    #[test]
    fn test_postprocess_strips_revision_asterisk() {
        let mut ds = dataset_with(vec![(2023, "2023*", 10, 120)]);
        postprocess(&mut ds, true);
        assert_eq!(ds.rows[0][1].as_text(), Some("2023"));
    }

    #[test]
    fn test_postprocess_recomputes_missing_total() {
        let mut ds = dataset_with(vec![(2023, "2023", 10, 0), (2022, "2022", 5, 80)]);
        postprocess(&mut ds, true);
        assert_eq!(ds.rows[0][3].as_int(), Some(10));
        // A shipped total is never overwritten
        assert_eq!(ds.rows[1][3].as_int(), Some(80));
    }

    #[test]
    fn test_postprocess_keeps_month_only_sheet_rows() {
        // Sheets accepted by the month branch of the signature default
        // ano_uid to zero; the footer filter must not empty them
        let table = crate::reader::RawTable::new(
            "test".to_string(),
            vec!["Local (nome)".to_string(), "Jan".to_string()],
            vec![vec!["São Paulo".to_string(), "10".to_string()]],
        );
        let reconciled = match reconcile(&table, &MORTALITY_SCHEMA) {
            SheetOutcome::Table(r) => r,
            SheetOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason}"),
        };
        assert!(reconciled.missing_fields.contains(&"ano_uid"));
        let mut ds = reconciled.dataset;
        postprocess(&mut ds, false);
        assert_eq!(ds.len(), 1);
    }
}
