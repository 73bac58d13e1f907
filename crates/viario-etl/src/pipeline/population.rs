//! Census population stage
//!
//! IBGE publishes population workbooks with a title row above the headers
//! and totalizer rows (country, regions, federation units) mixed into the
//! municipal data. Both layouts are probed, totalizers are dropped since
//! the rollup recomputes them, and the seven-digit IBGE identifier is
//! rebuilt from its two code parts.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info, warn};
use viario_common::Result;

use crate::clean::PLACEHOLDER;
use crate::dataset::{CanonicalDataset, CleanValue};
use crate::geo::GeoAggregator;
use crate::load::BulkLoader;
use crate::reader::{read_workbook, RawTable};
use crate::schema::{reconcile, SheetOutcome, POPULATION_SCHEMA};
use crate::tables::POPULATION_TABLE;

use super::{discover_files, is_workbook_name, StageSummary};

static FILE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(20\d{2})").expect("year pattern is valid"));

fn matches_population_name(name: &str) -> bool {
    let relevant =
        name.contains("municipio") || name.contains("localidade") || name.starts_with("pop");
    relevant && is_workbook_name(name)
}

/// Read the workbook probing the header row position
///
/// IBGE files carry a title row, so headers usually sit on the second
/// row; cleaner exports start at the first. The first position where any
/// sheet satisfies the population signature wins.
fn read_units(path: &Path) -> Result<Vec<RawTable>> {
    let mut fallback = Vec::new();
    for header_row in [1usize, 0] {
        let tables = read_workbook(path, header_row)?;
        let usable = tables.iter().any(|t| {
            matches!(
                reconcile(t, &POPULATION_SCHEMA),
                SheetOutcome::Table(_)
            )
        });
        if usable {
            return Ok(tables);
        }
        if header_row == 1 {
            fallback = tables;
        }
    }
    Ok(fallback)
}

fn is_totalizer(municipio: &str) -> bool {
    municipio == "BRASIL"
        || municipio.starts_with("REGIAO")
        || municipio.starts_with("REGIÃO")
        || municipio.contains("UNIDADE DA FEDERA")
}

/// Post-reconciliation cleanup for one file's merged rows
fn postprocess(dataset: &mut CanonicalDataset, file_year: Option<i64>) {
    let mun_idx = dataset.column_index("municipio");
    let cod_mun_idx = dataset.column_index("cod_municipio");
    let cod_uf_idx = dataset.column_index("cod_uf");
    let ano_idx = dataset.column_index("ano");

    if let (Some(mi), Some(ci)) = (mun_idx, cod_mun_idx) {
        dataset.retain(|row| {
            let name = row[mi].as_text().unwrap_or(PLACEHOLDER);
            let cod = row[ci].as_int().unwrap_or(0);
            name != PLACEHOLDER && !is_totalizer(name) && cod > 0
        });
    }

    dataset.add_column("id_ibge", CleanValue::Null);
    let id_idx = dataset.column_index("id_ibge");
    for row in &mut dataset.rows {
        if let Some(i) = ano_idx {
            if row[i].as_int().unwrap_or(0) == 0 {
                if let Some(year) = file_year {
                    row[i] = CleanValue::Int(year);
                }
            }
        }
        let cod_uf = cod_uf_idx.and_then(|i| row[i].as_int()).unwrap_or(0);
        let cod_mun = cod_mun_idx.and_then(|i| row[i].as_int()).unwrap_or(0);
        let padded = format!("{cod_mun:05}");
        if let (Some(ii), Some(ci)) = (id_idx, cod_mun_idx) {
            row[ii] = CleanValue::Text(format!("{cod_uf:02}{padded}"));
            row[ci] = CleanValue::Text(padded);
        }
    }
}

fn year_from_name(path: &Path) -> Option<i64> {
    let name = path.file_stem()?.to_str()?;
    FILE_YEAR_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Ingest every population workbook in the input directory
pub async fn run(input_dir: &Path, loader: &BulkLoader) -> Result<StageSummary> {
    let mut summary = StageSummary::new("population");
    let files = discover_files(input_dir, matches_population_name)?;
    info!(files = files.len(), "population stage starting");

    let mut merged: Option<CanonicalDataset> = None;
    for path in &files {
        let units = match read_units(path) {
            Ok(u) => u,
            Err(e) => {
                error!(path = %path.display(), error = %e, "unreadable population file skipped");
                summary.failed += 1;
                continue;
            }
        };
        let mut file_dataset: Option<CanonicalDataset> = None;
        let mut file_units = 0;
        for table in units {
            match reconcile(&table, &POPULATION_SCHEMA) {
                SheetOutcome::Table(reconciled) => {
                    match file_dataset.as_mut() {
                        Some(acc) => {
                            if let Err(e) = acc.concat(reconciled.dataset) {
                                error!(source = %table.source, error = %e, "incompatible sheet skipped");
                                summary.failed += 1;
                                continue;
                            }
                        }
                        None => file_dataset = Some(reconciled.dataset),
                    }
                    file_units += 1;
                }
                SheetOutcome::Skipped { source, reason } => {
                    info!(%source, %reason, "sheet skipped");
                    summary.skipped += 1;
                }
            }
        }
        if let Some(mut ds) = file_dataset {
            postprocess(&mut ds, year_from_name(path));
            summary.processed += file_units;
            match merged.as_mut() {
                Some(acc) => {
                    if let Err(e) = acc.concat(ds) {
                        error!(path = %path.display(), error = %e, "incompatible file skipped");
                        summary.failed += 1;
                    }
                }
                None => merged = Some(ds),
            }
        }
    }

    let Some(dataset) = merged else {
        warn!("no usable population input found");
        return Err(viario_common::ViarioError::NoUsableInput(
            summary.stage.to_string(),
        ));
    };
    let aggregator = GeoAggregator::new("uf", &["ano"], &["populacao"]);
    let report = aggregator.aggregate(dataset)?;
    let load_report = loader.load(&report.dataset, &POPULATION_TABLE).await?;
    summary.reports.push(load_report);
    summary.log();
    Ok(summary)
}
