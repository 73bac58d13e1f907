//! Geographic aggregation
//!
//! Rolls municipality/state level rows up into the five macro regions and
//! a country total. Aggregate rows are appended to the dataset and tagged
//! through the `nivel_localidade` column so readers can tell strata apart
//! without double counting.

use std::collections::BTreeMap;

use tracing::{info, warn};
use viario_common::{Result, ViarioError};

use crate::dataset::{CanonicalDataset, CleanValue};
use crate::schema::{schema_for_kind, DatasetSchema};

/// Column that tags each row's aggregation stratum
pub const STRATUM_COLUMN: &str = "nivel_localidade";

/// Label written into the state column of the country total row
pub const COUNTRY_LABEL: &str = "BRASIL";

/// Federation unit code to macro region
const UF_REGIONS: &[(&str, &str)] = &[
    ("AC", "Norte"),
    ("AP", "Norte"),
    ("AM", "Norte"),
    ("PA", "Norte"),
    ("RO", "Norte"),
    ("RR", "Norte"),
    ("TO", "Norte"),
    ("AL", "Nordeste"),
    ("BA", "Nordeste"),
    ("CE", "Nordeste"),
    ("MA", "Nordeste"),
    ("PB", "Nordeste"),
    ("PE", "Nordeste"),
    ("PI", "Nordeste"),
    ("RN", "Nordeste"),
    ("SE", "Nordeste"),
    ("DF", "Centro-Oeste"),
    ("GO", "Centro-Oeste"),
    ("MT", "Centro-Oeste"),
    ("MS", "Centro-Oeste"),
    ("ES", "Sudeste"),
    ("MG", "Sudeste"),
    ("RJ", "Sudeste"),
    ("SP", "Sudeste"),
    ("PR", "Sul"),
    ("RS", "Sul"),
    ("SC", "Sul"),
];

/// Aggregation strata, from finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalityStratum {
    Base,
    Region,
    Country,
}

impl LocalityStratum {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalityStratum::Base => "municipio",
            LocalityStratum::Region => "regiao",
            LocalityStratum::Country => "pais",
        }
    }
}

/// Region for a federation unit code, if known
pub fn region_of(uf: &str) -> Option<&'static str> {
    UF_REGIONS
        .iter()
        .find(|(code, _)| *code == uf)
        .map(|(_, region)| *region)
}

/// Rollup configuration for one dataset shape
///
/// `state_field` holds the federation unit code. Group fields keep their
/// values on aggregate rows; measure fields are summed; everything else
/// falls back to its schema default.
#[derive(Debug, Clone)]
pub struct GeoAggregator {
    pub state_field: String,
    pub group_fields: Vec<String>,
    pub measure_fields: Vec<String>,
}

/// Aggregation result with the count of rows whose state had no region
#[derive(Debug)]
pub struct GeoReport {
    pub dataset: CanonicalDataset,
    pub unmapped: BTreeMap<String, usize>,
    pub region_rows: usize,
    pub country_rows: usize,
}

impl GeoAggregator {
    pub fn new(
        state_field: impl Into<String>,
        group_fields: &[&str],
        measure_fields: &[&str],
    ) -> Self {
        Self {
            state_field: state_field.into(),
            group_fields: group_fields.iter().map(|s| s.to_string()).collect(),
            measure_fields: measure_fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Append region and country rollups to the dataset
    ///
    /// Only base-stratum rows feed the sums, and any aggregate rows from a
    /// previous pass are dropped first, so running the rollup again yields
    /// the same totals instead of compounding them.
    pub fn aggregate(&self, mut dataset: CanonicalDataset) -> Result<GeoReport> {
        let state_idx = dataset.column_index(&self.state_field).ok_or_else(|| {
            ViarioError::Parse(format!("state field '{}' not in dataset", self.state_field))
        })?;
        let group_idx: Vec<usize> = self
            .group_fields
            .iter()
            .map(|f| {
                dataset
                    .column_index(f)
                    .ok_or_else(|| ViarioError::Parse(format!("group field '{f}' not in dataset")))
            })
            .collect::<Result<_>>()?;
        let measure_idx: Vec<usize> = self
            .measure_fields
            .iter()
            .map(|f| {
                dataset.column_index(f).ok_or_else(|| {
                    ViarioError::Parse(format!("measure field '{f}' not in dataset"))
                })
            })
            .collect::<Result<_>>()?;

        dataset.add_column(
            STRATUM_COLUMN,
            CleanValue::Text(LocalityStratum::Base.as_str().to_string()),
        );
        let stratum_idx = dataset
            .column_index(STRATUM_COLUMN)
            .ok_or_else(|| ViarioError::Parse("stratum column missing".to_string()))?;
        dataset.retain(|row| {
            row[stratum_idx].as_text() == Some(LocalityStratum::Base.as_str())
        });

        // key: (group values, region) -> summed measures
        let mut region_sums: BTreeMap<(Vec<String>, String), Vec<i64>> = BTreeMap::new();
        let mut country_sums: BTreeMap<Vec<String>, Vec<i64>> = BTreeMap::new();
        let mut unmapped: BTreeMap<String, usize> = BTreeMap::new();

        for row in &dataset.rows {
            let state = row[state_idx].key_repr();
            let Some(region) = region_of(&state) else {
                *unmapped.entry(state).or_insert(0) += 1;
                continue;
            };
            let group_key: Vec<String> = group_idx.iter().map(|&i| row[i].key_repr()).collect();
            let measures: Vec<i64> = measure_idx
                .iter()
                .map(|&i| row[i].as_int().unwrap_or(0))
                .collect();

            let region_entry = region_sums
                .entry((group_key.clone(), region.to_string()))
                .or_insert_with(|| vec![0; measures.len()]);
            let country_entry = country_sums
                .entry(group_key)
                .or_insert_with(|| vec![0; measures.len()]);
            for (j, m) in measures.iter().enumerate() {
                region_entry[j] += m;
                country_entry[j] += m;
            }
        }

        if !unmapped.is_empty() {
            let total: usize = unmapped.values().sum();
            warn!(
                states = ?unmapped.keys().collect::<Vec<_>>(),
                rows = total,
                "rows with unmapped state excluded from rollups"
            );
        }

        let schema = schema_for_kind(dataset.kind);
        let region_rows = region_sums.len();
        let country_rows = country_sums.len();

        let mut aggregate_rows = Vec::with_capacity(region_rows + country_rows);
        for ((group_key, region), sums) in region_sums {
            aggregate_rows.push(self.build_row(
                &dataset,
                schema,
                state_idx,
                stratum_idx,
                &group_idx,
                &measure_idx,
                &group_key,
                &sums,
                &region,
                LocalityStratum::Region,
            ));
        }
        for (group_key, sums) in country_sums {
            aggregate_rows.push(self.build_row(
                &dataset,
                schema,
                state_idx,
                stratum_idx,
                &group_idx,
                &measure_idx,
                &group_key,
                &sums,
                COUNTRY_LABEL,
                LocalityStratum::Country,
            ));
        }
        dataset.rows.extend(aggregate_rows);

        info!(
            kind = dataset.kind.as_str(),
            region_rows,
            country_rows,
            "appended geographic rollups"
        );
        Ok(GeoReport {
            dataset,
            unmapped,
            region_rows,
            country_rows,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_row(
        &self,
        dataset: &CanonicalDataset,
        schema: Option<&DatasetSchema>,
        state_idx: usize,
        stratum_idx: usize,
        group_idx: &[usize],
        measure_idx: &[usize],
        group_key: &[String],
        sums: &[i64],
        locality: &str,
        stratum: LocalityStratum,
    ) -> Vec<CleanValue> {
        let mut row: Vec<CleanValue> = dataset
            .columns
            .iter()
            .map(|name| {
                schema
                    .and_then(|s| s.fields.iter().find(|f| f.name == *name))
                    .map(|f| f.kind.default_value())
                    .unwrap_or(CleanValue::Null)
            })
            .collect();
        for (slot, key) in group_idx.iter().zip(group_key) {
            // Group keys round-trip through text; numeric keys parse back
            row[*slot] = match key.parse::<i64>() {
                Ok(n) => CleanValue::Int(n),
                Err(_) if key.is_empty() => CleanValue::Null,
                Err(_) => CleanValue::Text(key.clone()),
            };
        }
        for (slot, sum) in measure_idx.iter().zip(sums) {
            row[*slot] = CleanValue::Int(*sum);
        }
        row[state_idx] = CleanValue::Text(locality.to_string());
        row[stratum_idx] = CleanValue::Text(stratum.as_str().to_string());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;

    fn population_dataset() -> CanonicalDataset {
        let mut ds = CanonicalDataset::new(
            DatasetKind::Population,
            vec![
                "ano".to_string(),
                "uf".to_string(),
                "cod_uf".to_string(),
                "cod_municipio".to_string(),
                "municipio".to_string(),
                "populacao".to_string(),
            ],
        );
        for (uf, pop) in [("SP", 100), ("SP", 50), ("RJ", 30), ("PR", 20)] {
            ds.rows.push(vec![
                CleanValue::Int(2024),
                CleanValue::Text(uf.to_string()),
                CleanValue::Int(35),
                CleanValue::Int(1),
                CleanValue::Text("CIDADE".to_string()),
                CleanValue::Int(pop),
            ]);
        }
        ds
    }

    fn rows_at(ds: &CanonicalDataset, stratum: &str) -> Vec<Vec<CleanValue>> {
        let idx = ds.column_index(STRATUM_COLUMN).unwrap();
        ds.rows
            .iter()
            .filter(|r| r[idx].as_text() == Some(stratum))
            .cloned()
            .collect()
    }

    #[test]
    fn test_region_table_covers_all_ufs() {
        assert_eq!(UF_REGIONS.len(), 27);
        for uf in crate::clean::ALL_UFS {
            assert!(region_of(uf).is_some(), "missing region for {uf}");
        }
        assert_eq!(region_of("SP"), Some("Sudeste"));
        assert_eq!(region_of("DF"), Some("Centro-Oeste"));
        assert_eq!(region_of("XX"), None);
    }

    #[test]
    fn test_rollup_sums_match_base() {
        let agg = GeoAggregator::new("uf", &[], &["populacao"]);
        let report = agg.aggregate(population_dataset()).unwrap();
        let ds = &report.dataset;
        let uf = ds.column_index("uf").unwrap();
        let pop = ds.column_index("populacao").unwrap();

        let regions = rows_at(ds, "regiao");
        assert_eq!(regions.len(), 2);
        let sudeste = regions
            .iter()
            .find(|r| r[uf].as_text() == Some("Sudeste"))
            .unwrap();
        assert_eq!(sudeste[pop].as_int(), Some(180));
        let sul = regions
            .iter()
            .find(|r| r[uf].as_text() == Some("Sul"))
            .unwrap();
        assert_eq!(sul[pop].as_int(), Some(20));

        let country = rows_at(ds, "pais");
        assert_eq!(country.len(), 1);
        assert_eq!(country[0][uf].as_text(), Some(COUNTRY_LABEL));
        assert_eq!(country[0][pop].as_int(), Some(200));
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let agg = GeoAggregator::new("uf", &[], &["populacao"]);
        let once = agg.aggregate(population_dataset()).unwrap().dataset;
        let twice = agg.aggregate(once.clone()).unwrap().dataset;
        assert_eq!(once.rows.len(), twice.rows.len());
        let pop = once.column_index("populacao").unwrap();
        let total = |ds: &CanonicalDataset| {
            rows_at(ds, "pais")
                .iter()
                .map(|r| r[pop].as_int().unwrap_or(0))
                .sum::<i64>()
        };
        assert_eq!(total(&once), total(&twice));
    }

    #[test]
    fn test_unmapped_state_excluded_but_kept() {
        let mut ds = population_dataset();
        ds.rows.push(vec![
            CleanValue::Int(2024),
            CleanValue::Text("ATLANTIS".to_string()),
            CleanValue::Int(0),
            CleanValue::Int(0),
            CleanValue::Text("CIDADE".to_string()),
            CleanValue::Int(999),
        ]);
        let agg = GeoAggregator::new("uf", &[], &["populacao"]);
        let report = agg.aggregate(ds).unwrap();
        assert_eq!(report.unmapped.get("ATLANTIS"), Some(&1));
        let pop = report.dataset.column_index("populacao").unwrap();
        let country = rows_at(&report.dataset, "pais");
        // Unmapped row is kept at base stratum but stays out of the totals
        assert_eq!(country[0][pop].as_int(), Some(200));
        assert_eq!(rows_at(&report.dataset, "municipio").len(), 5);
    }

    #[test]
    fn test_group_fields_partition_rollups() {
        let mut ds = CanonicalDataset::new(
            DatasetKind::Mortality,
            vec![
                "ano_uid".to_string(),
                "local_nome".to_string(),
                "total_anual".to_string(),
            ],
        );
        for (ano, uf, total) in [(2022, "SP", 10), (2023, "SP", 20), (2023, "BA", 5)] {
            ds.rows.push(vec![
                CleanValue::Int(ano),
                CleanValue::Text(uf.to_string()),
                CleanValue::Int(total),
            ]);
        }
        let agg = GeoAggregator::new("local_nome", &["ano_uid"], &["total_anual"]);
        let report = agg.aggregate(ds).unwrap();
        let dsr = &report.dataset;
        let ano = dsr.column_index("ano_uid").unwrap();
        let total = dsr.column_index("total_anual").unwrap();
        let country = rows_at(dsr, "pais");
        assert_eq!(country.len(), 2);
        let by_year: std::collections::BTreeMap<i64, i64> = country
            .iter()
            .map(|r| (r[ano].as_int().unwrap(), r[total].as_int().unwrap()))
            .collect();
        assert_eq!(by_year.get(&2022), Some(&10));
        assert_eq!(by_year.get(&2023), Some(&25));
    }
}
