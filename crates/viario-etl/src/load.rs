//! Bulk loading
//!
//! Loads a [`CanonicalDataset`] into Postgres through parallel chunk
//! workers. Each chunk runs on its own task with its own connection, so a
//! failed chunk is isolated: its rows are lost for this run, the other
//! chunks land, and the report says so. Index creation waits for every
//! chunk to finish.

use std::ops::Range;

use chrono::NaiveDate;
use futures::future;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, PgPool, QueryBuilder};
use tracing::{error, info, warn};
use viario_common::Result;

use crate::dataset::{CanonicalDataset, CleanValue};

/// Postgres bind parameter hard limit per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Upper bound on rows per INSERT statement
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

/// Column types supported by destination tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    DoublePrecision,
    Date,
    Text,
    Varchar(u16),
}

impl SqlType {
    pub fn ddl(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(n) => format!("VARCHAR({n})"),
        }
    }
}

/// Whether a load replaces the destination table or appends to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
}

/// Contract for one destination table
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    pub write_mode: WriteMode,
    /// Add a BIGSERIAL `id` primary key
    pub surrogate_key: bool,
    pub columns: &'static [(&'static str, SqlType)],
    /// (index name, column) pairs created after all chunks finish
    pub indexes: &'static [(&'static str, &'static str)],
}

/// Load lifecycle, reported for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Prepared,
    TableReady,
    ChunksDispatched,
    Partial,
    Complete,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Prepared => "prepared",
            LoadState::TableReady => "table_ready",
            LoadState::ChunksDispatched => "chunks_dispatched",
            LoadState::Partial => "partial",
            LoadState::Complete => "complete",
        }
    }
}

/// Outcome of one table load
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub table: String,
    pub state: LoadState,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub rows_loaded: u64,
    pub rows_failed: u64,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.state == LoadState::Complete
    }
}

/// A bind value already coerced to its destination column type
///
/// Null is carried inside the typed option so the driver declares the
/// right parameter type; an untyped null fails at prepare time.
#[derive(Debug, Clone)]
enum BindValue {
    I32(Option<i32>),
    I64(Option<i64>),
    F64(Option<f64>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
}

fn text_of(value: &CleanValue) -> Option<String> {
    match value {
        CleanValue::Text(s) => Some(s.clone()),
        CleanValue::Int(i) => Some(i.to_string()),
        CleanValue::Float(f) => Some(f.to_string()),
        CleanValue::Date(d) => Some(d.to_string()),
        CleanValue::Null => None,
    }
}

fn coerce(value: &CleanValue, ty: SqlType) -> BindValue {
    match ty {
        SqlType::Integer => BindValue::I32(value.as_int().map(|i| i as i32).or(Some(0))),
        SqlType::BigInt => BindValue::I64(value.as_int().or(Some(0))),
        SqlType::DoublePrecision => BindValue::F64(value.as_float().or(Some(0.0))),
        SqlType::Date => BindValue::Date(match value {
            CleanValue::Date(d) => Some(*d),
            _ => None,
        }),
        SqlType::Text => BindValue::Text(text_of(value)),
        // Truncate rather than trip the column length at insert time
        SqlType::Varchar(n) => BindValue::Text(
            text_of(value).map(|s| s.chars().take(n as usize).collect()),
        ),
    }
}

/// Project dataset rows onto the table's columns, in table order
///
/// Dataset columns with no table counterpart are dropped; table columns
/// the dataset lacks bind as typed nulls.
fn project(dataset: &CanonicalDataset, spec: &TableSpec) -> Vec<Vec<BindValue>> {
    let slots: Vec<(Option<usize>, SqlType)> = spec
        .columns
        .iter()
        .map(|(name, ty)| (dataset.column_index(name), *ty))
        .collect();
    dataset
        .rows
        .iter()
        .map(|row| {
            slots
                .iter()
                .map(|(idx, ty)| match idx {
                    Some(i) => coerce(&row[*i], *ty),
                    None => coerce(&CleanValue::Null, *ty),
                })
                .collect()
        })
        .collect()
}

/// Split `0..total` into `parts` contiguous ranges, remainder spread left
fn partition(total: usize, parts: usize) -> Vec<Range<usize>> {
    if total == 0 || parts == 0 {
        return Vec::new();
    }
    let parts = parts.min(total);
    let base = total / parts;
    let extra = total % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

fn insert_sql_prefix(spec: &TableSpec) -> String {
    let cols: Vec<&str> = spec.columns.iter().map(|(name, _)| *name).collect();
    format!("INSERT INTO {} ({}) ", spec.table, cols.join(", "))
}

/// Insert one chunk over a dedicated connection, batching statements so
/// each stays under the bind parameter limit
async fn insert_chunk(
    db_url: String,
    spec: TableSpec,
    chunk_id: usize,
    rows: Vec<Vec<BindValue>>,
) -> std::result::Result<u64, (u64, sqlx::Error)> {
    let mut conn = PgConnection::connect(&db_url)
        .await
        .map_err(|e| (rows.len() as u64, e))?;

    let ncols = spec.columns.len().max(1);
    let batch_size = (MAX_BIND_PARAMS / ncols).clamp(1, MAX_ROWS_PER_STATEMENT);
    let prefix = insert_sql_prefix(&spec);

    let mut inserted: u64 = 0;
    for batch in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(&prefix);
        qb.push_values(batch.iter(), |mut b, row| {
            for value in row {
                match value {
                    BindValue::I32(v) => b.push_bind(*v),
                    BindValue::I64(v) => b.push_bind(*v),
                    BindValue::F64(v) => b.push_bind(*v),
                    BindValue::Date(v) => b.push_bind(*v),
                    BindValue::Text(v) => b.push_bind(v.clone()),
                };
            }
        });
        if let Err(e) = qb.build().execute(&mut conn).await {
            let remaining = rows.len() as u64 - inserted;
            return Err((remaining, e));
        }
        inserted += batch.len() as u64;
    }
    info!(table = spec.table, chunk_id, rows = inserted, "chunk loaded");
    Ok(inserted)
}

/// Parallel chunked loader bound to one database
pub struct BulkLoader {
    pool: PgPool,
    db_url: String,
    workers: usize,
}

impl BulkLoader {
    pub fn new(pool: PgPool, db_url: impl Into<String>) -> Self {
        Self {
            pool,
            db_url: db_url.into(),
            workers: Self::default_workers(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// One worker fewer than the machine's parallelism, at least one
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    fn create_table_sql(spec: &TableSpec) -> String {
        let mut cols: Vec<String> = Vec::with_capacity(spec.columns.len() + 1);
        if spec.surrogate_key {
            cols.push("id BIGSERIAL PRIMARY KEY".to_string());
        }
        for (name, ty) in spec.columns {
            cols.push(format!("{name} {}", ty.ddl()));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            spec.table,
            cols.join(", ")
        )
    }

    async fn ensure_table(&self, spec: &TableSpec) -> Result<()> {
        if spec.write_mode == WriteMode::Replace {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", spec.table))
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(&Self::create_table_sql(spec))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_indexes(&self, spec: &TableSpec) -> Result<()> {
        for (name, column) in spec.indexes {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {name} ON {} ({column})",
                spec.table
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Load a dataset into its destination table
    ///
    /// Never returns an error for chunk failures; those surface in the
    /// report. Errors are reserved for the table setup itself.
    pub async fn load(&self, dataset: &CanonicalDataset, spec: &TableSpec) -> Result<LoadReport> {
        let mut state = LoadState::Prepared;
        info!(
            table = spec.table,
            rows = dataset.len(),
            mode = ?spec.write_mode,
            state = state.as_str(),
            "load starting"
        );

        self.ensure_table(spec).await?;
        state = LoadState::TableReady;
        info!(table = spec.table, state = state.as_str(), "table ready");

        if dataset.is_empty() {
            warn!(table = spec.table, "nothing to load");
            self.create_indexes(spec).await?;
            return Ok(LoadReport {
                table: spec.table.to_string(),
                state: LoadState::Complete,
                chunks_total: 0,
                chunks_failed: 0,
                rows_loaded: 0,
                rows_failed: 0,
            });
        }

        let projected = project(dataset, spec);
        let ranges = partition(projected.len(), self.workers);
        let chunks_total = ranges.len();

        let mut handles = Vec::with_capacity(chunks_total);
        for (chunk_id, range) in ranges.into_iter().enumerate() {
            let rows: Vec<Vec<BindValue>> = projected[range].to_vec();
            let db_url = self.db_url.clone();
            let spec = *spec;
            handles.push(tokio::spawn(insert_chunk(db_url, spec, chunk_id, rows)));
        }
        state = LoadState::ChunksDispatched;
        info!(
            table = spec.table,
            chunks = chunks_total,
            state = state.as_str(),
            "chunks dispatched"
        );

        let mut rows_loaded: u64 = 0;
        let mut rows_failed: u64 = 0;
        let mut chunks_failed = 0;
        // Hard barrier: indexes only after every chunk settles
        let results = future::join_all(handles).await;
        for (chunk_id, joined) in results.into_iter().enumerate() {
            match joined {
                Ok(Ok(n)) => rows_loaded += n,
                Ok(Err((lost, e))) => {
                    chunks_failed += 1;
                    rows_failed += lost;
                    error!(table = spec.table, chunk_id, error = %e, "chunk failed");
                }
                Err(e) => {
                    chunks_failed += 1;
                    error!(table = spec.table, chunk_id, error = %e, "chunk task panicked");
                }
            }
        }

        self.create_indexes(spec).await?;

        let state = if chunks_failed == 0 {
            LoadState::Complete
        } else {
            LoadState::Partial
        };
        info!(
            table = spec.table,
            state = state.as_str(),
            chunks_total,
            chunks_failed,
            rows_loaded,
            rows_failed,
            "load finished"
        );
        Ok(LoadReport {
            table: spec.table.to_string(),
            state,
            chunks_total,
            chunks_failed,
            rows_loaded,
            rows_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;
    use crate::tables::CRASH_TABLE;

    #[test]
    fn test_partition_covers_everything_without_overlap() {
        for (total, parts) in [(10, 3), (7, 7), (5, 8), (1000, 11), (1, 1)] {
            let ranges = partition(total, parts);
            assert!(ranges.len() <= parts);
            let mut next = 0;
            for r in &ranges {
                assert_eq!(r.start, next);
                assert!(!r.is_empty());
                next = r.end;
            }
            assert_eq!(next, total);
        }
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(4, 0).is_empty());
    }

    #[test]
    fn test_create_table_sql() {
        let sql = BulkLoader::create_table_sql(&CRASH_TABLE);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS acidentes_prf"));
        assert!(sql.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("mortos INTEGER"));
        assert!(sql.contains("latitude DOUBLE PRECISION"));
        assert!(sql.contains("data_inversa DATE"));
        assert!(sql.contains("uf VARCHAR(10)"));
        assert!(sql.contains("horario VARCHAR(50)"));
    }

    #[test]
    fn test_project_drops_extra_and_nulls_missing() {
        let mut ds = CanonicalDataset::new(
            DatasetKind::Crash,
            vec![
                "uf".to_string(),
                "mortos".to_string(),
                "causa_acidente".to_string(),
            ],
        );
        ds.rows.push(vec![
            CleanValue::Text("SP".to_string()),
            CleanValue::Int(2),
            CleanValue::Text("FALTA DE ATENÇÃO".to_string()),
        ]);
        let rows = project(&ds, &CRASH_TABLE);
        assert_eq!(rows[0].len(), CRASH_TABLE.columns.len());
        // causa_acidente has no destination column; data_inversa binds null
        let date_slot = CRASH_TABLE
            .columns
            .iter()
            .position(|(n, _)| *n == "data_inversa")
            .unwrap();
        assert!(matches!(rows[0][date_slot], BindValue::Date(None)));
        let mortos_slot = CRASH_TABLE
            .columns
            .iter()
            .position(|(n, _)| *n == "mortos")
            .unwrap();
        assert!(matches!(rows[0][mortos_slot], BindValue::I32(Some(2))));
    }

    #[test]
    fn test_batch_size_respects_bind_limit() {
        let ncols = MORTALITY_COLS;
        let batch = (MAX_BIND_PARAMS / ncols).clamp(1, MAX_ROWS_PER_STATEMENT);
        assert!(batch * ncols <= MAX_BIND_PARAMS);
    }

    const MORTALITY_COLS: usize = crate::tables::MORTALITY_TABLE.columns.len();
}
