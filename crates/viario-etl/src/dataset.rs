//! Canonical dataset types
//!
//! A [`CanonicalDataset`] is the unit of exchange between reconciliation,
//! aggregation and loading: an ordered column list plus rows of typed
//! values, all sharing one schema kind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single cleaned cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CleanValue {
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
    Null,
}

impl CleanValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CleanValue::Int(i) => Some(*i),
            CleanValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CleanValue::Int(i) => Some(*i as f64),
            CleanValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CleanValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CleanValue::Null)
    }

    /// Grouping representation: stable text form used as part of a group key
    pub fn key_repr(&self) -> String {
        match self {
            CleanValue::Int(i) => i.to_string(),
            CleanValue::Float(f) => f.to_string(),
            CleanValue::Date(d) => d.to_string(),
            CleanValue::Text(s) => s.clone(),
            CleanValue::Null => String::new(),
        }
    }
}

/// Dataset kinds handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Crash,
    Mortality,
    Population,
    Deliverable,
    NewDeliverable,
    Organization,
    User,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Crash => "crash",
            DatasetKind::Mortality => "mortality",
            DatasetKind::Population => "population",
            DatasetKind::Deliverable => "deliverable",
            DatasetKind::NewDeliverable => "new_deliverable",
            DatasetKind::Organization => "organization",
            DatasetKind::User => "user",
        }
    }
}

/// An ordered collection of cleaned records sharing one schema
#[derive(Debug, Clone)]
pub struct CanonicalDataset {
    pub kind: DatasetKind,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CleanValue>>,
}

impl CanonicalDataset {
    pub fn new(kind: DatasetKind, columns: Vec<String>) -> Self {
        Self {
            kind,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append another dataset with the same column layout
    ///
    /// Column order must be identical; reconciliation guarantees this for
    /// datasets of the same kind.
    pub fn concat(&mut self, other: CanonicalDataset) -> anyhow::Result<()> {
        if self.columns != other.columns {
            anyhow::bail!(
                "cannot concat datasets with different columns ({} vs {})",
                self.columns.len(),
                other.columns.len()
            );
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Add a column with the given value in every existing row
    pub fn add_column(&mut self, name: &str, fill: CleanValue) {
        if self.column_index(name).is_some() {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    /// Retain only rows for which the predicate holds
    pub fn retain<F: FnMut(&[CleanValue]) -> bool>(&mut self, mut pred: F) {
        self.rows.retain(|row| pred(row));
    }
}
