//! Locale-aware value cleaning
//!
//! Every raw cell passes through one of the cleaners below before it is
//! allowed into a [`CanonicalDataset`](crate::dataset::CanonicalDataset).
//! Cleaners never fail: unusable input collapses into a typed fallback
//! (zero, placeholder text or a null date) and the substitution is
//! reported so the caller can count it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::dataset::CleanValue;
use crate::headers::strip_diacritics;

/// Placeholder written where a text value is missing or unusable
pub const PLACEHOLDER: &str = "NAO INFORMADO";

/// Footnote markers that IBGE appends to numeric cells, e.g. "1234(1)"
static FOOTNOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("footnote pattern is valid"));

/// State name (uppercase, accents stripped) to federation unit code
const STATE_CODES: &[(&str, &str)] = &[
    ("ACRE", "AC"),
    ("ALAGOAS", "AL"),
    ("AMAPA", "AP"),
    ("AMAZONAS", "AM"),
    ("BAHIA", "BA"),
    ("CEARA", "CE"),
    ("DISTRITO FEDERAL", "DF"),
    ("ESPIRITO SANTO", "ES"),
    ("GOIAS", "GO"),
    ("MARANHAO", "MA"),
    ("MATO GROSSO", "MT"),
    ("MATO GROSSO DO SUL", "MS"),
    ("MINAS GERAIS", "MG"),
    ("PARA", "PA"),
    ("PARAIBA", "PB"),
    ("PARANA", "PR"),
    ("PERNAMBUCO", "PE"),
    ("PIAUI", "PI"),
    ("RIO DE JANEIRO", "RJ"),
    ("RIO GRANDE DO NORTE", "RN"),
    ("RIO GRANDE DO SUL", "RS"),
    ("RONDONIA", "RO"),
    ("RORAIMA", "RR"),
    ("SANTA CATARINA", "SC"),
    ("SAO PAULO", "SP"),
    ("SERGIPE", "SE"),
    ("TOCANTINS", "TO"),
];

/// All 27 federation unit codes
pub const ALL_UFS: &[&str] = &[
    "AC", "AL", "AM", "AP", "BA", "CE", "DF", "ES", "GO", "MA", "MG", "MS", "MT", "PA", "PB",
    "PE", "PI", "PR", "RJ", "RN", "RO", "RR", "RS", "SC", "SE", "SP", "TO",
];

/// Why a cleaner substituted a fallback for the raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fallback {
    NonNumeric,
    DashAsZero,
    NegativeClamped,
    InvalidDate,
    EmptyText,
    MissingField,
    UnknownState,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fallback::NonNumeric => "non_numeric",
            Fallback::DashAsZero => "dash_as_zero",
            Fallback::NegativeClamped => "negative_clamped",
            Fallback::InvalidDate => "invalid_date",
            Fallback::EmptyText => "empty_text",
            Fallback::MissingField => "missing_field",
            Fallback::UnknownState => "unknown_state",
        }
    }
}

/// A cleaned value plus the substitution applied, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub value: CleanValue,
    pub fallback: Option<Fallback>,
}

impl Cleaned {
    fn ok(value: CleanValue) -> Self {
        Self {
            value,
            fallback: None,
        }
    }

    fn fell_back(value: CleanValue, fallback: Fallback) -> Self {
        Self {
            value,
            fallback: Some(fallback),
        }
    }
}

/// Per-kind fallback counters for one reconciliation unit
#[derive(Debug, Default, Clone)]
pub struct FallbackStats {
    counts: BTreeMap<Fallback, u64>,
}

impl FallbackStats {
    pub fn record(&mut self, fallback: Option<Fallback>) {
        if let Some(f) = fallback {
            *self.counts.entry(f).or_insert(0) += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, fallback: Fallback) -> u64 {
        self.counts.get(&fallback).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &FallbackStats) {
        for (k, v) in &other.counts {
            *self.counts.entry(*k).or_insert(0) += v;
        }
    }

    /// Compact `kind=count` rendering for log lines
    pub fn summary(&self) -> String {
        self.counts
            .iter()
            .map(|(k, v)| format!("{}={}", k.as_str(), v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a canonical field should be cleaned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Decimal,
    Date,
    Text,
    Uid,
    State,
}

impl FieldKind {
    /// Value written when the source has no column for the field
    pub fn default_value(&self) -> CleanValue {
        match self {
            FieldKind::Integer | FieldKind::Uid => CleanValue::Int(0),
            FieldKind::Decimal => CleanValue::Float(0.0),
            FieldKind::Date => CleanValue::Null,
            FieldKind::Text | FieldKind::State => CleanValue::Text(PLACEHOLDER.to_string()),
        }
    }
}

/// Dispatch a raw cell to the cleaner for its field kind
pub fn clean_field(kind: FieldKind, raw: &str) -> Cleaned {
    match kind {
        FieldKind::Integer | FieldKind::Uid => clean_integer(raw),
        FieldKind::Decimal => clean_decimal(raw),
        FieldKind::Date => clean_date(raw),
        FieldKind::Text => clean_text(raw),
        FieldKind::State => clean_state(raw),
    }
}

fn is_missing_text(trimmed: &str) -> bool {
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("na")
}

/// Count-like integer: strips footnotes, asterisks and thousands dots
///
/// A lone dash is the published notation for zero. Anything unparseable
/// becomes zero with a fallback, never an error.
pub fn clean_integer(raw: &str) -> Cleaned {
    let stripped = FOOTNOTE_RE.replace_all(raw, "");
    let s = stripped.trim().replace('*', "");
    let s = s.trim();
    if s == "-" {
        return Cleaned::fell_back(CleanValue::Int(0), Fallback::DashAsZero);
    }
    if is_missing_text(s) {
        return Cleaned::fell_back(CleanValue::Int(0), Fallback::NonNumeric);
    }
    // Spreadsheet cells surface integers as "1234.0"; trim that before
    // treating remaining dots as thousands separators
    let s = s.strip_suffix(".0").unwrap_or(s);
    let digits = s.replace('.', "");
    let digits = digits.strip_suffix(",0").unwrap_or(&digits);
    match digits.parse::<i64>() {
        Ok(n) if n < 0 => Cleaned::fell_back(CleanValue::Int(0), Fallback::NegativeClamped),
        Ok(n) => Cleaned::ok(CleanValue::Int(n)),
        Err(_) => match s.replace(',', ".").parse::<f64>() {
            Ok(f) if f < 0.0 => Cleaned::fell_back(CleanValue::Int(0), Fallback::NegativeClamped),
            Ok(f) => Cleaned::ok(CleanValue::Int(f as i64)),
            Err(_) => Cleaned::fell_back(CleanValue::Int(0), Fallback::NonNumeric),
        },
    }
}

/// Decimal with Brazilian comma separator, used for coordinates
pub fn clean_decimal(raw: &str) -> Cleaned {
    let stripped = FOOTNOTE_RE.replace_all(raw, "");
    let s = stripped.trim().replace(',', ".");
    if is_missing_text(&s) || s == "-" {
        return Cleaned::fell_back(CleanValue::Float(0.0), Fallback::NonNumeric);
    }
    match s.parse::<f64>() {
        Ok(f) => Cleaned::ok(CleanValue::Float(f)),
        Err(_) => Cleaned::fell_back(CleanValue::Float(0.0), Fallback::NonNumeric),
    }
}

/// Day-first date, falling back to ISO; invalid input becomes a null date
pub fn clean_date(raw: &str) -> Cleaned {
    let s = raw.trim();
    if is_missing_text(s) {
        return Cleaned::fell_back(CleanValue::Null, Fallback::InvalidDate);
    }
    // Datetime cells keep only the date part
    let s = s.split_whitespace().next().unwrap_or(s);
    for fmt in ["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%d/%m/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Cleaned::ok(CleanValue::Date(d));
        }
    }
    Cleaned::fell_back(CleanValue::Null, Fallback::InvalidDate)
}

/// Trimmed, uppercased text; missing values become the placeholder
pub fn clean_text(raw: &str) -> Cleaned {
    let s = raw.trim();
    if is_missing_text(s) {
        return Cleaned::fell_back(
            CleanValue::Text(PLACEHOLDER.to_string()),
            Fallback::EmptyText,
        );
    }
    Cleaned::ok(CleanValue::Text(s.to_uppercase()))
}

/// State name or code folded into the two-letter federation unit code
///
/// Full names are resolved through the state table; two-letter codes pass
/// through. Anything else is kept uppercased and flagged, so unmapped
/// localities stay visible downstream.
pub fn clean_state(raw: &str) -> Cleaned {
    let s = raw.trim();
    if is_missing_text(s) {
        return Cleaned::fell_back(
            CleanValue::Text(PLACEHOLDER.to_string()),
            Fallback::EmptyText,
        );
    }
    let canonical = strip_diacritics(s).to_uppercase();
    let canonical = canonical.split_whitespace().collect::<Vec<_>>().join(" ");
    if canonical.len() == 2 && ALL_UFS.contains(&canonical.as_str()) {
        return Cleaned::ok(CleanValue::Text(canonical));
    }
    for (name, code) in STATE_CODES {
        if canonical == *name {
            return Cleaned::ok(CleanValue::Text((*code).to_string()));
        }
    }
    Cleaned::fell_back(CleanValue::Text(canonical), Fallback::UnknownState)
}

/// Comparison key for entity names: uppercase, no accents, alphanumeric only
pub fn canonical_key(raw: &str) -> String {
    strip_diacritics(raw)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_thousands_and_footnotes() {
        assert_eq!(clean_integer("1.234").value, CleanValue::Int(1234));
        assert_eq!(clean_integer("11.451.999(1)").value, CleanValue::Int(11451999));
        assert_eq!(clean_integer(" 42 ").value, CleanValue::Int(42));
        assert_eq!(clean_integer("123*").value, CleanValue::Int(123));
        assert_eq!(clean_integer("1234.0").value, CleanValue::Int(1234));
    }

    #[test]
    fn test_integer_dash_is_zero() {
        let c = clean_integer("-");
        assert_eq!(c.value, CleanValue::Int(0));
        assert_eq!(c.fallback, Some(Fallback::DashAsZero));
    }

    #[test]
    fn test_integer_garbage_is_zero_with_fallback() {
        let c = clean_integer("Fonte: MS/SVS");
        assert_eq!(c.value, CleanValue::Int(0));
        assert_eq!(c.fallback, Some(Fallback::NonNumeric));
    }

    #[test]
    fn test_integer_never_negative() {
        let c = clean_integer("-5");
        assert_eq!(c.value, CleanValue::Int(0));
        assert_eq!(c.fallback, Some(Fallback::NegativeClamped));
    }

    #[test]
    fn test_decimal_comma_separator() {
        assert_eq!(clean_decimal("-23,5505").value, CleanValue::Float(-23.5505));
        assert_eq!(clean_decimal("abc").fallback, Some(Fallback::NonNumeric));
    }

    #[test]
    fn test_date_day_first_then_iso() {
        assert_eq!(
            clean_date("31/01/2023").value,
            CleanValue::Date(NaiveDate::from_ymd_opt(2023, 1, 31).unwrap())
        );
        assert_eq!(
            clean_date("2023-01-31").value,
            CleanValue::Date(NaiveDate::from_ymd_opt(2023, 1, 31).unwrap())
        );
        let c = clean_date("31/31/2023");
        assert_eq!(c.value, CleanValue::Null);
        assert_eq!(c.fallback, Some(Fallback::InvalidDate));
    }

    #[test]
    fn test_text_placeholder() {
        assert_eq!(
            clean_text("  "),
            Cleaned {
                value: CleanValue::Text(PLACEHOLDER.to_string()),
                fallback: Some(Fallback::EmptyText),
            }
        );
        assert_eq!(clean_text("nan").value, CleanValue::Text(PLACEHOLDER.to_string()));
        assert_eq!(clean_text("brasília").value, CleanValue::Text("BRASÍLIA".to_string()));
    }

    #[test]
    fn test_state_name_to_code() {
        assert_eq!(clean_state("São Paulo").value, CleanValue::Text("SP".to_string()));
        assert_eq!(clean_state("sp").value, CleanValue::Text("SP".to_string()));
        assert_eq!(clean_state("DISTRITO  FEDERAL").value, CleanValue::Text("DF".to_string()));
        let c = clean_state("Atlantis");
        assert_eq!(c.value, CleanValue::Text("ATLANTIS".to_string()));
        assert_eq!(c.fallback, Some(Fallback::UnknownState));
    }

    #[test]
    fn test_state_table_is_complete() {
        assert_eq!(STATE_CODES.len(), 27);
        assert_eq!(ALL_UFS.len(), 27);
        for (_, code) in STATE_CODES {
            assert!(ALL_UFS.contains(code));
        }
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("Prefeitura de São Paulo"), "PREFEITURADESAOPAULO");
        assert_eq!(canonical_key("D.N.I.T."), "DNIT");
    }

    #[test]
    fn test_fallback_stats_counts() {
        let mut stats = FallbackStats::default();
        stats.record(clean_integer("-").fallback);
        stats.record(clean_integer("7").fallback);
        stats.record(clean_text("").fallback);
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.count(Fallback::DashAsZero), 1);
        assert_eq!(stats.count(Fallback::EmptyText), 1);
        assert!(stats.summary().contains("dash_as_zero=1"));
    }
}
