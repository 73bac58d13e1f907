//! Source file readers
//!
//! Turns CSV files and spreadsheet workbooks into [`RawTable`]s: normalized
//! headers plus rows of raw strings. All downstream stages work from this
//! shape regardless of where the bytes came from.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, warn};
use viario_common::{Result, ViarioError};

use crate::headers::{dedup_keep_first, normalize_headers};

/// One sheet's worth of raw cells with normalized, deduplicated headers
#[derive(Debug, Clone)]
pub struct RawTable {
    /// File path plus sheet name, for logging and error attribution
    pub source: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a table from raw headers and rows
    ///
    /// Headers are normalized; duplicate headers keep their first column
    /// and drop the rest. Rows are padded or truncated to the header width.
    pub fn new(source: String, raw_headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let normalized = normalize_headers(&raw_headers);
        let keep = dedup_keep_first(&normalized);
        if keep.len() < normalized.len() {
            debug!(
                source = %source,
                dropped = normalized.len() - keep.len(),
                "collapsed duplicate headers"
            );
        }
        let headers: Vec<String> = keep.iter().map(|&i| normalized[i].clone()).collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                keep.iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        Self {
            source,
            headers,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Decode raw bytes as UTF-8, falling back to Windows-1252
///
/// Government extracts mix both encodings; the BOM is stripped when
/// present.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Pick `;` or `,` as delimiter by counting occurrences in the header line
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let semis = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semis >= commas {
        b';'
    } else {
        b','
    }
}

/// Read a delimited text file into a single [`RawTable`]
pub fn read_csv(path: &Path) -> Result<RawTable> {
    let bytes = std::fs::read(path)?;
    let text = decode_text(&bytes);
    let delimiter = sniff_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    debug!(
        path = %path.display(),
        delimiter = %(delimiter as char),
        rows = rows.len(),
        "read csv"
    );
    Ok(RawTable::new(path.display().to_string(), headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.date().to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        other => format!("{other}"),
    }
}

/// Read every sheet of a workbook (xls, xlsx or ods) into tables
///
/// `header_row` is the zero-based row holding the headers; rows above it
/// are discarded. Sheets that fail to read are skipped with a warning so
/// one bad sheet never sinks the file.
pub fn read_workbook(path: &Path, header_row: usize) -> Result<Vec<RawTable>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ViarioError::Workbook(format!("{}: {e}", path.display())))?;
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut tables = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), sheet = %name, error = %e, "unreadable sheet skipped");
                continue;
            }
        };
        let mut iter = range.rows().skip(header_row);
        let Some(header_cells) = iter.next() else {
            continue;
        };
        let headers: Vec<String> = header_cells.iter().map(cell_to_string).collect();
        let rows: Vec<Vec<String>> = iter
            .map(|r| r.iter().map(cell_to_string).collect())
            .collect();
        debug!(path = %path.display(), sheet = %name, rows = rows.len(), "read sheet");
        tables.push(RawTable::new(
            format!("{}::{name}", path.display()),
            headers,
            rows,
        ));
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_utf8_strips_bom() {
        let bytes = "\u{feff}uf;total\nSP;10".as_bytes();
        assert_eq!(decode_text(bytes), "uf;total\nSP;10");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        // "Município" in Windows-1252
        let bytes = b"Munic\xedpio";
        assert_eq!(decode_text(bytes), "Município");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3"), b',');
    }

    #[test]
    fn test_read_csv_normalizes_headers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Data Inversa;UF;Município").unwrap();
        writeln!(file, "01/02/2023;SP;Campinas").unwrap();
        let table = read_csv(file.path()).unwrap();
        assert_eq!(table.headers, vec!["data_inversa", "uf", "municipio"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][2], "Campinas");
    }

    #[test]
    fn test_raw_table_pads_short_rows() {
        let table = RawTable::new(
            "t".to_string(),
            vec!["a".to_string(), "b".to_string()],
            vec![vec!["1".to_string()]],
        );
        assert_eq!(table.rows[0], vec!["1".to_string(), String::new()]);
    }

    #[test]
    fn test_raw_table_drops_duplicate_columns() {
        let table = RawTable::new(
            "t".to_string(),
            vec!["ano".to_string(), "ano".to_string(), "uf".to_string()],
            vec![vec!["2023".to_string(), "junk".to_string(), "SP".to_string()]],
        );
        assert_eq!(table.headers, vec!["ano", "uf"]);
        assert_eq!(table.rows[0], vec!["2023".to_string(), "SP".to_string()]);
    }
}
