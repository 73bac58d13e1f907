//! Header normalization
//!
//! Source extracts arrive with headers that differ in case, accents,
//! whitespace and month spelling from one publication to the next. All
//! headers are folded into a canonical form before any schema matching
//! happens, so the alias tables in `schema` only deal with one spelling.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Month abbreviation to full canonical name
///
/// Matched on the whole header or on an `abbr_` / `abbr-` / `abbr/` prefix
/// only. A bare substring match would corrupt unrelated headers
/// ("abrangencia" contains "abr").
const MONTHS: &[(&str, &str)] = &[
    ("jan", "janeiro"),
    ("fev", "fevereiro"),
    ("mar", "marco"),
    ("abr", "abril"),
    ("mai", "maio"),
    ("jun", "junho"),
    ("jul", "julho"),
    ("ago", "agosto"),
    ("set", "setembro"),
    ("out", "outubro"),
    ("nov", "novembro"),
    ("dez", "dezembro"),
];

/// Remove diacritics via NFKD decomposition
pub fn strip_diacritics(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Fold one raw header into its canonical form
///
/// Lowercases, strips accents and quotes, rewrites the ` (uid)` / ` (nome)`
/// dimension markers into `_uid` / `_nome` suffixes, collapses whitespace
/// into underscores and expands month abbreviations.
pub fn normalize_header(raw: &str) -> String {
    let mut h = strip_diacritics(raw.trim()).to_lowercase();
    h = h.replace('"', "");
    h = h.replace(" (uid)", "_uid");
    h = h.replace(" (nome)", "_nome");
    h = h.replace("(uid)", "_uid");
    h = h.replace("(nome)", "_nome");
    let mut out: String = h
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    for (abbr, full) in MONTHS {
        if out == *abbr || out == *full {
            out = (*full).to_string();
            break;
        }
        let is_prefixed = [format!("{abbr}_"), format!("{abbr}-"), format!("{abbr}/")]
            .iter()
            .any(|p| out.starts_with(p.as_str()));
        if is_prefixed {
            out = (*full).to_string();
            break;
        }
    }
    out
}

/// Normalize a full header row, preserving length and order
pub fn normalize_headers(raw: &[String]) -> Vec<String> {
    raw.iter().map(|h| normalize_header(h)).collect()
}

/// Indices of the columns to keep when duplicate headers collapse
///
/// The first occurrence of each normalized header wins; later duplicates
/// are dropped along with their cell data.
pub fn dedup_keep_first(headers: &[String]) -> Vec<usize> {
    let mut seen = std::collections::HashSet::new();
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| seen.insert(h.as_str().to_string()))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diacritic_variants_converge() {
        assert_eq!(normalize_header("Março"), "marco");
        assert_eq!(normalize_header("MARÇO"), "marco");
        assert_eq!(normalize_header("marco"), "marco");
        assert_eq!(normalize_header(" Mar "), "marco");
    }

    #[test]
    fn test_month_abbreviations_expand() {
        assert_eq!(normalize_header("Jan"), "janeiro");
        assert_eq!(normalize_header("FEV"), "fevereiro");
        assert_eq!(normalize_header("dez/2023"), "dezembro");
        assert_eq!(normalize_header("set-23"), "setembro");
        assert_eq!(normalize_header("out_2022"), "outubro");
    }

    #[test]
    fn test_month_prefix_does_not_eat_other_headers() {
        // "abrangencia" starts with "abr" but must never become "abril"
        assert_eq!(normalize_header("Abrangência"), "abrangencia");
        assert_eq!(normalize_header("Maior"), "maior");
        assert_eq!(normalize_header("Setor"), "setor");
    }

    #[test]
    fn test_uid_nome_markers() {
        assert_eq!(normalize_header("Ano (uid)"), "ano_uid");
        assert_eq!(normalize_header("Indicador (nome)"), "indicador_nome");
        assert_eq!(normalize_header("Raça/Cor (nome)"), "raca/cor_nome");
    }

    #[test]
    fn test_whitespace_collapses_to_underscore() {
        assert_eq!(normalize_header("  Data   Inversa "), "data_inversa");
        assert_eq!(normalize_header("Município"), "municipio");
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let headers: Vec<String> = ["ano", "uf", "ano", "total"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dedup_keep_first(&headers), vec![0, 1, 3]);
    }
}
