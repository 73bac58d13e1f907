//! Schema reconciliation
//!
//! Each dataset kind carries a canonical field list with a prioritized
//! alias table. Reconciliation maps a [`RawTable`]'s normalized headers
//! onto those fields, cleans every cell by field kind, and defaults the
//! fields the source never shipped. The output always has the full
//! canonical column set in schema order, whatever the source looked like.

use tracing::{debug, info};

use crate::clean::{clean_field, Fallback, FallbackStats, FieldKind};
use crate::dataset::{CanonicalDataset, DatasetKind};
use crate::reader::RawTable;

/// How an alias pattern is compared against a normalized header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Contains,
}

/// One alias in a field's prioritized list
#[derive(Debug, Clone, Copy)]
pub struct FieldMatcher {
    pub pattern: &'static str,
    pub kind: MatchKind,
}

const fn exact(pattern: &'static str) -> FieldMatcher {
    FieldMatcher {
        pattern,
        kind: MatchKind::Exact,
    }
}

const fn prefix(pattern: &'static str) -> FieldMatcher {
    FieldMatcher {
        pattern,
        kind: MatchKind::Prefix,
    }
}

const fn contains(pattern: &'static str) -> FieldMatcher {
    FieldMatcher {
        pattern,
        kind: MatchKind::Contains,
    }
}

impl FieldMatcher {
    fn matches(&self, header: &str) -> bool {
        match self.kind {
            MatchKind::Exact => header == self.pattern,
            MatchKind::Prefix => header.starts_with(self.pattern),
            MatchKind::Contains => header.contains(self.pattern),
        }
    }
}

/// A canonical field: name, cleaning kind and alias table
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub aliases: &'static [FieldMatcher],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    aliases: &'static [FieldMatcher],
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        aliases,
    }
}

/// Structural precondition a raw table must satisfy before reconciliation
#[derive(Debug, Clone, Copy)]
pub enum Signature {
    /// Accept anything with rows
    None,
    /// At least one month column, or a year uid column: the shape of a
    /// per-year statistics extract. Summary/notes sheets fail this.
    MonthOrYearUid,
    /// Every listed substring must appear in some header
    HasSubstrings(&'static [&'static str]),
}

/// The full contract for one dataset kind
#[derive(Debug, Clone, Copy)]
pub struct DatasetSchema {
    pub kind: DatasetKind,
    pub signature: Signature,
    pub fields: &'static [FieldSpec],
}

pub const MONTH_FIELDS: &[&str] = &[
    "janeiro",
    "fevereiro",
    "marco",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

const CRASH_FIELDS: &[FieldSpec] = &[
    field("pesid", FieldKind::Integer, &[exact("pesid")]),
    field(
        "data_inversa",
        FieldKind::Date,
        &[exact("data_inversa"), exact("data")],
    ),
    field("dia_semana", FieldKind::Text, &[exact("dia_semana")]),
    field("horario", FieldKind::Text, &[exact("horario"), exact("hora")]),
    field(
        "uf",
        FieldKind::State,
        &[exact("uf"), exact("sigla_uf"), exact("estado")],
    ),
    field("br", FieldKind::Text, &[exact("br"), exact("rodovia")]),
    field("km", FieldKind::Text, &[exact("km")]),
    field(
        "municipio",
        FieldKind::Text,
        &[exact("municipio"), exact("nome_municipio")],
    ),
    // Auxiliary: feeds the boolean-cause patch, not stored
    field(
        "causa_acidente",
        FieldKind::Text,
        &[exact("causa_acidente"), contains("causa_acid")],
    ),
    field(
        "causa_principal",
        FieldKind::Text,
        &[exact("causa_principal")],
    ),
    field("tipo_acidente", FieldKind::Text, &[exact("tipo_acidente")]),
    field(
        "classificacao_acidente",
        FieldKind::Text,
        &[exact("classificacao_acidente"), contains("classificacao")],
    ),
    field("fase_dia", FieldKind::Text, &[exact("fase_dia")]),
    field("sentido_via", FieldKind::Text, &[exact("sentido_via")]),
    field(
        "condicao_metereologica",
        FieldKind::Text,
        &[
            exact("condicao_metereologica"),
            exact("condicao_meteorologica"),
            contains("metereolog"),
            contains("meteorolog"),
        ],
    ),
    field("tipo_pista", FieldKind::Text, &[exact("tipo_pista")]),
    field("tracado_via", FieldKind::Text, &[exact("tracado_via")]),
    field("uso_solo", FieldKind::Text, &[exact("uso_solo")]),
    field("id_veiculo", FieldKind::Integer, &[exact("id_veiculo")]),
    field("tipo_veiculo", FieldKind::Text, &[exact("tipo_veiculo")]),
    field("marca", FieldKind::Text, &[exact("marca")]),
    field(
        "ano_fabricacao_veiculo",
        FieldKind::Integer,
        &[exact("ano_fabricacao_veiculo")],
    ),
    field(
        "tipo_envolvido",
        FieldKind::Text,
        &[exact("tipo_envolvido")],
    ),
    field("estado_fisico", FieldKind::Text, &[exact("estado_fisico")]),
    field("idade", FieldKind::Integer, &[exact("idade")]),
    field("sexo", FieldKind::Text, &[exact("sexo")]),
    field("ilesos", FieldKind::Integer, &[exact("ilesos")]),
    field(
        "feridos_leves",
        FieldKind::Integer,
        &[exact("feridos_leves")],
    ),
    field(
        "feridos_graves",
        FieldKind::Integer,
        &[exact("feridos_graves")],
    ),
    field("mortos", FieldKind::Integer, &[exact("mortos")]),
    field("feridos", FieldKind::Integer, &[exact("feridos")]),
    field("latitude", FieldKind::Decimal, &[exact("latitude")]),
    field("longitude", FieldKind::Decimal, &[exact("longitude")]),
    field("regional", FieldKind::Text, &[exact("regional")]),
    field("delegacia", FieldKind::Text, &[exact("delegacia")]),
    field("uop", FieldKind::Text, &[exact("uop")]),
    field("ano", FieldKind::Integer, &[exact("ano")]),
    field("mes", FieldKind::Integer, &[exact("mes")]),
];

const MORTALITY_FIELDS: &[FieldSpec] = &[
    field("ano_uid", FieldKind::Uid, &[exact("ano_uid")]),
    field("ano_nome", FieldKind::Text, &[exact("ano_nome")]),
    field("local_uid", FieldKind::Uid, &[exact("local_uid")]),
    field("local_nome", FieldKind::State, &[exact("local_nome")]),
    field("indicador_uid", FieldKind::Uid, &[exact("indicador_uid")]),
    field("indicador_nome", FieldKind::Text, &[exact("indicador_nome")]),
    field("categoria_uid", FieldKind::Uid, &[exact("categoria_uid")]),
    field("categoria_nome", FieldKind::Text, &[exact("categoria_nome")]),
    field(
        "estatistica_uid",
        FieldKind::Uid,
        &[exact("estatistica_uid")],
    ),
    field(
        "estatistica_nome",
        FieldKind::Text,
        &[exact("estatistica_nome")],
    ),
    field("lococor_uid", FieldKind::Uid, &[exact("lococor_uid")]),
    field("lococor_nome", FieldKind::Text, &[exact("lococor_nome")]),
    field("atestante_uid", FieldKind::Uid, &[exact("atestante_uid")]),
    field("atestante_nome", FieldKind::Text, &[exact("atestante_nome")]),
    field(
        "grupoetario_uid",
        FieldKind::Uid,
        &[exact("grupoetario_uid"), exact("grupo_etario_uid")],
    ),
    field(
        "grupoetario_nome",
        FieldKind::Text,
        &[exact("grupoetario_nome"), exact("grupo_etario_nome")],
    ),
    field(
        "racacor_uid",
        FieldKind::Uid,
        &[exact("racacor_uid"), exact("raca/cor_uid"), exact("raca_cor_uid")],
    ),
    field(
        "racacor_nome",
        FieldKind::Text,
        &[
            exact("racacor_nome"),
            exact("raca/cor_nome"),
            exact("raca_cor_nome"),
        ],
    ),
    field("sexo_uid", FieldKind::Uid, &[exact("sexo_uid")]),
    field("sexo_nome", FieldKind::Text, &[exact("sexo_nome")]),
    field(
        "abrangencia_uid",
        FieldKind::Uid,
        &[exact("abrangencia_uid")],
    ),
    field(
        "abrangencia_nome",
        FieldKind::Text,
        &[exact("abrangencia_nome")],
    ),
    field("localidade_uid", FieldKind::Uid, &[exact("localidade_uid")]),
    field(
        "localidade_nome",
        FieldKind::Text,
        &[exact("localidade_nome")],
    ),
    field("janeiro", FieldKind::Integer, &[exact("janeiro")]),
    field("fevereiro", FieldKind::Integer, &[exact("fevereiro")]),
    field("marco", FieldKind::Integer, &[exact("marco")]),
    field("abril", FieldKind::Integer, &[exact("abril")]),
    field("maio", FieldKind::Integer, &[exact("maio")]),
    field("junho", FieldKind::Integer, &[exact("junho")]),
    field("julho", FieldKind::Integer, &[exact("julho")]),
    field("agosto", FieldKind::Integer, &[exact("agosto")]),
    field("setembro", FieldKind::Integer, &[exact("setembro")]),
    field("outubro", FieldKind::Integer, &[exact("outubro")]),
    field("novembro", FieldKind::Integer, &[exact("novembro")]),
    field("dezembro", FieldKind::Integer, &[exact("dezembro")]),
    // A bare "ano" column in these extracts is the annual total, not the
    // calendar year; the year lives in ano_uid/ano_nome.
    field(
        "total_anual",
        FieldKind::Integer,
        &[exact("total_anual"), exact("total"), exact("ano")],
    ),
];

const POPULATION_FIELDS: &[FieldSpec] = &[
    field("ano", FieldKind::Integer, &[exact("ano")]),
    field(
        "uf",
        FieldKind::State,
        &[
            exact("uf"),
            exact("sigla_uf"),
            contains("unidade_da_federacao"),
        ],
    ),
    field(
        "cod_uf",
        FieldKind::Integer,
        &[exact("cod_uf"), exact("cod._uf"), contains("cod_uf")],
    ),
    field(
        "cod_municipio",
        FieldKind::Integer,
        &[
            exact("cod_municipio"),
            exact("cod._munic."),
            contains("cod._munic"),
            contains("cod_munic"),
        ],
    ),
    field(
        "municipio",
        FieldKind::Text,
        &[
            exact("municipio"),
            exact("nome_do_municipio"),
            contains("nome_do_munic"),
        ],
    ),
    field(
        "populacao",
        FieldKind::Integer,
        &[exact("populacao"), prefix("populacao"), contains("populac")],
    ),
];

const DELIVERABLE_FIELDS: &[FieldSpec] = &[
    field(
        "uf",
        FieldKind::State,
        &[exact("uf"), exact("estado"), contains("estado")],
    ),
    field(
        "status",
        FieldKind::Text,
        &[exact("status"), contains("status"), contains("situacao")],
    ),
    field(
        "produto",
        FieldKind::Text,
        &[exact("produto"), contains("produto"), contains("meta")],
    ),
    field(
        "municipio",
        FieldKind::Text,
        &[exact("municipio"), contains("municipio"), contains("cidade")],
    ),
    field(
        "entidade",
        FieldKind::Text,
        &[
            contains("entidade"),
            contains("orgao"),
            contains("instituicao"),
        ],
    ),
    field(
        "data_cadastro",
        FieldKind::Date,
        &[exact("data_cadastro"), contains("cadastro"), contains("data")],
    ),
];

const NEW_DELIVERABLE_FIELDS: &[FieldSpec] = &[
    field(
        "entidade",
        FieldKind::Text,
        &[contains("entidade"), contains("orgao"), contains("instituicao")],
    ),
    field(
        "status",
        FieldKind::Text,
        &[exact("status"), contains("status"), contains("situacao")],
    ),
    field(
        "data_cadastro",
        FieldKind::Date,
        &[exact("data_cadastro"), contains("cadastro"), contains("data")],
    ),
];

const ORGANIZATION_FIELDS: &[FieldSpec] = &[
    field(
        "nome",
        FieldKind::Text,
        &[exact("nome"), contains("orgao"), contains("entidade")],
    ),
    field("esfera", FieldKind::Text, &[contains("esfera")]),
];

const USER_FIELDS: &[FieldSpec] = &[
    field("nome", FieldKind::Text, &[exact("nome"), contains("nome")]),
    field("email", FieldKind::Text, &[contains("mail")]),
    field(
        "orgao",
        FieldKind::Text,
        &[contains("orgao"), contains("entidade")],
    ),
];

pub const CRASH_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Crash,
    signature: Signature::None,
    fields: CRASH_FIELDS,
};

pub const MORTALITY_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Mortality,
    signature: Signature::MonthOrYearUid,
    fields: MORTALITY_FIELDS,
};

pub const POPULATION_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Population,
    signature: Signature::HasSubstrings(&["munic", "populac"]),
    fields: POPULATION_FIELDS,
};

pub const DELIVERABLE_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Deliverable,
    signature: Signature::None,
    fields: DELIVERABLE_FIELDS,
};

pub const NEW_DELIVERABLE_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::NewDeliverable,
    signature: Signature::None,
    fields: NEW_DELIVERABLE_FIELDS,
};

pub const ORGANIZATION_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Organization,
    signature: Signature::None,
    fields: ORGANIZATION_FIELDS,
};

pub const USER_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::User,
    signature: Signature::None,
    fields: USER_FIELDS,
};

/// Schema for a dataset kind, if it has one
pub fn schema_for_kind(kind: DatasetKind) -> Option<&'static DatasetSchema> {
    match kind {
        DatasetKind::Crash => Some(&CRASH_SCHEMA),
        DatasetKind::Mortality => Some(&MORTALITY_SCHEMA),
        DatasetKind::Population => Some(&POPULATION_SCHEMA),
        DatasetKind::Deliverable => Some(&DELIVERABLE_SCHEMA),
        DatasetKind::NewDeliverable => Some(&NEW_DELIVERABLE_SCHEMA),
        DatasetKind::Organization => Some(&ORGANIZATION_SCHEMA),
        DatasetKind::User => Some(&USER_SCHEMA),
    }
}

/// A reconciled sheet plus its cleaning statistics
#[derive(Debug)]
pub struct Reconciled {
    pub dataset: CanonicalDataset,
    pub stats: FallbackStats,
    /// Canonical fields with no matching source column
    pub missing_fields: Vec<&'static str>,
}

/// Outcome of reconciling one sheet
///
/// A skip is informational, not an error: workbooks routinely carry
/// summary and notes sheets alongside the data.
#[derive(Debug)]
pub enum SheetOutcome {
    Table(Reconciled),
    Skipped { source: String, reason: String },
}

/// Find the source column for one field, first alias that hits wins
fn resolve_field(headers: &[String], spec: &FieldSpec) -> Option<usize> {
    for matcher in spec.aliases {
        if let Some(idx) = headers.iter().position(|h| matcher.matches(h)) {
            return Some(idx);
        }
    }
    None
}

fn check_signature(table: &RawTable, signature: Signature) -> Option<String> {
    match signature {
        Signature::None => None,
        Signature::MonthOrYearUid => {
            let has_month = table
                .headers
                .iter()
                .any(|h| MONTH_FIELDS.contains(&h.as_str()));
            let has_year_uid = table.header_index("ano_uid").is_some();
            if has_month || has_year_uid {
                None
            } else {
                Some("no month or year uid column".to_string())
            }
        }
        Signature::HasSubstrings(required) => {
            for needle in required {
                if !table.headers.iter().any(|h| h.contains(needle)) {
                    return Some(format!("no header containing '{needle}'"));
                }
            }
            None
        }
    }
}

/// Reconcile one raw table against a dataset schema
pub fn reconcile(table: &RawTable, schema: &DatasetSchema) -> SheetOutcome {
    if table.is_empty() {
        return SheetOutcome::Skipped {
            source: table.source.clone(),
            reason: "no data rows".to_string(),
        };
    }
    if let Some(reason) = check_signature(table, schema.signature) {
        return SheetOutcome::Skipped {
            source: table.source.clone(),
            reason,
        };
    }

    let resolved: Vec<Option<usize>> = schema
        .fields
        .iter()
        .map(|f| resolve_field(&table.headers, f))
        .collect();
    let missing_fields: Vec<&'static str> = schema
        .fields
        .iter()
        .zip(&resolved)
        .filter(|(_, idx)| idx.is_none())
        .map(|(f, _)| f.name)
        .collect();
    if !missing_fields.is_empty() {
        debug!(
            source = %table.source,
            missing = missing_fields.len(),
            fields = ?missing_fields,
            "defaulting fields absent from source"
        );
    }

    let columns: Vec<String> = schema.fields.iter().map(|f| f.name.to_string()).collect();
    let mut dataset = CanonicalDataset::new(schema.kind, columns);
    let mut stats = FallbackStats::default();

    for raw_row in &table.rows {
        let mut row = Vec::with_capacity(schema.fields.len());
        for (spec, idx) in schema.fields.iter().zip(&resolved) {
            match idx {
                Some(i) => {
                    let cleaned = clean_field(spec.kind, &raw_row[*i]);
                    stats.record(cleaned.fallback);
                    row.push(cleaned.value);
                }
                None => {
                    stats.record(Some(Fallback::MissingField));
                    row.push(spec.kind.default_value());
                }
            }
        }
        dataset.rows.push(row);
    }

    info!(
        source = %table.source,
        kind = dataset.kind.as_str(),
        rows = dataset.len(),
        fallbacks = stats.total(),
        "reconciled sheet"
    );
    SheetOutcome::Table(Reconciled {
        dataset,
        stats,
        missing_fields,
    })
}

/// Split a combined deliverable label into (code, description)
///
/// "PR-04 - Campanha educativa" splits on the first " - ". Labels without
/// the separator keep the full text as description and take the first
/// whitespace token, capped at 15 characters, as the code.
pub fn split_product_code(text: &str) -> (String, String) {
    let t = text.trim();
    if t.is_empty() || t == crate::clean::PLACEHOLDER {
        return ("ND".to_string(), crate::clean::PLACEHOLDER.to_string());
    }
    if let Some((code, desc)) = t.split_once(" - ") {
        let code = code.trim();
        let desc = desc.trim();
        if !code.is_empty() && !desc.is_empty() {
            return (code.to_string(), desc.to_string());
        }
    }
    let code: String = t
        .split_whitespace()
        .next()
        .unwrap_or(t)
        .chars()
        .take(15)
        .collect();
    (code, t.to_string())
}
