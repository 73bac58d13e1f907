//! Destination table contracts
//!
//! One [`TableSpec`] per destination table: column names with SQL types,
//! write mode and secondary indexes. Projection at load time follows
//! these columns, so dataset columns without a counterpart here are
//! dropped silently.

use crate::load::{SqlType, TableSpec, WriteMode};

const I: SqlType = SqlType::Integer;
const B: SqlType = SqlType::BigInt;
const D: SqlType = SqlType::DoublePrecision;
const DT: SqlType = SqlType::Date;
const T: SqlType = SqlType::Text;

/// Federal highway crash records at person/vehicle grain, replaced
/// wholesale on each run
pub const CRASH_TABLE: TableSpec = TableSpec {
    table: "acidentes_prf",
    write_mode: WriteMode::Replace,
    surrogate_key: true,
    columns: &[
        ("pesid", B),
        ("data_inversa", DT),
        ("dia_semana", T),
        ("horario", SqlType::Varchar(50)),
        ("uf", SqlType::Varchar(10)),
        ("br", T),
        ("km", SqlType::Varchar(50)),
        ("municipio", T),
        ("causa_principal", T),
        ("tipo_acidente", T),
        ("classificacao_acidente", T),
        ("fase_dia", T),
        ("sentido_via", T),
        ("condicao_metereologica", T),
        ("tipo_pista", T),
        ("tracado_via", T),
        ("uso_solo", T),
        ("id_veiculo", B),
        ("tipo_veiculo", T),
        ("marca", T),
        ("ano_fabricacao_veiculo", I),
        ("tipo_envolvido", T),
        ("estado_fisico", T),
        ("idade", I),
        ("sexo", T),
        ("ilesos", I),
        ("feridos_leves", I),
        ("feridos_graves", I),
        ("mortos", I),
        ("feridos", I),
        ("latitude", D),
        ("longitude", D),
        ("regional", T),
        ("delegacia", T),
        ("uop", T),
        ("ano", I),
        ("mes", I),
    ],
    indexes: &[
        ("idx_acidentes_ano", "ano"),
        ("idx_acidentes_uf", "uf"),
    ],
};

/// Transport mortality statistics; appended, never replaced, because
/// yearly extracts arrive one at a time
pub const MORTALITY_TABLE: TableSpec = TableSpec {
    table: "obitos_transporte",
    write_mode: WriteMode::Append,
    surrogate_key: true,
    columns: &[
        ("ano_uid", I),
        ("ano_nome", T),
        ("local_uid", I),
        ("local_nome", T),
        ("indicador_uid", I),
        ("indicador_nome", T),
        ("categoria_uid", I),
        ("categoria_nome", T),
        ("estatistica_uid", I),
        ("estatistica_nome", T),
        ("lococor_uid", I),
        ("lococor_nome", T),
        ("atestante_uid", I),
        ("atestante_nome", T),
        ("grupoetario_uid", I),
        ("grupoetario_nome", T),
        ("racacor_uid", I),
        ("racacor_nome", T),
        ("sexo_uid", I),
        ("sexo_nome", T),
        ("abrangencia_uid", I),
        ("abrangencia_nome", T),
        ("localidade_uid", I),
        ("localidade_nome", T),
        ("janeiro", I),
        ("fevereiro", I),
        ("marco", I),
        ("abril", I),
        ("maio", I),
        ("junho", I),
        ("julho", I),
        ("agosto", I),
        ("setembro", I),
        ("outubro", I),
        ("novembro", I),
        ("dezembro", I),
        ("total_anual", B),
        ("nivel_localidade", T),
    ],
    indexes: &[
        ("idx_obitos_ano", "ano_uid"),
        ("idx_obitos_local", "local_nome"),
    ],
};

/// Census population figures per municipality plus rollups
pub const POPULATION_TABLE: TableSpec = TableSpec {
    table: "populacao_ibge",
    write_mode: WriteMode::Replace,
    surrogate_key: true,
    columns: &[
        ("ano", I),
        ("uf", T),
        ("cod_uf", I),
        ("cod_municipio", SqlType::Varchar(5)),
        ("municipio", T),
        ("id_ibge", SqlType::Varchar(7)),
        ("populacao", B),
        ("nivel_localidade", T),
    ],
    indexes: &[
        ("idx_pop_uf", "uf"),
        ("idx_pop_municipio", "municipio"),
    ],
};

/// Consolidated deliverables across both management extracts
pub const PRODUCTS_TABLE: TableSpec = TableSpec {
    table: "produtos_completo",
    write_mode: WriteMode::Replace,
    surrogate_key: true,
    columns: &[
        ("uf", T),
        ("status", T),
        ("municipio", T),
        ("cod_produto", T),
        ("desc_produto", T),
        ("data_cadastro", DT),
    ],
    indexes: &[("idx_produtos_uf", "uf")],
};

/// Registered organizations with submission flag
pub const ORGANS_TABLE: TableSpec = TableSpec {
    table: "orgaos_completo",
    write_mode: WriteMode::Replace,
    surrogate_key: true,
    columns: &[("nome", T), ("esfera", T), ("enviou_produto", T)],
    indexes: &[],
};

/// Deliverable counts per federation unit, all 27 present
pub const RANKING_TABLE: TableSpec = TableSpec {
    table: "ranking_uf",
    write_mode: WriteMode::Replace,
    surrogate_key: false,
    columns: &[("uf", T), ("qtd_produtos", B)],
    indexes: &[],
};

/// Deliverable counts per (federation unit, status)
pub const STATUS_STATS_TABLE: TableSpec = TableSpec {
    table: "stats_status_uf",
    write_mode: WriteMode::Replace,
    surrogate_key: false,
    columns: &[("uf", T), ("status", T), ("quantidade", B)],
    indexes: &[],
};

/// Deliverable counts per product code
pub const PRODUCT_STATS_TABLE: TableSpec = TableSpec {
    table: "stats_produtos",
    write_mode: WriteMode::Replace,
    surrogate_key: false,
    columns: &[("cod_produto", T), ("desc_produto", T), ("quantidade", B)],
    indexes: &[],
};

/// Top municipalities by deliverable count
pub const MUNICIPALITY_STATS_TABLE: TableSpec = TableSpec {
    table: "stats_municipios",
    write_mode: WriteMode::Replace,
    surrogate_key: false,
    columns: &[("municipio", T), ("quantidade", B)],
    indexes: &[],
};

/// Platform users
pub const USERS_TABLE: TableSpec = TableSpec {
    table: "usuarios",
    write_mode: WriteMode::Replace,
    surrogate_key: true,
    columns: &[("nome", T), ("email", T), ("orgao", T)],
    indexes: &[],
};
