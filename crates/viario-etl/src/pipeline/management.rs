//! Program management stage
//!
//! Four fixed-name extracts from the management platform: deliverables,
//! late-registered deliverables, organizations and users. Deliverables
//! from both extracts merge into one table, and four derived statistics
//! tables are rebuilt from it on every run. Each extract is optional;
//! whatever is present gets processed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};
use viario_common::Result;

use crate::clean::{canonical_key, ALL_UFS, PLACEHOLDER};
use crate::dataset::{CanonicalDataset, CleanValue, DatasetKind};
use crate::load::BulkLoader;
use crate::reader::read_csv;
use crate::schema::{
    reconcile, split_product_code, SheetOutcome, DELIVERABLE_SCHEMA, NEW_DELIVERABLE_SCHEMA,
    ORGANIZATION_SCHEMA, USER_SCHEMA,
};
use crate::tables::{
    MUNICIPALITY_STATS_TABLE, ORGANS_TABLE, PRODUCTS_TABLE, PRODUCT_STATS_TABLE, RANKING_TABLE,
    STATUS_STATS_TABLE, USERS_TABLE,
};

use super::StageSummary;

/// Late registrations identify the submitter as "Entidade/UF"
static ENTITY_UF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([A-Z]{2})").expect("entity uf pattern is valid"));

const PRODUCTS_FILE: &str = "Produtos.csv";
const NEW_PRODUCTS_FILE: &str = "NovosProdutos.csv";
const ORGANS_FILE: &str = "Orgaos.csv";
const USERS_FILE: &str = "Usuarios.csv";

const NEW_PRODUCT_CODE: &str = "NOVO";
const NEW_PRODUCT_DESC: &str = "NOVO PRODUTO CADASTRADO";

/// Fold free-form status text into the fixed vocabulary
fn normalize_status(raw: &str) -> String {
    if raw.trim().is_empty() || raw == PLACEHOLDER {
        return PLACEHOLDER.to_string();
    }
    let t = crate::headers::strip_diacritics(raw).to_uppercase();
    if t.contains("REPROVADO") {
        "REPROVADO".to_string()
    } else if t.contains("APROVADO") {
        "APROVADO".to_string()
    } else if t.contains("ANALISE") {
        "EM ANALISE".to_string()
    } else if t.contains("CORRECAO") {
        "EM CORRECAO".to_string()
    } else if t.contains("REALIZADO") {
        "REALIZADO".to_string()
    } else {
        "OUTROS".to_string()
    }
}

/// Fold sphere text into federal/state/municipal buckets
fn normalize_sphere(raw: &str) -> String {
    if raw.trim().is_empty() || raw == PLACEHOLDER {
        return "NAO IDENTIFICADO".to_string();
    }
    let t = crate::headers::strip_diacritics(raw).to_uppercase();
    if t.contains("FED") {
        "FEDERAL".to_string()
    } else if t.contains("EST") {
        "ESTADUAL".to_string()
    } else if t.contains("MUN") {
        "MUNICIPAL".to_string()
    } else {
        "OUTROS".to_string()
    }
}

fn uf_from_entity(entity: &str) -> Option<String> {
    ENTITY_UF_RE
        .captures(entity)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|uf| ALL_UFS.contains(&uf.as_str()))
}

fn read_optional(input_dir: &Path, name: &str) -> Option<crate::reader::RawTable> {
    let path = input_dir.join(name);
    if !path.is_file() {
        info!(file = name, "management extract not present");
        return None;
    }
    match read_csv(&path) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!(file = name, error = %e, "unreadable management extract skipped");
            None
        }
    }
}

fn products_columns() -> Vec<String> {
    ["uf", "status", "municipio", "cod_produto", "desc_produto", "data_cadastro"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Deliverable rows plus the canonical keys of submitting entities
struct Consolidated {
    products: CanonicalDataset,
    senders: BTreeSet<String>,
}

fn consolidate_products(
    main: Option<&CanonicalDataset>,
    new: Option<&CanonicalDataset>,
) -> Consolidated {
    let mut products = CanonicalDataset::new(DatasetKind::Deliverable, products_columns());
    let mut senders = BTreeSet::new();

    if let Some(ds) = main {
        let uf = ds.column_index("uf");
        let status = ds.column_index("status");
        let municipio = ds.column_index("municipio");
        let produto = ds.column_index("produto");
        let entidade = ds.column_index("entidade");
        let data = ds.column_index("data_cadastro");
        for row in &ds.rows {
            let label = produto.and_then(|i| row[i].as_text()).unwrap_or(PLACEHOLDER);
            let (code, desc) = split_product_code(label);
            if let Some(key) =
                entidade.and_then(|i| row[i].as_text()).map(canonical_key)
            {
                if !key.is_empty() {
                    senders.insert(key);
                }
            }
            products.rows.push(vec![
                uf.map(|i| row[i].clone())
                    .unwrap_or(CleanValue::Text(PLACEHOLDER.to_string())),
                CleanValue::Text(normalize_status(
                    status.and_then(|i| row[i].as_text()).unwrap_or(""),
                )),
                municipio
                    .map(|i| row[i].clone())
                    .unwrap_or(CleanValue::Text(PLACEHOLDER.to_string())),
                CleanValue::Text(code),
                CleanValue::Text(desc),
                data.map(|i| row[i].clone()).unwrap_or(CleanValue::Null),
            ]);
        }
    }

    if let Some(ds) = new {
        let entidade = ds.column_index("entidade");
        let status = ds.column_index("status");
        let data = ds.column_index("data_cadastro");
        for row in &ds.rows {
            let entity = entidade.and_then(|i| row[i].as_text()).unwrap_or("");
            // The entity counts as a sender even when its product row is
            // unusable below
            let key = canonical_key(entity);
            if !key.is_empty() {
                senders.insert(key);
            }
            // Rows whose entity does not carry a "/UF" suffix cannot be
            // attributed and are dropped, as published
            let Some(uf) = uf_from_entity(entity) else {
                continue;
            };
            products.rows.push(vec![
                CleanValue::Text(uf),
                CleanValue::Text(normalize_status(
                    status.and_then(|i| row[i].as_text()).unwrap_or(""),
                )),
                CleanValue::Text(PLACEHOLDER.to_string()),
                CleanValue::Text(NEW_PRODUCT_CODE.to_string()),
                CleanValue::Text(NEW_PRODUCT_DESC.to_string()),
                data.map(|i| row[i].clone()).unwrap_or(CleanValue::Null),
            ]);
        }
    }

    Consolidated { products, senders }
}

/// Deliverable counts per federation unit, zero-filled over all 27
fn ranking_dataset(products: &CanonicalDataset) -> CanonicalDataset {
    let mut counts: BTreeMap<&str, i64> = ALL_UFS.iter().map(|uf| (*uf, 0)).collect();
    if let Some(uf_idx) = products.column_index("uf") {
        for row in &products.rows {
            if let Some(uf) = row[uf_idx].as_text() {
                if let Some(c) = counts.get_mut(uf) {
                    *c += 1;
                }
            }
        }
    }
    let mut ds = CanonicalDataset::new(
        DatasetKind::Deliverable,
        vec!["uf".to_string(), "qtd_produtos".to_string()],
    );
    for (uf, count) in counts {
        ds.rows
            .push(vec![CleanValue::Text(uf.to_string()), CleanValue::Int(count)]);
    }
    ds
}

fn count_by<K: Ord>(
    products: &CanonicalDataset,
    key_fn: impl Fn(&[CleanValue]) -> Option<K>,
) -> BTreeMap<K, i64> {
    let mut counts = BTreeMap::new();
    for row in &products.rows {
        if let Some(key) = key_fn(&row[..]) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

fn status_stats_dataset(products: &CanonicalDataset) -> CanonicalDataset {
    let uf = products.column_index("uf");
    let status = products.column_index("status");
    let counts = count_by(products, |row| {
        Some((
            uf.and_then(|i| row[i].as_text())?.to_string(),
            status.and_then(|i| row[i].as_text())?.to_string(),
        ))
    });
    let mut ds = CanonicalDataset::new(
        DatasetKind::Deliverable,
        vec!["uf".to_string(), "status".to_string(), "quantidade".to_string()],
    );
    for ((uf, status), count) in counts {
        ds.rows.push(vec![
            CleanValue::Text(uf),
            CleanValue::Text(status),
            CleanValue::Int(count),
        ]);
    }
    ds
}

fn product_stats_dataset(products: &CanonicalDataset) -> CanonicalDataset {
    let cod = products.column_index("cod_produto");
    let desc = products.column_index("desc_produto");
    let counts = count_by(products, |row| {
        Some((
            cod.and_then(|i| row[i].as_text())?.to_string(),
            desc.and_then(|i| row[i].as_text())?.to_string(),
        ))
    });
    let mut ds = CanonicalDataset::new(
        DatasetKind::Deliverable,
        vec![
            "cod_produto".to_string(),
            "desc_produto".to_string(),
            "quantidade".to_string(),
        ],
    );
    for ((cod, desc), count) in counts {
        ds.rows.push(vec![
            CleanValue::Text(cod),
            CleanValue::Text(desc),
            CleanValue::Int(count),
        ]);
    }
    ds
}

/// Top 50 municipalities by deliverable count, placeholder excluded
fn municipality_stats_dataset(products: &CanonicalDataset) -> CanonicalDataset {
    let mun = products.column_index("municipio");
    let counts = count_by(products, |row| {
        mun.and_then(|i| row[i].as_text())
            .filter(|m| *m != PLACEHOLDER)
            .map(|m| m.to_string())
    });
    let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(50);
    let mut ds = CanonicalDataset::new(
        DatasetKind::Deliverable,
        vec!["municipio".to_string(), "quantidade".to_string()],
    );
    for (mun, count) in ranked {
        ds.rows
            .push(vec![CleanValue::Text(mun), CleanValue::Int(count)]);
    }
    ds
}

/// Organizations with sphere buckets and the submission flag
fn organs_dataset(orgs: &CanonicalDataset, senders: &BTreeSet<String>) -> CanonicalDataset {
    let nome = orgs.column_index("nome");
    let esfera = orgs.column_index("esfera");
    let mut ds = CanonicalDataset::new(
        DatasetKind::Organization,
        vec![
            "nome".to_string(),
            "esfera".to_string(),
            "enviou_produto".to_string(),
        ],
    );
    for row in &orgs.rows {
        let name = nome.and_then(|i| row[i].as_text()).unwrap_or(PLACEHOLDER);
        let key = canonical_key(name);
        let sent = if !key.is_empty() && senders.contains(&key) {
            "SIM"
        } else {
            "NAO"
        };
        ds.rows.push(vec![
            CleanValue::Text(name.to_string()),
            CleanValue::Text(normalize_sphere(
                esfera.and_then(|i| row[i].as_text()).unwrap_or(""),
            )),
            CleanValue::Text(sent.to_string()),
        ]);
    }
    ds
}

fn reconcile_unit(
    table: Option<crate::reader::RawTable>,
    schema: &crate::schema::DatasetSchema,
    summary: &mut StageSummary,
) -> Option<CanonicalDataset> {
    let table = table?;
    match reconcile(&table, schema) {
        SheetOutcome::Table(r) => {
            summary.processed += 1;
            Some(r.dataset)
        }
        SheetOutcome::Skipped { source, reason } => {
            warn!(%source, %reason, "management extract skipped");
            summary.skipped += 1;
            None
        }
    }
}

/// Ingest the fixed-name management extracts
pub async fn run(input_dir: &Path, loader: &BulkLoader) -> Result<StageSummary> {
    let mut summary = StageSummary::new("management");
    if !input_dir.is_dir() {
        return Err(viario_common::ViarioError::InputDirNotFound(
            input_dir.display().to_string(),
        ));
    }
    info!("management stage starting");

    let main = reconcile_unit(
        read_optional(input_dir, PRODUCTS_FILE),
        &DELIVERABLE_SCHEMA,
        &mut summary,
    );
    let new = reconcile_unit(
        read_optional(input_dir, NEW_PRODUCTS_FILE),
        &NEW_DELIVERABLE_SCHEMA,
        &mut summary,
    );
    let orgs = reconcile_unit(
        read_optional(input_dir, ORGANS_FILE),
        &ORGANIZATION_SCHEMA,
        &mut summary,
    );
    let users = reconcile_unit(
        read_optional(input_dir, USERS_FILE),
        &USER_SCHEMA,
        &mut summary,
    );

    if main.is_none() && new.is_none() && orgs.is_none() && users.is_none() {
        warn!("no usable management input found");
        return Err(viario_common::ViarioError::NoUsableInput(
            summary.stage.to_string(),
        ));
    }

    if let Some(users) = &users {
        summary.reports.push(loader.load(users, &USERS_TABLE).await?);
    }

    let consolidated = consolidate_products(main.as_ref(), new.as_ref());
    if !consolidated.products.is_empty() {
        let products = &consolidated.products;
        summary
            .reports
            .push(loader.load(products, &PRODUCTS_TABLE).await?);
        summary
            .reports
            .push(loader.load(&ranking_dataset(products), &RANKING_TABLE).await?);
        summary.reports.push(
            loader
                .load(&status_stats_dataset(products), &STATUS_STATS_TABLE)
                .await?,
        );
        summary.reports.push(
            loader
                .load(&product_stats_dataset(products), &PRODUCT_STATS_TABLE)
                .await?,
        );
        summary.reports.push(
            loader
                .load(&municipality_stats_dataset(products), &MUNICIPALITY_STATS_TABLE)
                .await?,
        );
    } else {
        warn!("no deliverable input found");
    }

    if let Some(orgs) = &orgs {
        let ds = organs_dataset(orgs, &consolidated.senders);
        summary.reports.push(loader.load(&ds, &ORGANS_TABLE).await?);
    }

    summary.log();
    Ok(summary)
}
