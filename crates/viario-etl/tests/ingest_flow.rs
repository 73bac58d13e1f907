//! End-to-end flow from source files to aggregated datasets, everything
//! short of the database.

use std::io::Write;

use viario_etl::clean::PLACEHOLDER;
use viario_etl::dataset::CanonicalDataset;
use viario_etl::geo::{GeoAggregator, COUNTRY_LABEL, STRATUM_COLUMN};
use viario_etl::reader::read_csv;
use viario_etl::schema::{reconcile, SheetOutcome, CRASH_SCHEMA, MORTALITY_SCHEMA};

fn write_fixture(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn expect_table(outcome: SheetOutcome) -> CanonicalDataset {
    match outcome {
        SheetOutcome::Table(r) => r.dataset,
        SheetOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason}"),
    }
}

#[test]
fn crash_csv_reconciles_with_header_drift() {
    let file = write_fixture(
        "Data Inversa;UF;Município;MORTOS;Feridos Leves;feridos_graves;latitude\n\
         15/03/2023;São Paulo;Campinas;1;2;1;-23,5505\n\
         2023-04-02;BA;;0;0;0;-\n",
    );
    let table = read_csv(file.path()).unwrap();
    let ds = expect_table(reconcile(&table, &CRASH_SCHEMA));

    assert_eq!(ds.len(), 2);
    assert_eq!(ds.columns.len(), CRASH_SCHEMA.fields.len());
    let uf = ds.column_index("uf").unwrap();
    let mun = ds.column_index("municipio").unwrap();
    let lat = ds.column_index("latitude").unwrap();
    assert_eq!(ds.rows[0][uf].as_text(), Some("SP"));
    assert_eq!(ds.rows[0][mun].as_text(), Some("CAMPINAS"));
    assert_eq!(ds.rows[0][lat].as_float(), Some(-23.5505));
    assert_eq!(ds.rows[1][uf].as_text(), Some("BA"));
    assert_eq!(ds.rows[1][mun].as_text(), Some(PLACEHOLDER));
    assert_eq!(ds.rows[1][lat].as_float(), Some(0.0));
}

#[test]
fn mortality_csv_to_country_rollup() {
    // Month abbreviations, thousands dots, a dash for zero and a footer
    // row, the usual shape of a published extract
    let file = write_fixture(
        "Ano (uid),Ano (nome),Local (nome),Jan,Março,Ano\n\
         2023,2023,São Paulo,\"1.234\",10,\"1.244\"\n\
         2023,2023,Bahia,100,-,100\n\
         2023,2023,Paraná,50,5,55\n\
         ,Fonte: MS/SVS,,,,\n",
    );
    let table = read_csv(file.path()).unwrap();
    assert!(table.headers.contains(&"janeiro".to_string()));
    assert!(table.headers.contains(&"marco".to_string()));

    let mut ds = expect_table(reconcile(&table, &MORTALITY_SCHEMA));
    // Footer row reconciles to a zero year uid
    let ano_uid = ds.column_index("ano_uid").unwrap();
    ds.retain(|row| row[ano_uid].as_int().unwrap_or(0) > 0);
    assert_eq!(ds.len(), 3);

    let agg = GeoAggregator::new(
        "local_nome",
        &["ano_uid"],
        &["janeiro", "marco", "total_anual"],
    );
    let report = agg.aggregate(ds).unwrap();
    let ds = report.dataset;
    assert!(report.unmapped.is_empty());

    let stratum = ds.column_index(STRATUM_COLUMN).unwrap();
    let local = ds.column_index("local_nome").unwrap();
    let jan = ds.column_index("janeiro").unwrap();
    let total = ds.column_index("total_anual").unwrap();

    let find = |name: &str| {
        ds.rows
            .iter()
            .find(|r| r[local].as_text() == Some(name))
            .cloned()
            .unwrap_or_else(|| panic!("no row for {name}"))
    };
    let sudeste = find("Sudeste");
    assert_eq!(sudeste[jan].as_int(), Some(1234));
    assert_eq!(sudeste[stratum].as_text(), Some("regiao"));
    let nordeste = find("Nordeste");
    assert_eq!(nordeste[jan].as_int(), Some(100));
    let brasil = find(COUNTRY_LABEL);
    assert_eq!(brasil[jan].as_int(), Some(1384));
    assert_eq!(brasil[total].as_int(), Some(1399));
    assert_eq!(brasil[stratum].as_text(), Some("pais"));

    // Base rows survive untouched under their own stratum
    let base: Vec<_> = ds
        .rows
        .iter()
        .filter(|r| r[stratum].as_text() == Some("municipio"))
        .collect();
    assert_eq!(base.len(), 3);
}

#[test]
fn latin1_crash_file_decodes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // "uf;municipio\nSP;São" with the ã in Windows-1252
    file.write_all(b"uf;municipio\nSP;S\xe3o Paulo\n").unwrap();
    let table = read_csv(file.path()).unwrap();
    let ds = expect_table(reconcile(&table, &CRASH_SCHEMA));
    let mun = ds.column_index("municipio").unwrap();
    assert_eq!(ds.rows[0][mun].as_text(), Some("SÃO PAULO"));
}
