//! Viario ETL
//!
//! Ingests road safety extracts (federal highway crash records, transport
//! mortality statistics, census population figures and program management
//! exports), reconciles their drifting schemas into canonical datasets,
//! rolls municipal figures up to region and country level and bulk-loads
//! everything into Postgres.

pub mod clean;
pub mod dataset;
pub mod geo;
pub mod headers;
pub mod load;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod tables;
