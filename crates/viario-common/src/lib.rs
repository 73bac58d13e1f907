//! Viario Common Library
//!
//! Shared building blocks for the viario data pipeline:
//!
//! - **Error Handling**: the error taxonomy shared by every stage
//! - **Logging**: centralized tracing setup (console/file, text/JSON)
//! - **Database**: connection-pool configuration for the destination store

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod db;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, ViarioError};
