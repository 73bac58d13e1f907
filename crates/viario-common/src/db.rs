//! Destination store configuration and pool construction
//!
//! The pipeline talks to a single Postgres database. The connection string
//! is required configuration with no default; chunk workers additionally
//! open their own single connections from the same URL.

use crate::error::{Result, ViarioError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DbConfig {
    /// Load configuration from the environment
    ///
    /// `DATABASE_URL` is required. `DB_MAX_CONNECTIONS` and
    /// `DB_CONNECT_TIMEOUT` tune the shared pool.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| ViarioError::Config("DATABASE_URL not set".to_string()))?;

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let connect_timeout_secs = std::env::var("DB_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            url,
            max_connections,
            connect_timeout_secs,
        })
    }
}

/// Create the shared connection pool used by DDL and index statements
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Cheap connectivity probe, run once at stage entry
pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // One test, not two: parallel tests racing on DATABASE_URL flake
    #[test]
    fn test_config_from_env() {
        std::env::remove_var("DATABASE_URL");
        assert!(DbConfig::from_env().is_err());

        std::env::set_var("DATABASE_URL", "postgresql://localhost/viario_test");
        std::env::set_var("DB_MAX_CONNECTIONS", "7");

        let config = DbConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 7);
        assert!(config.url.contains("viario_test"));

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("DB_MAX_CONNECTIONS");
    }
}
