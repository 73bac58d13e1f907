//! Viario ETL - road safety data loader

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use viario_common::db::{create_pool, health_check, DbConfig};
use viario_common::logging::{init_logging, LogConfig, LogLevel};
use viario_etl::load::BulkLoader;
use viario_etl::pipeline::{crashes, management, mortality, population, StageSummary};

/// Exit: everything requested loaded completely
const EXIT_OK: u8 = 0;
/// Exit: some units or chunks failed but data landed
const EXIT_PARTIAL: u8 = 1;
/// Exit: nothing could run
const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "viario-etl")]
#[command(author, version, about = "Road safety data ETL")]
struct Cli {
    #[command(subcommand)]
    stage: Stage,

    /// Directory holding the source extracts
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Number of parallel load workers (defaults to cores minus one)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Federal highway crash records (acidentes*.csv)
    Crashes,
    /// Transport mortality statistics workbooks
    Mortality,
    /// Census population workbooks
    Population,
    /// Management platform extracts (fixed file names)
    Management,
    /// Every stage, each isolated from the others' failures
    All,
}

async fn run_stage(
    stage: &Stage,
    input_dir: &std::path::Path,
    loader: &BulkLoader,
) -> Vec<viario_common::Result<StageSummary>> {
    match stage {
        Stage::Crashes => vec![crashes::run(input_dir, loader).await],
        Stage::Mortality => vec![mortality::run(input_dir, loader).await],
        Stage::Population => vec![population::run(input_dir, loader).await],
        Stage::Management => vec![management::run(input_dir, loader).await],
        Stage::All => vec![
            crashes::run(input_dir, loader).await,
            mortality::run(input_dir, loader).await,
            population::run(input_dir, loader).await,
            management::run(input_dir, loader).await,
        ],
    }
}

fn exit_code(outcomes: &[viario_common::Result<StageSummary>]) -> u8 {
    let fatal = outcomes.iter().filter(|o| o.is_err()).count();
    if fatal == outcomes.len() {
        return EXIT_FATAL;
    }
    let partial = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .any(|s| s.is_partial());
    if fatal > 0 || partial {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    log_config.log_file_prefix = "viario-etl".to_string();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(EXIT_FATAL);
    }

    let db_config = match DbConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "database configuration missing");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    let pool = match create_pool(&db_config).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not connect to database");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    if let Err(e) = health_check(&pool).await {
        error!(error = %e, "database health check failed");
        return ExitCode::from(EXIT_FATAL);
    }

    let mut loader = BulkLoader::new(pool, db_config.url.clone());
    if let Some(workers) = cli.workers {
        loader = loader.with_workers(workers);
    }

    info!(stage = ?cli.stage, input_dir = %cli.input_dir.display(), "run starting");
    let outcomes = run_stage(&cli.stage, &cli.input_dir, &loader).await;
    for outcome in &outcomes {
        if let Err(e) = outcome {
            error!(error = %e, "stage failed");
        }
    }

    let code = exit_code(&outcomes);
    info!(exit_code = code, summary = %run_summary_json(&outcomes), "run finished");
    ExitCode::from(code)
}

/// One-line JSON rendering of every stage outcome, for log scrapers
fn run_summary_json(outcomes: &[viario_common::Result<StageSummary>]) -> String {
    let stages: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|outcome| match outcome {
            Ok(s) => serde_json::json!({
                "stage": s.stage,
                "processed": s.processed,
                "skipped": s.skipped,
                "failed": s.failed,
                "rows_loaded": s.rows_loaded(),
                "partial": s.is_partial(),
            }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        })
        .collect();
    serde_json::Value::Array(stages).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_dir_is_required() {
        assert!(Cli::try_parse_from(["viario-etl", "crashes"]).is_err());
        let cli = Cli::try_parse_from(["viario-etl", "--input-dir", "/tmp/extracts", "crashes"])
            .unwrap();
        assert_eq!(cli.input_dir, PathBuf::from("/tmp/extracts"));
    }

    #[test]
    fn test_exit_code_classification() {
        let ok = || -> viario_common::Result<StageSummary> { Ok(StageSummary::new("t")) };
        let err = || -> viario_common::Result<StageSummary> {
            Err(viario_common::ViarioError::NoUsableInput("t".to_string()))
        };
        assert_eq!(exit_code(&[ok()]), EXIT_OK);
        assert_eq!(exit_code(&[err()]), EXIT_FATAL);
        assert_eq!(exit_code(&[ok(), err()]), EXIT_PARTIAL);
        let mut partial = StageSummary::new("t");
        partial.failed = 1;
        assert_eq!(exit_code(&[Ok(partial)]), EXIT_PARTIAL);
    }
}
