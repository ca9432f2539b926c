use std::path::PathBuf;
use std::process::ExitCode;

use teaching_journal::config::{AppConfig, load_environment};
use teaching_journal::connect_and_migrate;
use teaching_journal::legacy::import_legacy_directory;
use teaching_journal::telemetry::init_tracing;

#[rocket::main]
async fn main() -> ExitCode {
    let env_result = load_environment();
    let _telemetry_guard = init_tracing();

    if let Err(err) = env_result {
        tracing::warn!(error = %err, "Failed to load environment files");
    }

    let config = AppConfig::from_env();
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_dir.clone());

    if !dir.is_dir() {
        eprintln!("Usage: import_legacy <directory>");
        eprintln!("{} is not a directory", dir.display());
        return ExitCode::FAILURE;
    }

    let pool = match connect_and_migrate(&config.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("Could not open database {}: {}", config.database_url, err);
            return ExitCode::FAILURE;
        }
    };

    match import_legacy_directory(&pool, &dir, &config.director_prefix).await {
        Ok(summary) => {
            println!("Imported legacy data from {}", dir.display());
            print!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Import failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
