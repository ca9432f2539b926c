use teaching_journal::config::{AppConfig, load_environment};
use teaching_journal::db::clean_expired_sessions;
use teaching_journal::error::AppError;
use teaching_journal::telemetry::init_tracing;
use teaching_journal::{connect_and_migrate, init_rocket};
use thiserror::Error;
use tracing::{error, info, warn};

const SESSION_CLEANUP_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("{0}")]
    Rocket(#[from] Box<rocket::Error>),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    // Env files may set RUST_LOG, so load them before the subscriber exists.
    let env_result = load_environment();
    let _telemetry_guard = init_tracing();

    if let Err(err) = env_result {
        warn!(error = %err, "Failed to load environment files");
    }

    let config = AppConfig::from_env();
    info!(
        database_url = %config.database_url,
        data_dir = %config.data_dir.display(),
        class_labels = config.class_labels.len(),
        "Configuration loaded"
    );

    let pool = connect_and_migrate(&config.database_url).await?;

    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&cleanup_pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
        }
    });

    init_rocket(pool, config)
        .launch()
        .await
        .map_err(Box::new)?;

    info!("Shutting down");
    Ok(())
}
