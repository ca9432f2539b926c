#[macro_use]
extern crate rocket;

pub mod aggregate;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod legacy;
pub mod models;
pub mod report;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use api::{
    api_add_lesson, api_add_mood, api_classes, api_export, api_get_lessons, api_get_mood,
    api_login, api_logout, api_me, api_monthly_report, api_register, api_school_overview, health,
};
use auth::{forbidden_api, unauthorized_api};
use config::AppConfig;
use error::AppError;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use telemetry::TelemetryFairing;
use tracing::info;

pub async fn connect_and_migrate(database_url: &str) -> Result<SqlitePool, AppError> {
    let pool = SqlitePoolOptions::new().connect(database_url).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    Ok(pool)
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting teaching journal");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_register,
                api_login,
                api_logout,
                api_me,
                api_classes,
                api_add_mood,
                api_get_mood,
                api_add_lesson,
                api_get_lessons,
                api_export,
                api_school_overview,
                api_monthly_report,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
