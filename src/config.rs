use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::auth::AccountRules;
use crate::models::DuplicateDatePolicy;

pub fn load_environment() -> Result<(), dotenvy::Error> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string())
            == "production";

    let profile_file = if is_production {
        "config/prod.env"
    } else {
        "config/dev.env"
    };

    for env_file in ["config/common.env", profile_file, ".secrets.env"] {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

// Costs the bcrypt crate accepts.
const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;
const MAX_SESSION_HOURS: i64 = 24 * 7;
const MAX_REMEMBER_ME_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub institution_domain: Option<String>,
    pub director_prefix: String,
    // Empty means free text.
    pub class_labels: Vec<String>,
    pub reject_duplicate_mood_dates: bool,
    pub session_hours: i64,
    pub remember_me_days: i64,
    pub bcrypt_cost: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/journal.db?mode=rwc".to_string(),
            data_dir: PathBuf::from("data"),
            institution_domain: None,
            director_prefix: "directie".to_string(),
            class_labels: Vec::new(),
            reject_duplicate_mood_dates: false,
            session_hours: 12,
            remember_me_days: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    match dotenvy::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid configuration value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    dotenvy::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        let class_labels = non_empty_var("CLASS_LABELS")
            .map(|raw| {
                raw.split(',')
                    .map(|label| label.trim().to_string())
                    .filter(|label| !label.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.class_labels);

        let bcrypt_cost = parsed_var("BCRYPT_COST", defaults.bcrypt_cost);
        let bcrypt_cost = if BCRYPT_COST_RANGE.contains(&bcrypt_cost) {
            bcrypt_cost
        } else {
            warn!(bcrypt_cost, "BCRYPT_COST out of range, using default");
            bcrypt::DEFAULT_COST
        };

        Self {
            database_url: non_empty_var("DATABASE_URL").unwrap_or(defaults.database_url),
            data_dir: non_empty_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            institution_domain: non_empty_var("INSTITUTION_DOMAIN")
                .map(|d| d.trim_start_matches('@').to_lowercase()),
            director_prefix: non_empty_var("DIRECTOR_PREFIX")
                .map(|p| p.to_lowercase())
                .unwrap_or(defaults.director_prefix),
            class_labels,
            reject_duplicate_mood_dates: parsed_var(
                "REJECT_DUPLICATE_MOOD_DATES",
                defaults.reject_duplicate_mood_dates,
            ),
            session_hours: parsed_var("SESSION_HOURS", defaults.session_hours)
                .clamp(1, MAX_SESSION_HOURS),
            remember_me_days: parsed_var("REMEMBER_ME_DAYS", defaults.remember_me_days)
                .clamp(1, MAX_REMEMBER_ME_DAYS),
            bcrypt_cost,
        }
    }

    pub fn account_rules(&self) -> AccountRules {
        AccountRules {
            institution_domain: self.institution_domain.clone(),
            director_prefix: self.director_prefix.clone(),
            min_password_length: 8,
            hash_cost: self.bcrypt_cost,
        }
    }

    pub fn mood_policy(&self) -> DuplicateDatePolicy {
        if self.reject_duplicate_mood_dates {
            DuplicateDatePolicy::Reject
        } else {
            DuplicateDatePolicy::Allow
        }
    }

    pub fn resolve_class_label(&self, label: &str) -> Option<String> {
        let label = label.trim();

        if label.is_empty() {
            return None;
        }

        if self.class_labels.is_empty() {
            return Some(label.to_string());
        }

        self.class_labels
            .iter()
            .find(|known| known.eq_ignore_ascii_case(label))
            .cloned()
    }
}
