use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::auth::{Role, User, email_local_part, is_legacy_hash, normalize_email};
use crate::db::{
    get_legacy_progress, get_users_by_role, insert_account, insert_lesson, insert_mood,
    save_legacy_progress,
};
use crate::error::AppError;
use crate::models::{DuplicateDatePolicy, LegacyProgress, NewLessonEntry, NewMoodEntry, split_tags};

pub const USERS_FILE: &str = "users.csv";

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-z0-9]+").expect("static regex is valid"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Email,
    Password,
    Role,
    Date,
    Class,
    Energy,
    Stress,
    MentalClarity,
    LessonApproach,
    ClassroomManagement,
    PositiveTags,
    NegativeTags,
}

fn normalize_header(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    NON_ALPHANUMERIC.replace_all(&lowered, "").into_owned()
}

fn column_for(header: &str) -> Option<Column> {
    let column = match normalize_header(header).as_str() {
        "email" | "mail" | "emailadres" => Column::Email,
        "password" | "wachtwoord" | "passwordhash" => Column::Password,
        "role" | "rol" => Column::Role,
        "datum" | "date" | "dag" | "tijd" | "tijdstip" | "timestamp" => Column::Date,
        "klas" | "class" | "classlabel" => Column::Class,
        "energie" | "energy" | "energieniveau" => Column::Energy,
        "stress" | "stressniveau" => Column::Stress,
        "mentalehelderheid" | "helderheid" | "mentalclarity" => Column::MentalClarity,
        "didactiek" | "lesaanpak" | "aanpak" | "lessonapproach" => Column::LessonApproach,
        "klasmanagement" | "klasbeheer" | "classroommanagement" => Column::ClassroomManagement,
        "positief" | "positieve" | "positievetags" | "tagspositief" | "positive"
        | "positivetags" => Column::PositiveTags,
        "negatief" | "negatieve" | "negatievetags" | "tagsnegatief" | "negative"
        | "negativetags" => Column::NegativeTags,
        _ => return None,
    };

    Some(column)
}

struct ColumnMap(HashMap<Column, usize>);

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            if let Some(column) = column_for(header) {
                // First occurrence wins when a file repeats a column.
                map.entry(column).or_insert(i);
            }
        }
        Self(map)
    }

    fn has(&self, column: Column) -> bool {
        self.0.contains_key(&column)
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        let i = *self.0.get(&column)?;
        record.get(i).map(str::trim).filter(|v| !v.is_empty())
    }

    fn score(
        &self,
        record: &csv::StringRecord,
        column: Column,
        range: std::ops::RangeInclusive<i64>,
    ) -> Option<i64> {
        parse_score(self.get(record, column)?, range)
    }
}

pub fn parse_lenient_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|dt| dt.date())
        })
}

// Spreadsheet round trips sometimes wrote `3.0`.
pub fn parse_score(raw: &str, range: std::ops::RangeInclusive<i64>) -> Option<i64> {
    let raw = raw.trim();

    let value = match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            let float = raw.replace(',', ".").parse::<f64>().ok()?;
            if float.fract() != 0.0 {
                return None;
            }
            float as i64
        }
    };

    range.contains(&value).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFileKind {
    Combined,
    Mood,
    Lessons,
}

fn classify_log_file(file_name: &str) -> Option<(String, LogFileKind)> {
    let stem = file_name.strip_suffix(".csv")?;

    if file_name == USERS_FILE || stem.starts_with("report_") || stem.is_empty() {
        return None;
    }

    let (local_part, kind) = if let Some(local) = stem.strip_suffix("_day") {
        (local, LogFileKind::Mood)
    } else if let Some(local) = stem.strip_suffix("_lessons") {
        (local, LogFileKind::Lessons)
    } else {
        (stem, LogFileKind::Combined)
    };

    Some((local_part.to_lowercase(), kind))
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct ImportSummary {
    pub accounts_created: usize,
    pub accounts_skipped: usize,
    pub mood_entries: usize,
    pub lesson_entries: usize,
    pub rows_dropped: usize,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub ambiguous_local_parts: Vec<String>,
    pub unmatched_files: Vec<String>,
    pub changed_files: Vec<String>,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Accounts: {} created, {} already present",
            self.accounts_created, self.accounts_skipped
        )?;
        writeln!(
            f,
            "Entries: {} mood, {} lesson, {} rows dropped",
            self.mood_entries, self.lesson_entries, self.rows_dropped
        )?;
        writeln!(
            f,
            "Files: {} imported, {} up to date",
            self.files_imported, self.files_skipped
        )?;
        for local_part in &self.ambiguous_local_parts {
            writeln!(f, "    Ambiguous owner, skipped: {}", local_part)?;
        }
        for file in &self.unmatched_files {
            writeln!(f, "    No matching account, skipped: {}", file)?;
        }
        for file in &self.changed_files {
            writeln!(f, "    Rewritten since last import, skipped: {}", file)?;
        }
        Ok(())
    }
}

fn hash_record(hasher: &mut Sha256, record: &csv::StringRecord) {
    for field in record.iter() {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1e]);
}

// Fingerprint of the header plus the given rows; unreadable rows count by position.
fn rows_hash(headers: &csv::StringRecord, rows: &[csv::Result<csv::StringRecord>]) -> String {
    let mut hasher = Sha256::new();
    hash_record(&mut hasher, headers);

    for row in rows {
        match row {
            Ok(record) => hash_record(&mut hasher, record),
            Err(_) => hasher.update([0xff, 0x1e]),
        }
    }

    format!("{:x}", hasher.finalize())
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes)
}

#[derive(Debug, Clone, Copy)]
enum FileTarget<'a> {
    Accounts { director_prefix: &'a str },
    Log { owner: &'a User, kind: LogFileKind },
}

async fn import_account_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    columns: &ColumnMap,
    record: &csv::StringRecord,
    row: usize,
    director_prefix: &str,
    summary: &mut ImportSummary,
) -> Result<(), AppError> {
    let email = columns
        .get(record, Column::Email)
        .map(normalize_email)
        .filter(|email| email_local_part(email).is_some());
    let password = columns.get(record, Column::Password);

    let (Some(email), Some(password)) = (email, password) else {
        warn!(row, "Account row without a usable email or password");
        summary.rows_dropped += 1;
        return Ok(());
    };

    if !is_legacy_hash(password) && !password.starts_with("$2") {
        warn!(row, email = %email, "Account row with an unrecognised password hash");
        summary.rows_dropped += 1;
        return Ok(());
    }

    let role = columns
        .get(record, Column::Role)
        .and_then(|r| Role::from_str(r).ok())
        .unwrap_or_else(|| Role::for_email(&email, director_prefix));

    match insert_account(tx, &email, password, role).await {
        Ok(_) => summary.accounts_created += 1,
        Err(AppError::DuplicateAccount(_)) => summary.accounts_skipped += 1,
        Err(err) => return Err(err),
    }

    Ok(())
}

async fn import_log_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    columns: &ColumnMap,
    record: &csv::StringRecord,
    owner: &User,
    kind: LogFileKind,
    summary: &mut ImportSummary,
) -> Result<(), AppError> {
    let Some(date) = columns
        .get(record, Column::Date)
        .and_then(parse_lenient_date)
    else {
        summary.rows_dropped += 1;
        return Ok(());
    };

    let class_label = columns.get(record, Column::Class);

    if matches!(kind, LogFileKind::Combined | LogFileKind::Mood) {
        let energy = columns.score(record, Column::Energy, 1..=10);
        let stress = columns.score(record, Column::Stress, 1..=10);

        match (energy, stress) {
            (Some(energy), Some(stress)) => {
                let entry = NewMoodEntry {
                    entry_date: date,
                    energy,
                    stress,
                    mental_clarity: columns.score(record, Column::MentalClarity, 1..=10),
                    class_label: class_label.map(String::from),
                };
                insert_mood(tx, owner.id, &entry, DuplicateDatePolicy::Allow).await?;
                summary.mood_entries += 1;
            }
            _ => summary.rows_dropped += 1,
        }
    }

    if matches!(kind, LogFileKind::Combined | LogFileKind::Lessons) {
        let approach = columns.score(record, Column::LessonApproach, 1..=5);
        let management = columns.score(record, Column::ClassroomManagement, 1..=5);

        match (class_label, approach, management) {
            (Some(class_label), Some(approach), Some(management)) => {
                let entry = NewLessonEntry {
                    lesson_date: date,
                    class_label: class_label.to_string(),
                    lesson_approach: approach,
                    classroom_management: management,
                    positive_tags: columns
                        .get(record, Column::PositiveTags)
                        .map(split_tags)
                        .unwrap_or_default(),
                    negative_tags: columns
                        .get(record, Column::NegativeTags)
                        .map(split_tags)
                        .unwrap_or_default(),
                };
                insert_lesson(tx, owner.id, &entry).await?;
                summary.lesson_entries += 1;
            }
            _ => summary.rows_dropped += 1,
        }
    }

    Ok(())
}

// Imports the rows appended since the last run, all in one transaction with the
// new progress record. A file whose earlier rows changed is left alone.
#[instrument(skip(pool, bytes, target, summary))]
async fn import_file(
    pool: &Pool<Sqlite>,
    file_name: &str,
    bytes: &[u8],
    target: FileTarget<'_>,
    summary: &mut ImportSummary,
) -> Result<(), AppError> {
    let mut reader = csv_reader(bytes);
    let headers = reader.headers()?.clone();
    let rows: Vec<csv::Result<csv::StringRecord>> = reader.records().collect();
    let columns = ColumnMap::from_headers(&headers);

    let is_accounts = matches!(target, FileTarget::Accounts { .. });
    if is_accounts && !(columns.has(Column::Email) && columns.has(Column::Password)) {
        return Err(AppError::Validation(format!(
            "{} needs email and password columns",
            USERS_FILE
        )));
    }

    let start = match get_legacy_progress(pool, file_name).await? {
        None => 0,
        Some(progress) => {
            let rows_read = usize::try_from(progress.rows_read).unwrap_or(usize::MAX);

            if rows_read > rows.len() || rows_hash(&headers, &rows[..rows_read]) != progress.rows_hash
            {
                warn!(file = %file_name, rows_read, "Legacy file was rewritten since its last import");
                summary.changed_files.push(file_name.to_string());
                return Ok(());
            }

            if rows_read == rows.len() {
                summary.files_skipped += 1;
                return Ok(());
            }

            rows_read
        }
    };

    let mut tx = pool.begin().await?;

    for (n, row) in rows.iter().enumerate().skip(start) {
        let record = match row {
            Ok(record) => record,
            Err(err) => {
                warn!(row = n + 1, error = %err, "Unreadable legacy row");
                summary.rows_dropped += 1;
                continue;
            }
        };

        match target {
            FileTarget::Accounts { director_prefix } => {
                import_account_row(&mut tx, &columns, record, n + 1, director_prefix, summary)
                    .await?
            }
            FileTarget::Log { owner, kind } => {
                import_log_row(&mut tx, &columns, record, owner, kind, summary).await?
            }
        }
    }

    let progress = LegacyProgress {
        file_name: file_name.to_string(),
        rows_read: rows.len() as i64,
        rows_hash: rows_hash(&headers, &rows),
    };
    save_legacy_progress(&mut tx, &progress).await?;
    tx.commit().await?;

    summary.files_imported += 1;
    info!(file = %file_name, new_rows = rows.len() - start, "Imported legacy file");

    Ok(())
}

async fn accounts_by_local_part(
    pool: &Pool<Sqlite>,
) -> Result<HashMap<String, Vec<User>>, AppError> {
    let mut map: HashMap<String, Vec<User>> = HashMap::new();

    for role in [Role::Teacher, Role::Director] {
        for user in get_users_by_role(pool, role).await? {
            if let Some(local_part) = email_local_part(&user.email) {
                map.entry(local_part.to_string()).or_default().push(user);
            }
        }
    }

    Ok(map)
}

// Re-running imports only rows appended to a file since the previous run.
#[instrument(skip(pool))]
pub async fn import_legacy_directory(
    pool: &Pool<Sqlite>,
    dir: &Path,
    director_prefix: &str,
) -> Result<ImportSummary, AppError> {
    let mut summary = ImportSummary::default();

    let users_path = dir.join(USERS_FILE);
    if users_path.exists() {
        let bytes = fs::read(&users_path)?;
        import_file(
            pool,
            USERS_FILE,
            &bytes,
            FileTarget::Accounts { director_prefix },
            &mut summary,
        )
        .await?;
    } else {
        warn!(path = %users_path.display(), "No legacy account table found");
    }

    let owners = accounts_by_local_part(pool).await?;

    let mut file_names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    file_names.sort();

    for file_name in file_names {
        let Some((local_part, kind)) = classify_log_file(&file_name) else {
            continue;
        };

        let owner = match owners.get(&local_part).map(Vec::as_slice) {
            Some([owner]) => owner,
            Some(_) => {
                warn!(local_part = %local_part, file = %file_name, "Several accounts share this local part");
                if !summary.ambiguous_local_parts.contains(&local_part) {
                    summary.ambiguous_local_parts.push(local_part);
                }
                continue;
            }
            None => {
                warn!(file = %file_name, "No account matches legacy file");
                summary.unmatched_files.push(file_name);
                continue;
            }
        };

        let bytes = fs::read(dir.join(&file_name))?;
        import_file(
            pool,
            &file_name,
            &bytes,
            FileTarget::Log { owner, kind },
            &mut summary,
        )
        .await?;
    }

    info!(?summary, "Legacy import finished");
    Ok(summary)
}
