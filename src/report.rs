use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::aggregate::{class_averages, overall_averages};
use crate::db::{get_lesson_entries_between, get_mood_entries_between};
use crate::error::AppError;
use crate::models::{ClassAverages, LessonEntry, MoodEntry};

const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub classes: Vec<ClassAverages>,
    pub school: ClassAverages,
}

#[derive(Serialize)]
struct ReportRow<'a> {
    scope: &'a str,
    label: &'a str,
    entries: usize,
    lesson_approach: String,
    classroom_management: String,
    energy: String,
    stress: String,
    mental_clarity: String,
}

fn cell(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };

    Some((first, next.pred_opt()?))
}

#[instrument(skip(pool))]
pub async fn build_monthly_report(
    pool: &Pool<Sqlite>,
    year: i32,
    month: u32,
) -> Result<MonthlyReport, AppError> {
    let (from, to) = month_bounds(year, month)
        .ok_or_else(|| AppError::Validation(format!("Invalid month {}-{}", year, month)))?;

    let lessons = get_lesson_entries_between(pool, from, to).await?;
    let moods = get_mood_entries_between(pool, from, to).await?;

    info!(
        lessons = lessons.len(),
        moods = moods.len(),
        "Building monthly report"
    );

    Ok(MonthlyReport {
        year: from.year(),
        month: from.month(),
        classes: class_averages(&lessons, &moods),
        school: overall_averages(&lessons, &moods, "all"),
    })
}

pub fn report_file_name(year: i32, month: u32) -> String {
    format!("report_{:04}_{:02}.csv", year, month)
}

impl<'a> ReportRow<'a> {
    fn new(scope: &'a str, averages: &'a ClassAverages) -> Self {
        Self {
            scope,
            label: &averages.class_label,
            entries: averages.entries,
            lesson_approach: cell(averages.lesson_approach),
            classroom_management: cell(averages.classroom_management),
            energy: cell(averages.energy),
            stress: cell(averages.stress),
            mental_clarity: cell(averages.mental_clarity),
        }
    }
}

// One row per class, then the school-wide row.
pub fn write_report_csv<W: std::io::Write>(
    report: &MonthlyReport,
    writer: W,
) -> Result<(), AppError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for class in &report.classes {
        csv_writer.serialize(ReportRow::new("class", class))?;
    }
    csv_writer.serialize(ReportRow::new("school", &report.school))?;

    csv_writer.flush()?;
    Ok(())
}

pub fn render_report_csv(report: &MonthlyReport) -> Result<String, AppError> {
    let mut body = Vec::new();
    write_report_csv(report, &mut body)?;
    String::from_utf8(body).map_err(|err| AppError::Internal(err.to_string()))
}

// The file is renamed into place, so readers never see a half-written report.
#[instrument(skip(report), fields(year = report.year, month = report.month))]
pub fn write_monthly_report(
    report: &MonthlyReport,
    data_dir: &Path,
) -> Result<(PathBuf, String), AppError> {
    let body = render_report_csv(report)?;
    fs::create_dir_all(data_dir)?;

    let path = data_dir.join(report_file_name(report.year, report.month));
    let staging = data_dir.join(format!(
        ".{}.{}.tmp",
        report_file_name(report.year, report.month),
        uuid::Uuid::new_v4()
    ));
    fs::write(&staging, body.as_bytes())?;
    fs::rename(&staging, &path)?;

    info!(path = %path.display(), "Monthly report written");
    Ok((path, body))
}

#[derive(Serialize)]
struct MoodExportRow<'a> {
    entry_date: NaiveDate,
    class_label: Option<&'a str>,
    energy: i64,
    stress: i64,
    mental_clarity: Option<i64>,
    created_at: String,
}

#[derive(Serialize)]
struct LessonExportRow<'a> {
    lesson_date: NaiveDate,
    class_label: &'a str,
    lesson_approach: i64,
    classroom_management: i64,
    positive_tags: String,
    negative_tags: String,
    created_at: String,
}

pub fn write_mood_export<W: std::io::Write>(
    entries: &[MoodEntry],
    writer: W,
) -> Result<(), AppError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for entry in entries {
        csv_writer.serialize(MoodExportRow {
            entry_date: entry.entry_date,
            class_label: entry.class_label.as_deref(),
            energy: entry.energy,
            stress: entry.stress,
            mental_clarity: entry.mental_clarity,
            created_at: entry.created_at.to_rfc3339(),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn write_lesson_export<W: std::io::Write>(
    entries: &[LessonEntry],
    writer: W,
) -> Result<(), AppError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for entry in entries {
        csv_writer.serialize(LessonExportRow {
            lesson_date: entry.lesson_date,
            class_label: &entry.class_label,
            lesson_approach: entry.lesson_approach,
            classroom_management: entry.classroom_management,
            positive_tags: join_tags(&entry.positive_tags),
            negative_tags: join_tags(&entry.negative_tags),
            created_at: entry.created_at.to_rfc3339(),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn join_tags(tags: &std::collections::BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(";")
}
