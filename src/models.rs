use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoodEntry {
    pub id: i64,
    pub user_id: i64,
    pub entry_date: NaiveDate,
    pub energy: i64,
    pub stress: i64,
    pub mental_clarity: Option<i64>,
    pub class_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbMoodEntry {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub entry_date: Option<NaiveDate>,
    pub energy: Option<i64>,
    pub stress: Option<i64>,
    pub mental_clarity: Option<i64>,
    pub class_label: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbMoodEntry> for MoodEntry {
    fn from(db: DbMoodEntry) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            entry_date: db.entry_date.unwrap_or_default(),
            energy: db.energy.unwrap_or_default(),
            stress: db.stress.unwrap_or_default(),
            mental_clarity: db.mental_clarity,
            class_label: db.class_label,
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateDatePolicy {
    #[default]
    Allow,
    Reject,
}

#[derive(Debug, Clone)]
pub struct NewMoodEntry {
    pub entry_date: NaiveDate,
    pub energy: i64,
    pub stress: i64,
    pub mental_clarity: Option<i64>,
    pub class_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolarity {
    Positive,
    Negative,
}

impl TagPolarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagPolarity::Positive => "positive",
            TagPolarity::Negative => "negative",
        }
    }
}

impl fmt::Display for TagPolarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonEntry {
    pub id: i64,
    pub user_id: i64,
    pub lesson_date: NaiveDate,
    pub class_label: String,
    pub lesson_approach: i64,
    pub classroom_management: i64,
    pub positive_tags: BTreeSet<String>,
    pub negative_tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbLessonEntry {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub lesson_date: Option<NaiveDate>,
    pub class_label: Option<String>,
    pub lesson_approach: Option<i64>,
    pub classroom_management: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbLessonEntry> for LessonEntry {
    fn from(db: DbLessonEntry) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lesson_date: db.lesson_date.unwrap_or_default(),
            class_label: db.class_label.unwrap_or_default(),
            lesson_approach: db.lesson_approach.unwrap_or_default(),
            classroom_management: db.classroom_management.unwrap_or_default(),
            positive_tags: BTreeSet::new(),
            negative_tags: BTreeSet::new(),
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLessonTag {
    pub lesson_id: i64,
    pub polarity: String,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct NewLessonEntry {
    pub lesson_date: NaiveDate,
    pub class_label: String,
    pub lesson_approach: i64,
    pub classroom_management: i64,
    pub positive_tags: BTreeSet<String>,
    pub negative_tags: BTreeSet<String>,
}

pub fn clean_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Splits a delimited tag cell as written by the old spreadsheet exports.
pub fn split_tags(cell: &str) -> BTreeSet<String> {
    clean_tags(cell.split([',', ';', '|']))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassAverages {
    pub class_label: String,
    pub entries: usize,
    pub lesson_approach: Option<f64>,
    pub classroom_management: Option<f64>,
    pub mood_entries: usize,
    pub energy: Option<f64>,
    pub stress: Option<f64>,
    pub mental_clarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MoodAverages {
    pub entries: usize,
    pub energy: Option<f64>,
    pub stress: Option<f64>,
    pub mental_clarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

// How far a legacy file has been imported.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct LegacyProgress {
    pub file_name: String,
    pub rows_read: i64,
    pub rows_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchoolOverview {
    pub teacher_count: i64,
    pub classes: Vec<ClassAverages>,
    pub mood: MoodAverages,
    pub positive_tags: Vec<TagCount>,
    pub negative_tags: Vec<TagCount>,
}
