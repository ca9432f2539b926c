use std::collections::HashMap;

use crate::{
    auth::{
        AccountRules, DbUser, DbUserSession, PasswordCheck, Role, User, UserSession,
        check_password, hash_password, normalize_email,
    },
    error::AppError,
    models::{
        DbLessonEntry, DbLessonTag, DbMoodEntry, DuplicateDatePolicy, LegacyProgress, LessonEntry,
        MoodEntry, NewLessonEntry, NewMoodEntry, TagPolarity,
    },
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

const USER_COLUMNS: &str = "SELECT id, email, role FROM users";
const MOOD_COLUMNS: &str = "SELECT id, user_id, entry_date, energy, stress, mental_clarity, class_label, created_at FROM mood_entries";
const LESSON_COLUMNS: &str = "SELECT id, user_id, lesson_date, class_label, lesson_approach, classroom_management, created_at FROM lesson_entries";

#[derive(sqlx::FromRow)]
struct DbCredentials {
    id: i64,
    password: String,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    let email = normalize_email(email);

    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE email = ?", USER_COLUMNS))
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(User::from))
}

#[instrument(skip(pool))]
pub async fn get_users_by_role(pool: &Pool<Sqlite>, role: Role) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(&format!("{} WHERE role = ? ORDER BY id", USER_COLUMNS))
        .bind(role.as_str())
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_users_by_role(pool: &Pool<Sqlite>, role: Role) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = ?")
        .bind(role.as_str())
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument(skip(tx, password_hash))]
pub async fn insert_account(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<User, AppError> {
    let email = normalize_email(email);

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&mut **tx)
        .await?;

    if taken > 0 {
        return Err(AppError::DuplicateAccount(email));
    }

    let res = sqlx::query("INSERT INTO users (email, password, role) VALUES (?, ?, ?)")
        .bind(&email)
        .bind(password_hash)
        .bind(role.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            // Lost a race against a concurrent registration.
            let unique_violation = matches!(
                &err,
                sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            );
            if unique_violation {
                AppError::DuplicateAccount(email.clone())
            } else {
                AppError::Database(err)
            }
        })?;

    Ok(User {
        id: res.last_insert_rowid(),
        email,
        role,
    })
}

#[instrument(skip(pool, password, rules), fields(email))]
pub async fn register_account(
    pool: &Pool<Sqlite>,
    rules: &AccountRules,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let email = normalize_email(email);
    tracing::Span::current().record("email", email.as_str());
    info!("Registering account");

    if !rules.accepts_email(&email) {
        return Err(AppError::InvalidDomain(email));
    }

    if password.chars().count() < rules.min_password_length {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            rules.min_password_length
        )));
    }

    let role = rules.role_for(&email);
    let hashed_password = hash_password(password, rules.hash_cost)?;

    let mut tx = pool.begin().await?;
    let user = insert_account(&mut tx, &email, &hashed_password, role).await?;
    tx.commit().await?;
    info!(user_id = user.id, role = %user.role, "Account registered");

    Ok(user)
}

// Imported accounts carry an unsalted SHA-256 hash until their first login.
#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    rehash_cost: u32,
) -> Result<User, AppError> {
    let email = normalize_email(email);
    tracing::Span::current().record("email", email.as_str());
    info!("Authenticating user");

    let credentials =
        sqlx::query_as::<_, DbCredentials>("SELECT id, password FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(pool)
            .await?;

    let Some(credentials) = credentials else {
        return Err(AppError::InvalidCredentials);
    };

    match check_password(password, &credentials.password) {
        PasswordCheck::Valid => {}
        PasswordCheck::ValidLegacy => {
            info!(user_id = credentials.id, "Upgrading legacy password hash");
            let hashed_password = hash_password(password, rehash_cost)?;
            sqlx::query("UPDATE users SET password = ? WHERE id = ?")
                .bind(hashed_password)
                .bind(credentials.id)
                .execute(pool)
                .await?;
        }
        PasswordCheck::Invalid => return Err(AppError::InvalidCredentials),
    }

    get_user(pool, credentials.id).await
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Mood entries
// ---------------------------------------------------------------------------

#[instrument(skip(tx))]
pub async fn insert_mood(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    user_id: i64,
    entry: &NewMoodEntry,
    policy: DuplicateDatePolicy,
) -> Result<i64, AppError> {
    if policy == DuplicateDatePolicy::Reject {
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM mood_entries WHERE user_id = ? AND entry_date = ?",
        )
        .bind(user_id)
        .bind(entry.entry_date)
        .fetch_one(&mut **tx)
        .await?;

        if existing > 0 {
            return Err(AppError::DuplicateEntry(format!(
                "A mood entry for {} already exists",
                entry.entry_date
            )));
        }
    }

    let res = sqlx::query(
        "INSERT INTO mood_entries (user_id, entry_date, energy, stress, mental_clarity, class_label)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(entry.entry_date)
    .bind(entry.energy)
    .bind(entry.stress)
    .bind(entry.mental_clarity)
    .bind(entry.class_label.as_deref().map(str::trim))
    .execute(&mut **tx)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn append_mood(
    pool: &Pool<Sqlite>,
    user_id: i64,
    entry: &NewMoodEntry,
    policy: DuplicateDatePolicy,
) -> Result<MoodEntry, AppError> {
    info!("Appending mood entry");

    let mut tx = pool.begin().await?;
    let mood_id = insert_mood(&mut tx, user_id, entry, policy).await?;
    tx.commit().await?;

    let row = sqlx::query_as::<_, DbMoodEntry>(&format!("{} WHERE id = ?", MOOD_COLUMNS))
        .bind(mood_id)
        .fetch_one(pool)
        .await?;

    Ok(MoodEntry::from(row))
}

#[instrument(skip(pool))]
pub async fn get_mood_entries(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<MoodEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbMoodEntry>(&format!(
        "{} WHERE user_id = ? ORDER BY entry_date, id",
        MOOD_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MoodEntry::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_all_mood_entries(pool: &Pool<Sqlite>) -> Result<Vec<MoodEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbMoodEntry>(&format!(
        "{} ORDER BY entry_date, id",
        MOOD_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MoodEntry::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_mood_entries_between(
    pool: &Pool<Sqlite>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<MoodEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbMoodEntry>(&format!(
        "{} WHERE entry_date BETWEEN ? AND ? ORDER BY entry_date, id",
        MOOD_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MoodEntry::from).collect())
}

// ---------------------------------------------------------------------------
// Lesson entries
// ---------------------------------------------------------------------------

#[instrument(skip(tx))]
pub async fn insert_lesson(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    user_id: i64,
    entry: &NewLessonEntry,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO lesson_entries (user_id, lesson_date, class_label, lesson_approach, classroom_management)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(entry.lesson_date)
    .bind(entry.class_label.trim())
    .bind(entry.lesson_approach)
    .bind(entry.classroom_management)
    .execute(&mut **tx)
    .await?;

    let lesson_id = res.last_insert_rowid();

    let tagged = entry
        .positive_tags
        .iter()
        .map(|t| (TagPolarity::Positive, t))
        .chain(
            entry
                .negative_tags
                .iter()
                .map(|t| (TagPolarity::Negative, t)),
        );

    for (polarity, tag) in tagged {
        sqlx::query("INSERT OR IGNORE INTO lesson_tags (lesson_id, polarity, tag) VALUES (?, ?, ?)")
            .bind(lesson_id)
            .bind(polarity.as_str())
            .bind(tag.trim())
            .execute(&mut **tx)
            .await?;
    }

    Ok(lesson_id)
}

#[instrument(skip(pool))]
pub async fn append_lesson(
    pool: &Pool<Sqlite>,
    user_id: i64,
    entry: &NewLessonEntry,
) -> Result<LessonEntry, AppError> {
    info!("Appending lesson entry");

    let mut tx = pool.begin().await?;
    let lesson_id = insert_lesson(&mut tx, user_id, entry).await?;
    tx.commit().await?;

    let row = sqlx::query_as::<_, DbLessonEntry>(&format!("{} WHERE id = ?", LESSON_COLUMNS))
        .bind(lesson_id)
        .fetch_one(pool)
        .await?;

    let mut lesson = LessonEntry::from(row);
    lesson.positive_tags = entry.positive_tags.clone();
    lesson.negative_tags = entry.negative_tags.clone();

    Ok(lesson)
}

fn attach_tags(rows: Vec<DbLessonEntry>, tags: Vec<DbLessonTag>) -> Vec<LessonEntry> {
    let mut lessons: Vec<LessonEntry> = rows.into_iter().map(LessonEntry::from).collect();

    let index: HashMap<i64, usize> = lessons
        .iter()
        .enumerate()
        .map(|(i, lesson)| (lesson.id, i))
        .collect();

    for tag in tags {
        let Some(&i) = index.get(&tag.lesson_id) else {
            continue;
        };

        match tag.polarity.as_str() {
            "positive" => {
                lessons[i].positive_tags.insert(tag.tag);
            }
            "negative" => {
                lessons[i].negative_tags.insert(tag.tag);
            }
            other => warn!(lesson_id = tag.lesson_id, polarity = other, "Unknown tag polarity"),
        }
    }

    lessons
}

#[instrument(skip(pool))]
pub async fn get_lesson_entries(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<LessonEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonEntry>(&format!(
        "{} WHERE user_id = ? ORDER BY lesson_date, id",
        LESSON_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let tags = sqlx::query_as::<_, DbLessonTag>(
        "SELECT t.lesson_id, t.polarity, t.tag FROM lesson_tags t
         JOIN lesson_entries l ON l.id = t.lesson_id
         WHERE l.user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(attach_tags(rows, tags))
}

#[instrument(skip(pool))]
pub async fn get_all_lesson_entries(pool: &Pool<Sqlite>) -> Result<Vec<LessonEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonEntry>(&format!(
        "{} ORDER BY lesson_date, id",
        LESSON_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let tags = sqlx::query_as::<_, DbLessonTag>("SELECT lesson_id, polarity, tag FROM lesson_tags")
        .fetch_all(pool)
        .await?;

    Ok(attach_tags(rows, tags))
}

#[instrument(skip(pool))]
pub async fn get_lesson_entries_between(
    pool: &Pool<Sqlite>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<LessonEntry>, AppError> {
    let rows = sqlx::query_as::<_, DbLessonEntry>(&format!(
        "{} WHERE lesson_date BETWEEN ? AND ? ORDER BY lesson_date, id",
        LESSON_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    let tags = sqlx::query_as::<_, DbLessonTag>(
        "SELECT t.lesson_id, t.polarity, t.tag FROM lesson_tags t
         JOIN lesson_entries l ON l.id = t.lesson_id
         WHERE l.lesson_date BETWEEN ? AND ?",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(attach_tags(rows, tags))
}

// ---------------------------------------------------------------------------
// Legacy import bookkeeping
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn get_legacy_progress(
    pool: &Pool<Sqlite>,
    file_name: &str,
) -> Result<Option<LegacyProgress>, AppError> {
    let progress = sqlx::query_as::<_, LegacyProgress>(
        "SELECT file_name, rows_read, rows_hash FROM legacy_imports WHERE file_name = ?",
    )
    .bind(file_name)
    .fetch_optional(pool)
    .await?;

    Ok(progress)
}

#[instrument(skip(tx))]
pub async fn save_legacy_progress(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    progress: &LegacyProgress,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO legacy_imports (file_name, rows_read, rows_hash) VALUES (?, ?, ?)
         ON CONFLICT (file_name) DO UPDATE SET
             rows_read = excluded.rows_read,
             rows_hash = excluded.rows_hash,
             imported_at = CURRENT_TIMESTAMP",
    )
    .bind(&progress.file_name)
    .bind(progress.rows_read)
    .bind(&progress.rows_hash)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
