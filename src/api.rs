use chrono::{NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, Header, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::aggregate::aggregate_school;
use crate::auth::{Permission, SESSION_COOKIE, User, UserSession};
use crate::config::AppConfig;
use crate::db::{
    append_lesson, append_mood, authenticate_user, create_user_session, get_lesson_entries,
    get_mood_entries, invalidate_session, register_account,
};
use crate::error::AppError;
use crate::models::{LessonEntry, MoodEntry, NewLessonEntry, NewMoodEntry, SchoolOverview, clean_tags};
use crate::report::{
    build_monthly_report, report_file_name, write_lesson_export, write_monthly_report,
    write_mood_export,
};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse,
    ValidationResponse,
};

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    email: String,
    password: String,
    #[serde(default)]
    remember_me: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role.to_string(),
            email: user.email,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct MoodRequest {
    date: Option<NaiveDate>,
    #[validate(range(min = 1, max = 10, message = "Energy must be between 1 and 10"))]
    energy: i64,
    #[validate(range(min = 1, max = 10, message = "Stress must be between 1 and 10"))]
    stress: i64,
    #[validate(range(min = 1, max = 10, message = "Mental clarity must be between 1 and 10"))]
    mental_clarity: Option<i64>,
    #[serde(default)]
    class_label: Option<String>,
}

fn unknown_class() -> ApiError {
    Custom(
        Status::UnprocessableEntity,
        Json(ValidationResponse::with_error("class_label", "Unknown class")),
    )
}

#[derive(Deserialize, Validate)]
pub struct LessonRequest {
    date: Option<NaiveDate>,
    #[validate(length(min = 1, message = "Class is required"))]
    class_label: String,
    #[validate(range(min = 1, max = 5, message = "Lesson approach must be between 1 and 5"))]
    lesson_approach: i64,
    #[validate(range(
        min = 1,
        max = 5,
        message = "Classroom management must be between 1 and 5"
    ))]
    classroom_management: i64,
    #[serde(default)]
    positive_tags: Vec<String>,
    #[serde(default)]
    negative_tags: Vec<String>,
}

#[derive(Responder)]
#[response(content_type = "text/csv")]
pub struct CsvDownload {
    body: String,
    disposition: Header<'static>,
}

impl CsvDownload {
    fn new(file_name: &str, body: String) -> Self {
        Self {
            body,
            disposition: Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", file_name),
            ),
        }
    }
}

#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = registration.validate_custom()?;

    let user = register_account(
        db,
        &config.account_rules(),
        &validated.email,
        &validated.password,
    )
    .await
    .validate_custom()?;

    info!(user_id = user.id, role = %user.role, "Account registered");

    Ok(Custom(Status::Created, Json(UserData::from(user))))
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    let user = match authenticate_user(
        db,
        &validated.email,
        &validated.password,
        config.bcrypt_cost,
    )
    .await
    {
        Ok(user) => user,
        Err(AppError::InvalidCredentials) => {
            warn!("Login rejected");
            return Ok(Json(LoginResponse {
                success: false,
                user: None,
                error: Some("Invalid email or password".to_string()),
            }));
        }
        Err(err) => return Err(err.to_validation_response()),
    };

    let lifetime = if validated.remember_me.unwrap_or(false) {
        chrono::Duration::days(config.remember_me_days)
    } else {
        chrono::Duration::hours(config.session_hours)
    };
    let max_age = rocket::time::Duration::seconds(lifetime.num_seconds());

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + lifetime;

    create_user_session(db, user.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/classes")]
pub async fn api_classes(_user: User, config: &State<AppConfig>) -> Json<Vec<String>> {
    Json(config.class_labels.clone())
}

#[post("/mood", data = "<mood>")]
pub async fn api_add_mood(
    mood: Json<MoodRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<MoodEntry>>, ApiError> {
    user.require_permission(Permission::LogOwnEntries)
        .validate_custom()?;
    let validated = mood.validate_custom()?;

    let class_label = match validated.class_label.as_deref() {
        Some(label) => Some(config.resolve_class_label(label).ok_or_else(unknown_class)?),
        None => None,
    };

    let entry = NewMoodEntry {
        entry_date: validated.date.unwrap_or_else(|| Utc::now().date_naive()),
        energy: validated.energy,
        stress: validated.stress,
        mental_clarity: validated.mental_clarity,
        class_label,
    };

    let stored = append_mood(db, user.id, &entry, config.mood_policy())
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(stored)))
}

#[get("/mood")]
pub async fn api_get_mood(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<MoodEntry>>, ApiError> {
    user.require_permission(Permission::ViewOwnEntries)
        .validate_custom()?;

    let entries = get_mood_entries(db, user.id).await.validate_custom()?;

    Ok(Json(entries))
}

#[post("/lessons", data = "<lesson>")]
pub async fn api_add_lesson(
    lesson: Json<LessonRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<LessonEntry>>, ApiError> {
    user.require_permission(Permission::LogOwnEntries)
        .validate_custom()?;
    let validated = lesson.validate_custom()?;

    let class_label = config
        .resolve_class_label(&validated.class_label)
        .ok_or_else(unknown_class)?;

    let entry = NewLessonEntry {
        lesson_date: validated.date.unwrap_or_else(|| Utc::now().date_naive()),
        class_label,
        lesson_approach: validated.lesson_approach,
        classroom_management: validated.classroom_management,
        positive_tags: clean_tags(&validated.positive_tags),
        negative_tags: clean_tags(&validated.negative_tags),
    };

    let stored = append_lesson(db, user.id, &entry)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(stored)))
}

#[get("/lessons")]
pub async fn api_get_lessons(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<LessonEntry>>, ApiError> {
    user.require_permission(Permission::ViewOwnEntries)
        .validate_custom()?;

    let entries = get_lesson_entries(db, user.id).await.validate_custom()?;

    Ok(Json(entries))
}

#[get("/export/<table>")]
pub async fn api_export(
    table: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<CsvDownload, ApiError> {
    user.require_permission(Permission::ExportOwnEntries)
        .validate_custom()?;

    let mut body = Vec::new();
    match table {
        "mood" => {
            let entries = get_mood_entries(db, user.id).await.validate_custom()?;
            write_mood_export(&entries, &mut body).validate_custom()?;
        }
        "lessons" => {
            let entries = get_lesson_entries(db, user.id).await.validate_custom()?;
            write_lesson_export(&entries, &mut body).validate_custom()?;
        }
        _ => return Err(Status::NotFound.to_validation_response()),
    }

    let body = String::from_utf8(body)
        .map_err(|err| AppError::Internal(err.to_string()))
        .validate_custom()?;

    Ok(CsvDownload::new(&format!("{}.csv", table), body))
}

#[get("/school/overview")]
pub async fn api_school_overview(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SchoolOverview>, ApiError> {
    user.require_permission(Permission::ViewSchoolOverview)
        .validate_custom()?;

    let overview = aggregate_school(db).await.validate_custom()?;
    Ok(Json(overview))
}

#[get("/reports/<year>/<month>")]
pub async fn api_monthly_report(
    year: i32,
    month: u32,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<CsvDownload, ApiError> {
    user.require_permission(Permission::DownloadReports)
        .validate_custom()?;

    if !(1..=12).contains(&month) {
        return Err(Custom(
            Status::BadRequest,
            Json(ValidationResponse::with_error(
                "month",
                "Month must be between 1 and 12",
            )),
        ));
    }

    let report = build_monthly_report(db, year, month)
        .await
        .validate_custom()?;
    let (path, body) = write_monthly_report(&report, &config.data_dir).validate_custom()?;
    info!(path = %path.display(), "Monthly report served");

    Ok(CsvDownload::new(&report_file_name(year, month), body))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
