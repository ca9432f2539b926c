use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Email is not an institutional address: {0}")]
    InvalidDomain(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Validation(_) => "validation_error",
            AppError::DuplicateAccount(_) => "duplicate_account",
            AppError::InvalidDomain(_) => "invalid_domain",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::DuplicateEntry(_) => "duplicate_entry",
            AppError::Io(_) => "io_error",
            AppError::Csv(_) => "csv_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
            }
            AppError::Io(err) => {
                error!(error = %message, context = %ctx, io_error = %err, "File error");
            }
            AppError::Csv(err) => {
                error!(error = %message, context = %ctx, csv_error = %err, "CSV error");
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
            }
            AppError::InvalidCredentials => {
                warn!(context = %ctx, "Invalid credentials");
            }
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::DuplicateAccount(msg)
            | AppError::InvalidDomain(msg)
            | AppError::DuplicateEntry(msg) => {
                warn!(message = %msg, context = %ctx, kind = self.kind(), "Request rejected");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));

            if self.status_code().code >= 500 {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::UnprocessableEntity,
            AppError::DuplicateAccount(_) => Status::Conflict,
            AppError::InvalidDomain(_) => Status::UnprocessableEntity,
            AppError::InvalidCredentials => Status::Unauthorized,
            AppError::DuplicateEntry(_) => Status::Conflict,
            AppError::Io(_) => Status::InternalServerError,
            AppError::Csv(_) => Status::InternalServerError,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}
