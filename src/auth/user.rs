use chrono::{NaiveDateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            role: Role::from_str(&user.role.unwrap_or_default()).unwrap_or(Role::Teacher),
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            created_at: session.created_at.unwrap_or(now),
            // A row without an expiry is treated as already expired.
            expires_at: session.expires_at.unwrap_or(now),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}

#[derive(Debug, Clone)]
pub struct AccountRules {
    /// Institutional mail domain, without the `@`. `None` accepts any domain.
    pub institution_domain: Option<String>,
    pub director_prefix: String,
    pub min_password_length: usize,
    pub hash_cost: u32,
}

impl Default for AccountRules {
    fn default() -> Self {
        Self {
            institution_domain: None,
            director_prefix: "directie".to_string(),
            min_password_length: 8,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn email_local_part(email: &str) -> Option<&str> {
    let (local, domain) = email.split_once('@')?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }

    Some(local)
}

impl AccountRules {
    pub fn accepts_email(&self, email: &str) -> bool {
        if email_local_part(email).is_none() {
            return false;
        }

        match &self.institution_domain {
            Some(domain) => email.ends_with(&format!("@{}", domain.trim().to_lowercase())),
            None => true,
        }
    }

    pub fn role_for(&self, email: &str) -> Role {
        Role::for_email(email, &self.director_prefix)
    }
}

pub enum PasswordCheck {
    Valid,
    /// Matched a legacy unsalted SHA-256 hash; the caller should re-hash.
    ValidLegacy,
    Invalid,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

pub fn legacy_password_hash(password: &str) -> String {
    use sha2::{Digest, Sha256};

    format!("{:x}", Sha256::digest(password.as_bytes()))
}

pub fn is_legacy_hash(stored: &str) -> bool {
    stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn check_password(password: &str, stored: &str) -> PasswordCheck {
    if is_legacy_hash(stored) {
        if legacy_password_hash(password).eq_ignore_ascii_case(stored) {
            return PasswordCheck::ValidLegacy;
        }
        return PasswordCheck::Invalid;
    }

    match bcrypt::verify(password, stored) {
        Ok(true) => PasswordCheck::Valid,
        _ => PasswordCheck::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Jan.Peeters@VVX.go-next.be "),
            "jan.peeters@vvx.go-next.be"
        );
    }

    #[test]
    fn test_accepts_email_checks_domain() {
        let rules = AccountRules {
            institution_domain: Some("vvx.go-next.be".to_string()),
            ..AccountRules::default()
        };

        assert!(rules.accepts_email("jan@vvx.go-next.be"));
        assert!(!rules.accepts_email("jan@gmail.com"));
        assert!(!rules.accepts_email("@vvx.go-next.be"));
        assert!(!rules.accepts_email("jan@evil@vvx.go-next.be"));
        assert!(!rules.accepts_email("vvx.go-next.be"));

        let open = AccountRules::default();
        assert!(open.accepts_email("jan@gmail.com"));
        assert!(!open.accepts_email("jan"));
    }

    #[test]
    fn test_legacy_hash_matches_unsalted_sha256() {
        let stored = legacy_password_hash("password");
        assert_eq!(
            stored,
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert!(is_legacy_hash(&stored));
        assert!(matches!(
            check_password("password", &stored),
            PasswordCheck::ValidLegacy
        ));
        assert!(matches!(
            check_password("Password", &stored),
            PasswordCheck::Invalid
        ));
    }

    #[test]
    fn test_bcrypt_hash_checks() {
        let stored = hash_password("correct horse", 4).unwrap();
        assert!(!is_legacy_hash(&stored));
        assert!(matches!(
            check_password("correct horse", &stored),
            PasswordCheck::Valid
        ));
        assert!(matches!(
            check_password("wrong horse", &stored),
            PasswordCheck::Invalid
        ));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = UserSession::generate_token();
        let b = UserSession::generate_token();
        assert_eq!(a.len(), 48);
        assert_ne!(a, b);
    }
}
