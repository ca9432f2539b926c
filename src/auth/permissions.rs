use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    LogOwnEntries,
    ViewOwnEntries,
    ExportOwnEntries,

    ViewSchoolOverview,
    DownloadReports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Director,
}

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::LogOwnEntries);
    permissions.insert(Permission::ViewOwnEntries);
    permissions.insert(Permission::ExportOwnEntries);

    permissions
});

// Directors only read aggregates; they keep no journal of their own.
static DIRECTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::ViewSchoolOverview);
    permissions.insert(Permission::DownloadReports);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Teacher => &TEACHER_PERMISSIONS,
            Role::Director => &DIRECTOR_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn for_email(email: &str, director_prefix: &str) -> Self {
        let local_part = email.split('@').next().unwrap_or_default();

        if !director_prefix.is_empty() && local_part.starts_with(director_prefix) {
            Role::Director
        } else {
            Role::Teacher
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Teacher => "teacher",
            Role::Director => "director",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "director" => Ok(Role::Director),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
