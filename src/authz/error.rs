use uuid::Uuid;

pub type AuthzResult<T> = Result<T, AuthzError>;

/// Failures of the permission core.
///
/// Store failures are never turned into a decision here: the caller decides
/// how an unavailable answer is shown.
#[derive(thiserror::Error, Debug)]
pub enum AuthzError {
    #[error("permission catalog unavailable: {0}")]
    CatalogUnavailable(#[source] sqlx::Error),
    #[error("permission store failure: {0}")]
    Persistence(#[source] sqlx::Error),
    #[error("resolution unavailable: {0}")]
    ResolutionUnavailable(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("role not found: {0}")]
    RoleNotFound(Uuid),
    #[error("permission not found: {0}")]
    PermissionNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed stored data: {0}")]
    Corrupt(String),
}

impl AuthzError {
    pub fn invalid_permission(message: impl Into<String>) -> Self {
        Self::InvalidPermission(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Maps a write-path sqlx error, surfacing unique violations as conflicts.
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(format!("{what} already exists"))
            }
            _ => Self::Persistence(err),
        }
    }
}
