use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no authenticated caller")]
    Unauthenticated,

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("not authorized: missing permission(s) {}", .0.join(", "))]
    MissingPermissions(Vec<String>),

    #[error("not authorized: departments outside controlled scope: {}", join_ids(.0))]
    OutOfScope(Vec<Uuid>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{kind} not found: {}", join_ids(.ids))]
    MissingReferences { kind: &'static str, ids: Vec<Uuid> },

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type AccessResult<T> = Result<T, AccessError>;

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl AccessError {
    pub fn not_authorized(reason: impl Into<String>) -> Self {
        AccessError::NotAuthorized(reason.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AccessError::Validation(message.into())
    }

    /// True for rejections of a resolved caller (as opposed to missing data or
    /// infrastructure failures).
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            AccessError::NotAuthorized(_)
                | AccessError::MissingPermissions(_)
                | AccessError::OutOfScope(_)
        )
    }
}
