//! Administration endpoints. Every route here sits behind a permission gate
//! layer, so handlers receive an already authorized [`Principal`].
//!
//! [`Principal`]: crate::access::Principal

use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use uuid::Uuid;

use crate::access::{AccessError, AccessResult};
use crate::error::AppError;
use crate::schema;

pub mod audit_logs;
pub mod departments;
pub mod roles;
pub mod users;

/// Maps a unique-constraint violation to a 400 with `message`; other errors
/// keep their usual mapping.
pub(crate) fn unique_violation(err: AccessError, message: &str) -> AppError {
    match err {
        AccessError::Database(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _,
        )) => AppError::bad_request(message),
        other => AppError::from(other),
    }
}

pub(crate) fn ensure_role_exists(conn: &mut PgConnection, role_id: Uuid) -> AccessResult<()> {
    let found = schema::roles::table
        .find(role_id)
        .select(schema::roles::id)
        .first::<Uuid>(conn)
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(AccessError::MissingReferences {
            kind: "role",
            ids: vec![role_id],
        }),
    }
}

pub(crate) fn normalize_name(value: &str, field: &str) -> AccessResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccessError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
