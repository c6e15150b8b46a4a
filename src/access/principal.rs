use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::permissions::{DOCUMENT_SEND_DEPARTMENT, ROLE_DIRECTOR, ROLE_HEAD_OF_DEPARTMENT};
use crate::auth::SessionIdentity;
use crate::error::AppError;
use crate::models::{Role, User};
use crate::schema::{roles, users};
use crate::state::AppState;

/// A caller resolved to a user record and, when assigned, that user's role.
///
/// A user without a role is a valid principal with no permissions, so every
/// role-gated check against it fails closed instead of erroring.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub role: Option<Role>,
}

impl Principal {
    pub fn new(user: User, role: Option<Role>) -> Self {
        Self { user, role }
    }

    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn permissions(&self) -> &[String] {
        self.role
            .as_ref()
            .map(|role| role.permissions.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions().iter().any(|granted| granted == permission)
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role.as_ref().map(|role| role.name.as_str())
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.role_name() == Some(name)
    }

    pub fn is_director(&self) -> bool {
        self.has_role(ROLE_DIRECTOR)
    }

    pub fn is_head_of_department(&self) -> bool {
        self.has_role(ROLE_HEAD_OF_DEPARTMENT)
    }

    /// Log-only departmental distribution accepts either the permission
    /// string or the Director role name.
    pub fn may_distribute_to_departments(&self) -> bool {
        self.has_permission(DOCUMENT_SEND_DEPARTMENT) || self.is_director()
    }
}

/// Resolves a session to a principal. The stable user id wins; the verified
/// email claim is only consulted when the session carries no id.
pub fn resolve_principal(
    conn: &mut PgConnection,
    identity: &SessionIdentity,
) -> AccessResult<Principal> {
    let user: Option<User> = match (identity.user_id, identity.email.as_deref()) {
        (Some(user_id), _) => users::table.find(user_id).first(conn).optional()?,
        (None, Some(email)) => users::table
            .filter(users::email.eq(email.trim().to_lowercase()))
            .first(conn)
            .optional()?,
        (None, None) => None,
    };

    let user = match user {
        Some(user) if user.is_active() => user,
        Some(user) => {
            tracing::warn!(user_id = %user.id, "rejecting session for archived user");
            return Err(AccessError::Unauthenticated);
        }
        None => return Err(AccessError::Unauthenticated),
    };

    let role = load_role(conn, user.role_id)?;
    Ok(Principal::new(user, role))
}

pub(crate) fn load_role(conn: &mut PgConnection, role_id: Option<Uuid>) -> AccessResult<Option<Role>> {
    let Some(role_id) = role_id else {
        return Ok(None);
    };
    let role = roles::table.find(role_id).first::<Role>(conn).optional()?;
    if role.is_none() {
        tracing::warn!(%role_id, "user references a missing role; treating as no role");
    }
    Ok(role)
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Already resolved by the permission gate for this request.
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }

        let identity = SessionIdentity::from_request_parts(parts, state).await?;
        let mut conn = state.db()?;
        Ok(resolve_principal(&mut conn, &identity)?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use uuid::Uuid;

    use super::Principal;
    use crate::models::{Role, User, STATUS_ACTIVE};

    pub fn user() -> User {
        let now = Utc::now().naive_utc();
        let id = Uuid::new_v4();
        User {
            id,
            email: format!("{id}@example.com"),
            password_hash: None,
            name: None,
            role_id: None,
            department_id: None,
            controlled_departments: Vec::new(),
            status: STATUS_ACTIVE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn role(name: &str, permissions: &[&str]) -> Role {
        let now = Utc::now().naive_utc();
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rank: 50,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn principal(role: Option<Role>) -> Principal {
        let mut user = user();
        user.role_id = role.as_ref().map(|r| r.id);
        Principal::new(user, role)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{principal, role};
    use crate::access::permissions::{DOCUMENT_SEND_DEPARTMENT, ROLE_DIRECTOR};

    #[test]
    fn roleless_principal_has_no_permissions() {
        let p = principal(None);
        assert!(p.permissions().is_empty());
        assert!(!p.has_permission(DOCUMENT_SEND_DEPARTMENT));
        assert_eq!(p.role_name(), None);
    }

    #[test]
    fn permissions_come_from_role() {
        let p = principal(Some(role(ROLE_DIRECTOR, &[DOCUMENT_SEND_DEPARTMENT])));
        assert!(p.has_permission(DOCUMENT_SEND_DEPARTMENT));
        assert!(!p.has_permission("user:manage"));
        assert!(p.is_director());
        assert!(!p.is_head_of_department());
    }

    #[test]
    fn director_role_distributes_without_the_permission_string() {
        let director = principal(Some(role(ROLE_DIRECTOR, &[])));
        assert!(!director.has_permission(DOCUMENT_SEND_DEPARTMENT));
        assert!(director.may_distribute_to_departments());

        let clerk = principal(Some(role("Clerk", &[DOCUMENT_SEND_DEPARTMENT])));
        assert!(clerk.may_distribute_to_departments());

        let employee = principal(Some(role("Employee", &[])));
        assert!(!employee.may_distribute_to_departments());
        assert!(!principal(None).may_distribute_to_departments());
    }
}
