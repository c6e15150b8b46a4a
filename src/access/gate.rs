//! Role-permission gate shared by every administrative and bulk-distribution
//! operation.

use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};

use super::error::{AccessError, AccessResult};
use super::principal::Principal;
use crate::error::AppError;
use crate::state::AppState;

/// A list of role permissions that must all be held by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Requirement {
    required: &'static [&'static str],
}

impl Requirement {
    pub const fn all(required: &'static [&'static str]) -> Self {
        Self { required }
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        self.required
    }

    pub fn missing(&self, principal: &Principal) -> Vec<String> {
        self.required
            .iter()
            .filter(|permission| !principal.has_permission(permission))
            .map(|permission| permission.to_string())
            .collect()
    }

    pub fn authorize(&self, principal: &Principal) -> AccessResult<()> {
        let missing = self.missing(principal);
        if missing.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %principal.id(),
                role = principal.role_name().unwrap_or("<none>"),
                missing = ?missing,
                "permission gate rejected caller"
            );
            Err(AccessError::MissingPermissions(missing))
        }
    }

    /// Runs `operation` only when the principal holds every required permission.
    pub fn guard<T, F>(&self, principal: &Principal, operation: F) -> AccessResult<T>
    where
        F: FnOnce() -> AccessResult<T>,
    {
        self.authorize(principal)?;
        operation()
    }
}

/// State for [`require_permissions`]: the app state plus the requirement to enforce.
#[derive(Clone)]
pub struct PermissionGate {
    state: AppState,
    requirement: Requirement,
}

impl PermissionGate {
    pub fn new(state: AppState, required: &'static [&'static str]) -> Self {
        Self {
            state,
            requirement: Requirement::all(required),
        }
    }
}

/// Middleware resolving the caller and enforcing the gate's requirement before
/// the wrapped handler runs. The resolved [`Principal`] is stored in the
/// request extensions for the handler to reuse.
pub async fn require_permissions(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let principal = Principal::from_request_parts(&mut parts, &gate.state).await?;
    gate.requirement.authorize(&principal)?;
    parts.extensions.insert(principal);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::permissions::{LOGS_VIEW, USER_MANAGE};
    use crate::access::principal::fixtures::{principal, role};

    const ADMIN_ONLY: Requirement = Requirement::all(&[USER_MANAGE, LOGS_VIEW]);

    #[test]
    fn passes_when_every_permission_is_held() {
        let admin = principal(Some(role("Administrator", &[USER_MANAGE, LOGS_VIEW])));
        assert!(ADMIN_ONLY.authorize(&admin).is_ok());
    }

    #[test]
    fn reports_each_missing_permission() {
        let partial = principal(Some(role("Auditor", &[LOGS_VIEW])));
        match ADMIN_ONLY.authorize(&partial) {
            Err(AccessError::MissingPermissions(missing)) => {
                assert_eq!(missing, vec![USER_MANAGE.to_string()]);
            }
            other => panic!("expected missing permissions, got {other:?}"),
        }
    }

    #[test]
    fn roleless_caller_is_rejected_not_crashed() {
        let nobody = principal(None);
        let err = ADMIN_ONLY.authorize(&nobody).unwrap_err();
        assert!(err.is_forbidden());
    }

    #[test]
    fn guard_skips_operation_when_denied() {
        let nobody = principal(None);
        let mut ran = false;
        let result = ADMIN_ONLY.guard(&nobody, || {
            ran = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!ran);
    }

    #[test]
    fn empty_requirement_admits_anyone() {
        let open = Requirement::all(&[]);
        assert!(open.authorize(&principal(None)).is_ok());
        assert_eq!(open.guard(&principal(None), || Ok(7)).unwrap(), 7);
    }
}
