use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{audit, permissions::ROLE_PERMISSIONS, AccessError, AccessResult, Principal},
    error::AppResult,
    models::{NewRole, Role},
    routes::documents::to_iso,
    schema::roles,
    state::AppState,
};

use super::{normalize_name, unique_violation};

const DEFAULT_RANK: i32 = 100;

#[derive(Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub rank: i32,
    pub permissions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            rank: role.rank,
            permissions: role.permissions,
            created_at: to_iso(role.created_at),
            updated_at: to_iso(role.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub rank: Option<i32>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub rank: Option<i32>,
    pub permissions: Option<Vec<String>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = roles)]
struct RoleChangeset {
    name: Option<String>,
    rank: Option<i32>,
    permissions: Option<Vec<String>>,
}

/// Keeps role permissions inside the vocabulary the application checks, in
/// canonical order and without duplicates.
fn normalize_permissions(requested: &[String]) -> AccessResult<Vec<String>> {
    let unknown: Vec<&str> = requested
        .iter()
        .map(|value| value.trim())
        .filter(|value| !ROLE_PERMISSIONS.contains(value))
        .collect();
    if !unknown.is_empty() {
        return Err(AccessError::validation(format!(
            "unknown role permission(s): {}",
            unknown.join(", ")
        )));
    }

    Ok(ROLE_PERMISSIONS
        .iter()
        .filter(|known| requested.iter().any(|value| value.trim() == **known))
        .map(|known| known.to_string())
        .collect())
}

pub async fn list_roles(State(state): State<AppState>) -> AppResult<Json<Vec<RoleResponse>>> {
    let mut conn = state.db()?;
    let list: Vec<Role> = roles::table
        .order((roles::rank.asc(), roles::name.asc()))
        .load(&mut conn)?;
    Ok(Json(list.into_iter().map(RoleResponse::from).collect()))
}

pub async fn create_role(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateRoleRequest>,
) -> AppResult<(StatusCode, Json<RoleResponse>)> {
    let name = normalize_name(&payload.name, "name")?;
    let permissions = normalize_permissions(&payload.permissions)?;

    let mut conn = state.db()?;
    let role = conn
        .transaction::<_, AccessError, _>(|conn| {
            let role: Role = diesel::insert_into(roles::table)
                .values(&NewRole {
                    id: Uuid::new_v4(),
                    name,
                    rank: payload.rank.unwrap_or(DEFAULT_RANK),
                    permissions,
                })
                .get_result(conn)?;

            audit::record(
                conn,
                Some(principal.id()),
                audit::ACTION_ROLE_CREATE,
                "roles",
                role.id,
                json!({ "name": role.name, "rank": role.rank, "permissions": role.permissions }),
            )?;
            Ok(role)
        })
        .map_err(|err| unique_violation(err, "role name already exists"))?;

    info!(role_id = %role.id, actor_id = %principal.id(), "role created");
    Ok((StatusCode::CREATED, Json(role.into())))
}

/// Permission changes take effect on the members' next request; nothing is
/// cached in sessions.
pub async fn update_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<RoleResponse>> {
    let changes = RoleChangeset {
        name: payload
            .name
            .as_deref()
            .map(|value| normalize_name(value, "name"))
            .transpose()?,
        rank: payload.rank,
        permissions: payload
            .permissions
            .as_deref()
            .map(normalize_permissions)
            .transpose()?,
    };

    let mut conn = state.db()?;
    let role = conn
        .transaction::<_, AccessError, _>(|conn| {
            let existing: Role = roles::table
                .find(role_id)
                .first(conn)
                .optional()?
                .ok_or(AccessError::NotFound("role"))?;

            let updated: Role = diesel::update(roles::table.find(role_id))
                .set((&changes, roles::updated_at.eq(Utc::now().naive_utc())))
                .get_result(conn)?;

            audit::record(
                conn,
                Some(principal.id()),
                audit::ACTION_ROLE_UPDATE,
                "roles",
                updated.id,
                json!({
                    "name": { "from": existing.name, "to": updated.name },
                    "rank": { "from": existing.rank, "to": updated.rank },
                    "permissions": { "from": existing.permissions, "to": updated.permissions },
                }),
            )?;
            Ok(updated)
        })
        .map_err(|err| unique_violation(err, "role name already exists"))?;

    info!(%role_id, actor_id = %principal.id(), "role updated");
    Ok(Json(role.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::permissions::{LOGS_VIEW, USER_MANAGE};

    #[test]
    fn permissions_are_canonicalized() {
        let requested = vec![
            LOGS_VIEW.to_string(),
            format!(" {USER_MANAGE} "),
            LOGS_VIEW.to_string(),
        ];
        assert_eq!(
            normalize_permissions(&requested).unwrap(),
            vec![USER_MANAGE.to_string(), LOGS_VIEW.to_string()]
        );
    }

    #[test]
    fn unknown_permissions_are_rejected() {
        let err = normalize_permissions(&["documents:delete_everything".to_string()]).unwrap_err();
        assert!(matches!(err, AccessError::Validation(ref msg) if msg.contains("documents:delete_everything")));
    }

    #[test]
    fn empty_permission_list_is_allowed() {
        assert!(normalize_permissions(&[]).unwrap().is_empty());
    }
}
