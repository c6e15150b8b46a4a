use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{audit, distribution::ensure_active_departments, AccessError, AccessResult, Principal},
    auth::password,
    error::{AppError, AppResult},
    models::{NewUser, Role, User, STATUS_ACTIVE, STATUS_ARCHIVED},
    routes::documents::to_iso,
    schema::{refresh_tokens, roles, users},
    state::AppState,
};

use super::{ensure_role_exists, unique_violation};

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role_id: Option<Uuid>,
    pub role: Option<String>,
    pub department_id: Option<Uuid>,
    pub controlled_departments: Vec<Uuid>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UserResponse {
    fn new(user: User, role_names: &HashMap<Uuid, String>) -> Self {
        Self {
            role: user.role_id.and_then(|id| role_names.get(&id).cloned()),
            id: user.id,
            email: user.email,
            name: user.name,
            role_id: user.role_id,
            department_id: user.department_id,
            controlled_departments: user.controlled_departments,
            status: user.status,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub department_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: Option<String>,
    pub name: Option<String>,
    pub role_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    #[serde(default)]
    pub controlled_departments: Vec<Uuid>,
}

/// `role_id` and `department_id` distinguish an absent field (keep) from an
/// explicit `null` (clear).
#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub password: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub role_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub department_id: Option<Option<Uuid>>,
    pub controlled_departments: Option<Vec<Uuid>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UserChangeset {
    name: Option<String>,
    password_hash: Option<String>,
    role_id: Option<Option<Uuid>>,
    department_id: Option<Option<Uuid>>,
    controlled_departments: Option<Vec<Uuid>>,
}

fn role_names(conn: &mut PgConnection) -> QueryResult<HashMap<Uuid, String>> {
    Ok(roles::table
        .load::<Role>(conn)?
        .into_iter()
        .map(|role| (role.id, role.name))
        .collect())
}

fn normalize_email(value: &str) -> AccessResult<String> {
    let email = value.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AccessError::validation("email address is not valid")),
    }
}

fn hash_new_password(value: &str) -> AppResult<String> {
    if value.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(password::hash_password(value)?)
}

fn ensure_references(
    conn: &mut PgConnection,
    role_id: Option<Uuid>,
    department_id: Option<Uuid>,
    controlled: Option<&[Uuid]>,
) -> AccessResult<()> {
    if let Some(role_id) = role_id {
        ensure_role_exists(conn, role_id)?;
    }
    if let Some(department_id) = department_id {
        ensure_active_departments(conn, &[department_id])?;
    }
    if let Some(controlled) = controlled.filter(|ids| !ids.is_empty()) {
        ensure_active_departments(conn, controlled)?;
    }
    Ok(())
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = state.db()?;

    let mut select = users::table.into_boxed();
    if !query.include_archived {
        select = select.filter(users::status.eq(STATUS_ACTIVE));
    }
    if let Some(department_id) = query.department_id {
        select = select.filter(users::department_id.eq(department_id));
    }
    let list: Vec<User> = select.order(users::email.asc()).load(&mut conn)?;
    let names = role_names(&mut conn)?;

    Ok(Json(
        list.into_iter()
            .map(|user| UserResponse::new(user, &names))
            .collect(),
    ))
}

pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let email = normalize_email(&payload.email)?;
    let password_hash = payload
        .password
        .as_deref()
        .map(hash_new_password)
        .transpose()?;
    let name = payload
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    let controlled = dedup(payload.controlled_departments);

    let mut conn = state.db()?;
    let user = conn
        .transaction::<_, AccessError, _>(|conn| {
            ensure_references(conn, payload.role_id, payload.department_id, Some(&controlled))?;

            let user: User = diesel::insert_into(users::table)
                .values(&NewUser {
                    id: Uuid::new_v4(),
                    email,
                    password_hash,
                    name,
                    role_id: payload.role_id,
                    department_id: payload.department_id,
                    controlled_departments: controlled.clone(),
                    status: STATUS_ACTIVE.to_string(),
                })
                .get_result(conn)?;

            audit::record(
                conn,
                Some(principal.id()),
                audit::ACTION_USER_CREATE,
                "users",
                user.id,
                json!({
                    "email": user.email,
                    "role_id": user.role_id,
                    "department_id": user.department_id,
                    "controlled_departments": user.controlled_departments,
                }),
            )?;
            Ok(user)
        })
        .map_err(|err| unique_violation(err, "email already in use"))?;

    info!(user_id = %user.id, actor_id = %principal.id(), "user created");
    let names = role_names(&mut conn)?;
    Ok((StatusCode::CREATED, Json(UserResponse::new(user, &names))))
}

pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let password_hash = payload
        .password
        .as_deref()
        .map(hash_new_password)
        .transpose()?;
    let name = match payload.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::bad_request("name must not be empty"))
        }
        other => other.map(|name| name.trim().to_string()),
    };
    let controlled = payload.controlled_departments.map(dedup);

    let mut conn = state.db()?;
    let user = conn.transaction::<_, AccessError, _>(|conn| {
        let existing: User = users::table
            .find(user_id)
            .first(conn)
            .optional()?
            .ok_or(AccessError::NotFound("user"))?;

        ensure_references(
            conn,
            payload.role_id.flatten(),
            payload.department_id.flatten(),
            controlled.as_deref(),
        )?;

        let changes = UserChangeset {
            name: name.clone(),
            password_hash,
            role_id: payload.role_id,
            department_id: payload.department_id,
            controlled_departments: controlled.clone(),
        };

        let updated: User = diesel::update(users::table.find(existing.id))
            .set((&changes, users::updated_at.eq(Utc::now().naive_utc())))
            .get_result(conn)?;

        audit::record(
            conn,
            Some(principal.id()),
            audit::ACTION_USER_UPDATE,
            "users",
            updated.id,
            json!({
                "name": name,
                "password_changed": changes.password_hash.is_some(),
                "role_id": { "from": existing.role_id, "to": updated.role_id },
                "department_id": { "from": existing.department_id, "to": updated.department_id },
                "controlled_departments": controlled,
            }),
        )?;
        Ok(updated)
    })?;

    info!(%user_id, actor_id = %principal.id(), "user updated");
    let names = role_names(&mut conn)?;
    Ok(Json(UserResponse::new(user, &names)))
}

/// Archived users can no longer sign in, resolve a session, or receive
/// distributions. Their shares and documents stay in place.
pub async fn archive_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    if user_id == principal.id() {
        return Err(AppError::bad_request("you cannot archive your own account"));
    }

    let mut conn = state.db()?;
    let user = conn.transaction::<_, AccessError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let updated: User = diesel::update(users::table.find(user_id))
            .set((users::status.eq(STATUS_ARCHIVED), users::updated_at.eq(now)))
            .get_result::<User>(conn)
            .optional()?
            .ok_or(AccessError::NotFound("user"))?;

        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(conn)?;

        audit::record(
            conn,
            Some(principal.id()),
            audit::ACTION_USER_ARCHIVE,
            "users",
            updated.id,
            json!({ "email": updated.email }),
        )?;
        Ok(updated)
    })?;

    info!(%user_id, actor_id = %principal.id(), "user archived");
    let names = role_names(&mut conn)?;
    Ok(Json(UserResponse::new(user, &names)))
}
