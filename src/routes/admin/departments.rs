use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{audit, AccessError, Principal},
    error::AppResult,
    models::{Department, NewDepartment, STATUS_ACTIVE, STATUS_ARCHIVED},
    routes::documents::to_iso,
    schema::{departments, users},
    state::AppState,
};

use super::{normalize_name, unique_violation};

#[derive(Serialize)]
pub struct DepartmentResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub member_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DepartmentResponse {
    fn new(department: Department, member_count: i64) -> Self {
        Self {
            id: department.id,
            name: department.name,
            description: department.description,
            status: department.status,
            member_count,
            created_at: to_iso(department.created_at),
            updated_at: to_iso(department.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct DepartmentListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateDepartmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = departments)]
struct DepartmentChangeset {
    name: Option<String>,
    description: Option<String>,
}

pub async fn list_departments(
    State(state): State<AppState>,
    Query(query): Query<DepartmentListQuery>,
) -> AppResult<Json<Vec<DepartmentResponse>>> {
    let mut conn = state.db()?;

    let mut select = departments::table.into_boxed();
    if !query.include_archived {
        select = select.filter(departments::status.eq(STATUS_ACTIVE));
    }
    let list: Vec<Department> = select.order(departments::name.asc()).load(&mut conn)?;

    let counts: HashMap<Uuid, i64> = users::table
        .filter(users::status.eq(STATUS_ACTIVE))
        .filter(users::department_id.is_not_null())
        .group_by(users::department_id)
        .select((users::department_id, count_star()))
        .load::<(Option<Uuid>, i64)>(&mut conn)?
        .into_iter()
        .filter_map(|(id, count)| id.map(|id| (id, count)))
        .collect();

    Ok(Json(
        list.into_iter()
            .map(|department| {
                let members = counts.get(&department.id).copied().unwrap_or(0);
                DepartmentResponse::new(department, members)
            })
            .collect(),
    ))
}

pub async fn create_department(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateDepartmentRequest>,
) -> AppResult<(StatusCode, Json<DepartmentResponse>)> {
    let name = normalize_name(&payload.name, "name")?;
    let description = payload
        .description
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let mut conn = state.db()?;
    let department = conn
        .transaction::<_, AccessError, _>(|conn| {
            let department: Department = diesel::insert_into(departments::table)
                .values(&NewDepartment {
                    id: Uuid::new_v4(),
                    name,
                    description,
                    status: STATUS_ACTIVE.to_string(),
                })
                .get_result(conn)?;

            audit::record(
                conn,
                Some(principal.id()),
                audit::ACTION_DEPARTMENT_CREATE,
                "departments",
                department.id,
                json!({ "name": department.name }),
            )?;
            Ok(department)
        })
        .map_err(|err| unique_violation(err, "department name already exists"))?;

    info!(department_id = %department.id, actor_id = %principal.id(), "department created");
    Ok((StatusCode::CREATED, Json(DepartmentResponse::new(department, 0))))
}

pub async fn update_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(department_id): Path<Uuid>,
    Json(payload): Json<UpdateDepartmentRequest>,
) -> AppResult<Json<DepartmentResponse>> {
    let name = payload
        .name
        .as_deref()
        .map(|value| normalize_name(value, "name"))
        .transpose()?;
    let changes = DepartmentChangeset {
        name,
        description: payload.description.map(|value| value.trim().to_string()),
    };

    let mut conn = state.db()?;
    let department = conn
        .transaction::<_, AccessError, _>(|conn| {
            let updated: Department = diesel::update(departments::table.find(department_id))
                .set((&changes, departments::updated_at.eq(Utc::now().naive_utc())))
                .get_result::<Department>(conn)
                .optional()?
                .ok_or(AccessError::NotFound("department"))?;

            audit::record(
                conn,
                Some(principal.id()),
                audit::ACTION_DEPARTMENT_UPDATE,
                "departments",
                updated.id,
                json!({ "name": changes.name, "description": changes.description }),
            )?;
            Ok(updated)
        })
        .map_err(|err| unique_violation(err, "department name already exists"))?;

    let members = member_count(&mut conn, department.id)?;
    info!(%department_id, actor_id = %principal.id(), "department updated");
    Ok(Json(DepartmentResponse::new(department, members)))
}

/// Archived departments drop out of every distribution target check. Users
/// keep their membership so an unarchive would be lossless.
pub async fn archive_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(department_id): Path<Uuid>,
) -> AppResult<Json<DepartmentResponse>> {
    let mut conn = state.db()?;
    let department = conn.transaction::<_, AccessError, _>(|conn| {
        let updated: Department = diesel::update(departments::table.find(department_id))
            .set((
                departments::status.eq(STATUS_ARCHIVED),
                departments::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<Department>(conn)
            .optional()?
            .ok_or(AccessError::NotFound("department"))?;

        audit::record(
            conn,
            Some(principal.id()),
            audit::ACTION_DEPARTMENT_ARCHIVE,
            "departments",
            updated.id,
            json!({ "name": updated.name }),
        )?;
        Ok(updated)
    })?;

    let members = member_count(&mut conn, department.id)?;
    info!(%department_id, actor_id = %principal.id(), "department archived");
    Ok(Json(DepartmentResponse::new(department, members)))
}

fn member_count(conn: &mut PgConnection, department_id: Uuid) -> QueryResult<i64> {
    users::table
        .filter(users::department_id.eq(department_id))
        .filter(users::status.eq(STATUS_ACTIVE))
        .count()
        .get_result(conn)
}
