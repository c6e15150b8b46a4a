use axum::{
    extract::{Query, State},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::AuditLog,
    routes::documents::to_iso,
    schema::audit_logs,
    state::AppState,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct AuditLogQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub target_table: Option<String>,
    pub target_id: Option<String>,
}

#[derive(Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_table: String,
    pub target_id: String,
    pub details: Value,
    pub created_at: String,
}

impl From<AuditLog> for AuditLogEntry {
    fn from(entry: AuditLog) -> Self {
        Self {
            id: entry.id,
            actor_id: entry.actor_id,
            action: entry.action,
            target_table: entry.target_table,
            target_id: entry.target_id,
            details: entry.details,
            created_at: to_iso(entry.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct AuditLogPage {
    pub entries: Vec<AuditLogEntry>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<AuditLogPage>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut select = audit_logs::table.into_boxed();
    if let Some(actor_id) = query.actor_id {
        select = select.filter(audit_logs::actor_id.eq(actor_id));
    }
    if let Some(action) = query.action.filter(|value| !value.is_empty()) {
        select = select.filter(audit_logs::action.eq(action));
    }
    if let Some(table) = query.target_table.filter(|value| !value.is_empty()) {
        select = select.filter(audit_logs::target_table.eq(table));
    }
    if let Some(target_id) = query.target_id.filter(|value| !value.is_empty()) {
        select = select.filter(audit_logs::target_id.eq(target_id));
    }

    let mut conn = state.db()?;
    let entries: Vec<AuditLog> = select
        .order((audit_logs::created_at.desc(), audit_logs::id.asc()))
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(AuditLogPage {
        entries: entries.into_iter().map(AuditLogEntry::from).collect(),
        limit,
        offset,
    }))
}
