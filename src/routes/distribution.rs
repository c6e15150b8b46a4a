use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{distribution, Principal};
use crate::error::AppResult;
use crate::models::DistributedDocument;
use crate::state::AppState;

use super::documents::to_iso;

#[derive(Deserialize)]
pub struct DepartmentsRequest {
    pub department_ids: Vec<Uuid>,
}

#[derive(Deserialize, Default)]
pub struct CompanyRequest {
    #[serde(default)]
    pub department_ids: Option<Vec<Uuid>>,
}

#[derive(Serialize)]
pub struct DistributionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_department_ids: Vec<Uuid>,
    pub sent_to_all: bool,
    pub created_at: String,
}

impl From<DistributedDocument> for DistributionResponse {
    fn from(row: DistributedDocument) -> Self {
        Self {
            id: row.id,
            document_id: row.document_id,
            sender_id: row.sender_id,
            recipient_department_ids: row.recipient_department_ids,
            sent_to_all: row.sent_to_all,
            created_at: to_iso(row.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct BulkShareResponse {
    pub distribution: DistributionResponse,
    pub shared_with: Vec<Uuid>,
    pub already_shared: usize,
}

impl From<distribution::BulkShareOutcome> for BulkShareResponse {
    fn from(outcome: distribution::BulkShareOutcome) -> Self {
        Self {
            distribution: outcome.distribution.into(),
            shared_with: outcome.shared_with,
            already_shared: outcome.already_shared,
        }
    }
}

pub async fn distribute_to_departments(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<DepartmentsRequest>,
) -> AppResult<(StatusCode, Json<DistributionResponse>)> {
    let mut conn = state.db()?;
    let row = distribution::send_to_departments(
        &mut conn,
        &principal,
        document_id,
        &payload.department_ids,
    )?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn distribute_to_organization(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<DistributionResponse>)> {
    let mut conn = state.db()?;
    let row = distribution::send_to_organization(&mut conn, &principal, document_id)?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn list_distributions(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<DistributionResponse>>> {
    let mut conn = state.db()?;
    let rows = distribution::list_distributions(&mut conn, &principal, document_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Behind the `document:send:department` gate.
pub async fn send_to_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<DepartmentsRequest>,
) -> AppResult<(StatusCode, Json<BulkShareResponse>)> {
    let mut conn = state.db()?;
    let outcome = distribution::send_document_to_departments(
        &mut conn,
        &principal,
        document_id,
        &payload.department_ids,
    )?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// Behind the `document:send:company` gate. The body is optional.
pub async fn send_to_company(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
    payload: Option<Json<CompanyRequest>>,
) -> AppResult<(StatusCode, Json<BulkShareResponse>)> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let mut conn = state.db()?;
    let outcome = distribution::send_document_to_company(
        &mut conn,
        &principal,
        document_id,
        payload.department_ids.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}
