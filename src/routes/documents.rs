use std::time::Duration;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{
    evaluator::{authorize_document, effective_permissions},
    AccessSource, DocumentAccess, DocumentPermission, PermissionSet, Principal,
};
use crate::documents::{self, DocumentChanges, DocumentUpload, ListScope};
use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::state::AppState;

const DOWNLOAD_URL_EXPIRY_SECONDS: u64 = 300;

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub status: String,
    pub classified: bool,
    pub ai_categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_suggested_recipients: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_processing_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub trashed_at: Option<String>,
    pub access: AccessSource,
    pub permissions: PermissionSet,
}

impl DocumentResponse {
    pub fn new(document: Document, access: &DocumentAccess) -> Self {
        let is_owner = access.is_owner();
        Self {
            id: document.id,
            owner_id: document.owner_id,
            name: document.name,
            mime_type: document.mime_type,
            file_size: document.file_size,
            status: document.status,
            classified: document.classified,
            ai_categories: document.ai_categories.unwrap_or_default(),
            // Suggestions are addressed to the owner deciding whom to share with.
            ai_suggested_recipients: document.ai_suggested_recipients.filter(|_| is_owner),
            ai_processing_error: document.ai_processing_error,
            created_at: to_iso(document.created_at),
            updated_at: to_iso(document.updated_at),
            trashed_at: document.trashed_at.map(to_iso),
            access: access.source(),
            permissions: access.permissions(),
        }
    }
}

#[derive(Deserialize)]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: Option<String>,
}

#[derive(Serialize)]
pub struct UploadUrlResponse {
    pub file_id: String,
    pub url: String,
    pub expires_in: u64,
    pub content_type: String,
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub name: String,
    pub file_id: String,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub classified: bool,
}

#[derive(Deserialize)]
pub struct DocumentListQuery {
    #[serde(default)]
    pub scope: ListScope,
    #[serde(default)]
    pub include_trashed: bool,
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    pub name: Option<String>,
    pub categories: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct PermissionsResponse {
    pub document_id: Uuid,
    pub source: AccessSource,
    pub permissions: PermissionSet,
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

fn guess_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub async fn create_upload_url(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<UploadUrlRequest>,
) -> AppResult<Json<UploadUrlResponse>> {
    let filename = payload.filename.trim();
    if filename.is_empty() {
        return Err(AppError::bad_request("filename must not be empty"));
    }

    let content_type = payload
        .content_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| guess_mime(filename));
    let file_id = documents::upload_key(principal.id(), filename);
    let expires_in = state.config.upload_url_expiry_seconds;

    let url = state
        .storage
        .presign_put_object(&file_id, Some(&content_type), Duration::from_secs(expires_in))
        .await
        .map_err(|err| AppError::internal(format!("failed to generate upload URL: {err}")))?;

    Ok(Json(UploadUrlResponse {
        file_id,
        url,
        expires_in,
        content_type,
    }))
}

pub async fn create_document(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    documents::ensure_own_upload(principal.id(), &payload.file_id)?;
    let file_size = state
        .storage
        .object_size(&payload.file_id)
        .await
        .map_err(|err| AppError::internal(format!("failed to inspect upload: {err}")))?
        .ok_or_else(|| AppError::bad_request("no uploaded file found for file_id"))?;

    let mime_type = payload
        .mime_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| guess_mime(&payload.name));

    let mut conn = state.db()?;
    let document = documents::create_document(
        &mut conn,
        &principal,
        DocumentUpload {
            name: payload.name,
            file_id: payload.file_id,
            mime_type,
            file_size,
            classified: payload.classified,
        },
    )?;

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse::new(document, &DocumentAccess::Owner)),
    ))
}

pub async fn list_documents(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let visible =
        documents::list_visible_documents(&mut conn, principal.id(), query.scope, query.include_trashed)?;

    Ok(Json(
        visible
            .into_iter()
            .map(|entry| DocumentResponse::new(entry.document, &entry.access))
            .collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let (document, access) =
        authorize_document(&mut conn, principal.id(), document_id, DocumentPermission::View)?;
    Ok(Json(DocumentResponse::new(document, &access)))
}

/// Callers with no relationship to the document get 404 rather than an
/// empty set, so the route never confirms that an id exists.
/// `access::evaluator::effective_permissions` itself still yields the empty
/// set for them.
pub async fn get_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<PermissionsResponse>> {
    let mut conn = state.db()?;
    let (document, access) = effective_permissions(&mut conn, principal.id(), document_id)?;
    if access == DocumentAccess::None {
        return Err(AppError::not_found());
    }

    Ok(Json(PermissionsResponse {
        document_id: document.id,
        source: access.source(),
        permissions: access.permissions(),
    }))
}

pub async fn download_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let mut conn = state.db()?;
    let (document, _) = authorize_document(
        &mut conn,
        principal.id(),
        document_id,
        DocumentPermission::Download,
    )?;
    drop(conn);

    let url = state
        .storage
        .presign_get_object(
            &document.file_id,
            Duration::from_secs(DOWNLOAD_URL_EXPIRY_SECONDS),
            attachment_content_disposition(&document.name),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    info!(%document_id, user_id = %principal.id(), "download URL issued");

    Ok(Json(DocumentDownloadResponse {
        url,
        expires_in: DOWNLOAD_URL_EXPIRY_SECONDS,
        filename: document.name,
        content_type: document.mime_type,
        size_bytes: document.file_size,
    }))
}

pub async fn update_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = documents::update_document(
        &mut conn,
        &principal,
        document_id,
        DocumentChanges {
            name: payload.name,
            categories: payload.categories,
        },
    )?;
    let (_, access) = effective_permissions(&mut conn, principal.id(), document.id)?;
    Ok(Json(DocumentResponse::new(document, &access)))
}

pub async fn trash_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = documents::trash_document(&mut conn, &principal, document_id)?;
    Ok(Json(DocumentResponse::new(document, &DocumentAccess::Owner)))
}

pub async fn restore_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = documents::restore_document(&mut conn, &principal, document_id)?;
    Ok(Json(DocumentResponse::new(document, &DocumentAccess::Owner)))
}

pub async fn reprocess_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let mut conn = state.db()?;
    let document = documents::reprocess_document(&mut conn, &principal, document_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentResponse::new(document, &DocumentAccess::Owner)),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let document = documents::delete_document_permanently(&mut conn, &principal, document_id)?;
    drop(conn);

    // Rows are already gone; a leftover blob is only wasted space.
    if let Err(err) = state.storage.delete_object(&document.file_id).await {
        warn!(%document_id, file_id = %document.file_id, error = %err, "failed to delete document blob");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_disposition_escapes_quotes() {
        let value = attachment_content_disposition("Q3 \"final\".pdf").unwrap();
        assert!(value.starts_with("attachment; filename=\"Q3 _final_.pdf\""));
        assert!(value.contains("filename*=UTF-8''Q3%20%5Ffinal%5F%2Epdf"));
        assert!(attachment_content_disposition("").is_none());
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(guess_mime("report.pdf"), "application/pdf");
        assert_eq!(guess_mime("unknown"), "application/octet-stream");
    }
}
