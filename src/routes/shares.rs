use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{sharing, DocumentAccess, PermissionSet, Principal};
use crate::error::{AppError, AppResult};
use crate::models::{DocumentShare, User};
use crate::state::AppState;

use super::documents::{to_iso, DocumentResponse};

#[derive(Deserialize)]
pub struct ShareRequest {
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

#[derive(Serialize)]
pub struct ShareResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub recipient_id: Uuid,
    pub sharer_id: Uuid,
    pub permissions: PermissionSet,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserSummary>,
}

impl ShareResponse {
    fn new(share: DocumentShare, recipient: Option<User>) -> Self {
        Self {
            id: share.id,
            document_id: share.document_id,
            recipient_id: share.recipient_id,
            sharer_id: share.sharer_id,
            permissions: PermissionSet::from_stored(&share.permission_granted),
            created_at: to_iso(share.created_at),
            updated_at: to_iso(share.updated_at),
            recipient: recipient.map(UserSummary::from),
        }
    }
}

#[derive(Serialize)]
pub struct UnreadNotification {
    pub document: DocumentResponse,
    pub shared_by: UserSummary,
    pub shared_at: String,
}

pub async fn list_shares(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<ShareResponse>>> {
    let mut conn = state.db()?;
    let shares = sharing::list_shares(&mut conn, &principal, document_id)?;
    Ok(Json(
        shares
            .into_iter()
            .map(|(share, recipient)| ShareResponse::new(share, Some(recipient)))
            .collect(),
    ))
}

pub async fn share_document(
    State(state): State<AppState>,
    principal: Principal,
    Path((document_id, recipient_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ShareRequest>,
) -> AppResult<(StatusCode, Json<ShareResponse>)> {
    let permissions = PermissionSet::parse_strict(&payload.permissions)
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let mut conn = state.db()?;
    let outcome =
        sharing::share_document(&mut conn, &principal, document_id, recipient_id, &permissions)?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ShareResponse::new(outcome.share, None))))
}

pub async fn unshare_document(
    State(state): State<AppState>,
    principal: Principal,
    Path((document_id, recipient_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    sharing::unshare_document(&mut conn, &principal, document_id, recipient_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    sharing::mark_read(&mut conn, &principal, document_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_unread(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<UnreadNotification>>> {
    let mut conn = state.db()?;
    let unread = sharing::list_unread_for_user(&mut conn, principal.id())?;

    Ok(Json(
        unread
            .into_iter()
            .map(|entry| {
                let access = DocumentAccess::Shared(PermissionSet::from_stored(
                    &entry.share.permission_granted,
                ));
                UnreadNotification {
                    document: DocumentResponse::new(entry.document, &access),
                    shared_by: entry.sharer.into(),
                    shared_at: to_iso(entry.share.updated_at),
                }
            })
            .collect(),
    ))
}
