//! Document lifecycle: the status machine and the owner-driven transitions
//! (create, edit, trash, restore, reprocess, permanent delete).

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::access::{
    audit,
    evaluator::{authorize_document, evaluate, require_owner},
    AccessError, AccessResult, DocumentAccess, DocumentPermission, Principal,
};
use crate::jobs::{enqueue_job, JOB_CATEGORIZE_DOCUMENT};
use crate::models::{Document, DocumentShare, NewDocument};
use crate::schema::{distributed_documents, document_shares, documents, user_document_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
    Trashed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Trashed => "trashed",
        }
    }

    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploading, Processing)
                | (Uploading, Completed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Trashed)
                | (Trashed, Completed)
                | (Failed, Processing)
        )
    }

    pub fn transition(self, next: DocumentStatus) -> AccessResult<DocumentStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AccessError::validation(format!(
                "document cannot move from '{self}' to '{next}'"
            )))
        }
    }

    /// Where a freshly uploaded document goes: straight to `completed` when
    /// the uploader already classified it, otherwise into AI processing.
    pub fn after_upload(classified: bool) -> DocumentStatus {
        if classified {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Processing
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = AccessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "uploading" => Ok(DocumentStatus::Uploading),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            "trashed" => Ok(DocumentStatus::Trashed),
            other => Err(AccessError::validation(format!(
                "unknown document status '{other}'"
            ))),
        }
    }
}

fn current_status(document: &Document) -> AccessResult<DocumentStatus> {
    document.status.parse()
}

/// Object key prefix under which a user's uploads live.
pub fn upload_prefix(owner_id: Uuid) -> String {
    format!("uploads/{owner_id}/")
}

pub fn upload_key(owner_id: Uuid, filename: &str) -> String {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}{}{}", upload_prefix(owner_id), Uuid::new_v4(), extension)
}

#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub name: String,
    pub file_id: String,
    pub mime_type: String,
    pub file_size: i64,
    pub classified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentChanges {
    pub name: Option<String>,
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListScope {
    #[default]
    All,
    Owned,
    Shared,
}

#[derive(Debug, Clone)]
pub struct VisibleDocument {
    pub document: Document,
    pub access: DocumentAccess,
}

/// Rejects keys outside the caller's upload prefix. Runs before storage is
/// consulted, so the answer never reveals whether another user's key exists.
pub fn ensure_own_upload(owner_id: Uuid, file_id: &str) -> AccessResult<()> {
    let inside_prefix = file_id
        .strip_prefix(&upload_prefix(owner_id))
        .is_some_and(|rest| !rest.is_empty() && !rest.split('/').any(|segment| segment == ".."));
    if inside_prefix {
        Ok(())
    } else {
        Err(AccessError::validation(
            "file_id does not reference one of your uploads",
        ))
    }
}

/// Records an uploaded blob as a document owned by the caller. Unclassified
/// documents are queued for categorization in the same transaction.
pub fn create_document(
    conn: &mut PgConnection,
    owner: &Principal,
    upload: DocumentUpload,
) -> AccessResult<Document> {
    let name = upload.name.trim().to_string();
    if name.is_empty() {
        return Err(AccessError::validation("name must not be empty"));
    }
    ensure_own_upload(owner.id(), &upload.file_id)?;
    if upload.file_size < 0 {
        return Err(AccessError::validation("file_size must not be negative"));
    }

    let status = DocumentStatus::Uploading.transition(DocumentStatus::after_upload(upload.classified))?;

    conn.transaction::<_, AccessError, _>(|conn| {
        let document: Document = diesel::insert_into(documents::table)
            .values(&NewDocument {
                id: Uuid::new_v4(),
                owner_id: owner.id(),
                name,
                file_id: upload.file_id,
                mime_type: upload.mime_type,
                file_size: upload.file_size,
                status: status.as_str().to_string(),
                classified: upload.classified,
            })
            .get_result(conn)?;

        if status == DocumentStatus::Processing {
            enqueue_job(
                conn,
                JOB_CATEGORIZE_DOCUMENT,
                json!({ "document_id": document.id }),
                None,
            )?;
        }

        audit::record(
            conn,
            Some(owner.id()),
            audit::ACTION_DOCUMENT_CREATE,
            "documents",
            document.id,
            json!({ "name": document.name, "status": document.status }),
        )?;

        info!(document_id = %document.id, owner_id = %owner.id(), status = %status, "document created");
        Ok(document)
    })
}

/// Documents the caller owns or has been shared. Trashed documents only
/// show up for their owner and only when asked for.
pub fn list_visible_documents(
    conn: &mut PgConnection,
    user_id: Uuid,
    scope: ListScope,
    include_trashed: bool,
) -> AccessResult<Vec<VisibleDocument>> {
    let mut visible = Vec::new();

    if scope != ListScope::Shared {
        let mut query = documents::table
            .filter(documents::owner_id.eq(user_id))
            .into_boxed();
        if !include_trashed {
            query = query.filter(documents::status.ne(DocumentStatus::Trashed.as_str()));
        }
        let owned: Vec<Document> = query.load(conn)?;
        visible.extend(owned.into_iter().map(|document| VisibleDocument {
            document,
            access: DocumentAccess::Owner,
        }));
    }

    if scope != ListScope::Owned {
        let shares: Vec<DocumentShare> = document_shares::table
            .filter(document_shares::recipient_id.eq(user_id))
            .load(conn)?;
        let ids: Vec<Uuid> = shares.iter().map(|share| share.document_id).collect();
        let shares_by_document: HashMap<Uuid, DocumentShare> = shares
            .into_iter()
            .map(|share| (share.document_id, share))
            .collect();

        let shared: Vec<Document> = documents::table
            .filter(documents::id.eq_any(&ids))
            .filter(documents::owner_id.ne(user_id))
            .filter(documents::status.ne(DocumentStatus::Trashed.as_str()))
            .load(conn)?;

        visible.extend(shared.into_iter().map(|document| {
            let access = evaluate(user_id, &document, shares_by_document.get(&document.id));
            VisibleDocument { document, access }
        }));
    }

    visible.sort_by(|a, b| b.document.updated_at.cmp(&a.document.updated_at));
    Ok(visible)
}

/// Renames or re-categorizes a document. Needs `edit_metadata`.
pub fn update_document(
    conn: &mut PgConnection,
    user: &Principal,
    document_id: Uuid,
    changes: DocumentChanges,
) -> AccessResult<Document> {
    let name = match changes.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AccessError::validation("name must not be empty"))
        }
        Some(name) => Some(name.trim().to_string()),
        None => None,
    };
    let categories = changes.categories.map(|values| {
        values
            .into_iter()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
    });

    conn.transaction::<_, AccessError, _>(|conn| {
        let (document, _) =
            authorize_document(conn, user.id(), document_id, DocumentPermission::EditMetadata)?;

        let now = Utc::now().naive_utc();
        let updated: Document = diesel::update(documents::table.find(document.id))
            .set((
                documents::name.eq(name.clone().unwrap_or_else(|| document.name.clone())),
                documents::ai_categories.eq(categories.clone().or(document.ai_categories.clone())),
                documents::updated_at.eq(now),
            ))
            .get_result(conn)?;

        audit::record(
            conn,
            Some(user.id()),
            audit::ACTION_DOCUMENT_UPDATE,
            "documents",
            document.id,
            json!({
                "name": name,
                "categories": categories,
                "previous_name": document.name,
            }),
        )?;

        info!(%document_id, actor_id = %user.id(), "document metadata updated");
        Ok(updated)
    })
}

pub fn trash_document(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Document> {
    change_status(
        conn,
        owner,
        document_id,
        DocumentStatus::Trashed,
        audit::ACTION_DOCUMENT_TRASH,
    )
}

pub fn restore_document(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Document> {
    change_status(
        conn,
        owner,
        document_id,
        DocumentStatus::Completed,
        audit::ACTION_DOCUMENT_RESTORE,
    )
}

/// Sends a failed document back through categorization.
pub fn reprocess_document(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Document> {
    conn.transaction::<_, AccessError, _>(|conn| {
        let document = require_owner(conn, owner.id(), document_id)?;
        let next = current_status(&document)?.transition(DocumentStatus::Processing)?;

        let updated: Document = diesel::update(documents::table.find(document.id))
            .set((
                documents::status.eq(next.as_str()),
                documents::ai_processing_error.eq::<Option<String>>(None),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?;

        enqueue_job(
            conn,
            JOB_CATEGORIZE_DOCUMENT,
            json!({ "document_id": document.id }),
            None,
        )?;

        audit::record(
            conn,
            Some(owner.id()),
            audit::ACTION_DOCUMENT_REPROCESS,
            "documents",
            document.id,
            json!({ "previous_error": document.ai_processing_error }),
        )?;

        info!(%document_id, owner_id = %owner.id(), "document queued for reprocessing");
        Ok(updated)
    })
}

fn change_status(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
    target: DocumentStatus,
    action: &str,
) -> AccessResult<Document> {
    conn.transaction::<_, AccessError, _>(|conn| {
        let document = require_owner(conn, owner.id(), document_id)?;
        let previous = current_status(&document)?;
        let next = previous.transition(target)?;

        let trashed_at: Option<NaiveDateTime> =
            (next == DocumentStatus::Trashed).then(|| Utc::now().naive_utc());

        let updated: Document = diesel::update(documents::table.find(document.id))
            .set((
                documents::status.eq(next.as_str()),
                documents::trashed_at.eq(trashed_at),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?;

        audit::record(
            conn,
            Some(owner.id()),
            action,
            "documents",
            document.id,
            json!({ "from": previous, "to": next }),
        )?;

        info!(%document_id, owner_id = %owner.id(), from = %previous, to = %next, "document status changed");
        Ok(updated)
    })
}

/// Removes a document and everything hanging off it in one transaction. The
/// returned record still names the blob, which the caller deletes once the
/// rows are gone.
pub fn delete_document_permanently(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Document> {
    conn.transaction::<_, AccessError, _>(|conn| {
        let document = require_owner(conn, owner.id(), document_id)?;
        purge_document_rows(conn, &document)?;

        audit::record(
            conn,
            Some(owner.id()),
            audit::ACTION_DOCUMENT_DELETE,
            "documents",
            document.id,
            json!({ "name": document.name, "file_id": document.file_id }),
        )?;

        info!(%document_id, owner_id = %owner.id(), "document deleted permanently");
        Ok(document)
    })
}

/// Deletes every document trashed before `cutoff`, each in its own
/// transaction. Returns the purged records so their blobs can be removed.
pub fn purge_trashed_before(
    conn: &mut PgConnection,
    cutoff: NaiveDateTime,
) -> AccessResult<Vec<Document>> {
    let expired: Vec<Document> = documents::table
        .filter(documents::status.eq(DocumentStatus::Trashed.as_str()))
        .filter(documents::trashed_at.lt(cutoff))
        .load(conn)?;

    let mut purged = Vec::with_capacity(expired.len());
    for document in expired {
        conn.transaction::<_, AccessError, _>(|conn| {
            purge_document_rows(conn, &document)?;
            audit::record(
                conn,
                None,
                audit::ACTION_DOCUMENT_DELETE,
                "documents",
                document.id,
                json!({ "name": document.name, "reason": "trash retention expired" }),
            )?;
            Ok(())
        })?;
        purged.push(document);
    }

    Ok(purged)
}

fn purge_document_rows(conn: &mut PgConnection, document: &Document) -> QueryResult<()> {
    diesel::delete(document_shares::table.filter(document_shares::document_id.eq(document.id)))
        .execute(conn)?;
    diesel::delete(
        user_document_status::table.filter(user_document_status::document_id.eq(document.id)),
    )
    .execute(conn)?;
    diesel::delete(
        distributed_documents::table.filter(distributed_documents::document_id.eq(document.id)),
    )
    .execute(conn)?;
    diesel::delete(documents::table.find(document.id)).execute(conn)?;
    Ok(())
}

/// Stores the classifier's verdict on a document still in processing.
pub fn complete_processing(
    conn: &mut PgConnection,
    document_id: Uuid,
    categories: Vec<String>,
    suggested_recipients: Vec<Uuid>,
) -> AccessResult<Document> {
    finish_processing(conn, document_id, DocumentStatus::Completed, |conn, id| {
        diesel::update(documents::table.find(id))
            .set((
                documents::status.eq(DocumentStatus::Completed.as_str()),
                documents::ai_categories.eq(Some(categories.clone())),
                documents::ai_suggested_recipients.eq(Some(suggested_recipients.clone())),
                documents::ai_processing_error.eq::<Option<String>>(None),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
    })
}

pub fn fail_processing(
    conn: &mut PgConnection,
    document_id: Uuid,
    error: &str,
) -> AccessResult<Document> {
    finish_processing(conn, document_id, DocumentStatus::Failed, |conn, id| {
        diesel::update(documents::table.find(id))
            .set((
                documents::status.eq(DocumentStatus::Failed.as_str()),
                documents::ai_processing_error.eq(Some(error.to_string())),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
    })
}

fn finish_processing<F>(
    conn: &mut PgConnection,
    document_id: Uuid,
    target: DocumentStatus,
    apply: F,
) -> AccessResult<Document>
where
    F: FnOnce(&mut PgConnection, Uuid) -> QueryResult<Document>,
{
    conn.transaction::<_, AccessError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(AccessError::NotFound("document"))?;
        current_status(&document)?.transition(target)?;
        Ok(apply(conn, document.id)?)
    })
}
