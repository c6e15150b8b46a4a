use diesel::{prelude::*, PgConnection};
use serde::Serialize;
use uuid::Uuid;

use super::error::{AccessError, AccessResult};
use super::permissions::{DocumentPermission, PermissionSet};
use crate::models::{Document, DocumentShare};
use crate::schema::{document_shares, documents};

/// How a user relates to a document for authorization purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAccess {
    Owner,
    Shared(PermissionSet),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSource {
    Owner,
    Share,
    None,
}

impl DocumentAccess {
    pub fn permissions(&self) -> PermissionSet {
        match self {
            DocumentAccess::Owner => PermissionSet::full(),
            DocumentAccess::Shared(granted) => granted.clone(),
            DocumentAccess::None => PermissionSet::empty(),
        }
    }

    pub fn allows(&self, permission: DocumentPermission) -> bool {
        match self {
            DocumentAccess::Owner => true,
            DocumentAccess::Shared(granted) => granted.contains(permission),
            DocumentAccess::None => false,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, DocumentAccess::Owner)
    }

    pub fn source(&self) -> AccessSource {
        match self {
            DocumentAccess::Owner => AccessSource::Owner,
            DocumentAccess::Shared(_) => AccessSource::Share,
            DocumentAccess::None => AccessSource::None,
        }
    }
}

/// Pure evaluation. Ownership is decided before the share is consulted, so a
/// stray share row addressed to the owner can never narrow their access. The
/// document status is deliberately ignored.
pub fn evaluate(user_id: Uuid, document: &Document, share: Option<&DocumentShare>) -> DocumentAccess {
    if document.owner_id == user_id {
        return DocumentAccess::Owner;
    }

    match share {
        Some(share) if share.document_id == document.id && share.recipient_id == user_id => {
            DocumentAccess::Shared(PermissionSet::from_stored(&share.permission_granted))
        }
        _ => DocumentAccess::None,
    }
}

pub fn find_share(
    conn: &mut PgConnection,
    document_id: Uuid,
    recipient_id: Uuid,
) -> QueryResult<Option<DocumentShare>> {
    document_shares::table
        .filter(document_shares::document_id.eq(document_id))
        .filter(document_shares::recipient_id.eq(recipient_id))
        .first(conn)
        .optional()
}

pub fn load_document(conn: &mut PgConnection, document_id: Uuid) -> AccessResult<Document> {
    documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or(AccessError::NotFound("document"))
}

/// Loads the document and evaluates the caller's access against current
/// state. Never cached: a revoked share is gone on the very next call.
pub fn effective_permissions(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Uuid,
) -> AccessResult<(Document, DocumentAccess)> {
    let document = load_document(conn, document_id)?;
    if document.owner_id == user_id {
        return Ok((document, DocumentAccess::Owner));
    }
    let share = find_share(conn, document_id, user_id)?;
    let access = evaluate(user_id, &document, share.as_ref());
    Ok((document, access))
}

/// Like [`effective_permissions`] but rejects callers lacking `needed`.
///
/// Callers without any relationship to the document get `NotFound` so the
/// existence of private documents is not revealed.
pub fn authorize_document(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Uuid,
    needed: DocumentPermission,
) -> AccessResult<(Document, DocumentAccess)> {
    let (document, access) = effective_permissions(conn, user_id, document_id)?;
    match access {
        DocumentAccess::None => Err(AccessError::NotFound("document")),
        ref granted if !granted.allows(needed) => Err(AccessError::not_authorized(format!(
            "'{needed}' permission is required for this document"
        ))),
        _ => Ok((document, access)),
    }
}

pub fn require_owner(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Uuid,
) -> AccessResult<Document> {
    let document = load_document(conn, document_id)?;
    if document.owner_id != user_id {
        return Err(AccessError::not_authorized(
            "only the document owner may perform this action",
        ));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(owner_id: Uuid, status: &str) -> Document {
        let now = Utc::now().naive_utc();
        Document {
            id: Uuid::new_v4(),
            owner_id,
            name: "Quarterly report.pdf".into(),
            file_id: "uploads/quarterly.pdf".into(),
            mime_type: "application/pdf".into(),
            file_size: 4096,
            status: status.into(),
            classified: false,
            ai_categories: None,
            ai_suggested_recipients: None,
            ai_processing_error: None,
            created_at: now,
            updated_at: now,
            trashed_at: None,
        }
    }

    fn share(document: &Document, recipient_id: Uuid, granted: &[&str]) -> DocumentShare {
        let now = Utc::now().naive_utc();
        DocumentShare {
            id: Uuid::new_v4(),
            document_id: document.id,
            recipient_id,
            sharer_id: document.owner_id,
            permission_granted: granted.iter().map(|p| p.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn owner_gets_full_set_even_with_a_narrow_share_row() {
        let owner = Uuid::new_v4();
        let doc = document(owner, "completed");
        let stray = share(&doc, owner, &["view"]);

        let access = evaluate(owner, &doc, Some(&stray));
        assert_eq!(access, DocumentAccess::Owner);
        assert_eq!(access.permissions(), PermissionSet::full());
    }

    #[test]
    fn recipient_gets_exactly_the_granted_subset() {
        let doc = document(Uuid::new_v4(), "completed");
        let bob = Uuid::new_v4();
        let grant = share(&doc, bob, &["view", "download"]);

        let access = evaluate(bob, &doc, Some(&grant));
        assert!(access.allows(DocumentPermission::View));
        assert!(access.allows(DocumentPermission::Download));
        assert!(!access.allows(DocumentPermission::Resend));
        assert_eq!(access.permissions().to_stored(), vec!["view", "download"]);
    }

    #[test]
    fn strangers_get_nothing() {
        let doc = document(Uuid::new_v4(), "completed");
        let access = evaluate(Uuid::new_v4(), &doc, None);
        assert_eq!(access, DocumentAccess::None);
        assert!(access.permissions().is_empty());
    }

    #[test]
    fn share_for_someone_else_is_ignored() {
        let doc = document(Uuid::new_v4(), "completed");
        let grant = share(&doc, Uuid::new_v4(), &["view"]);
        assert_eq!(evaluate(Uuid::new_v4(), &doc, Some(&grant)), DocumentAccess::None);
    }

    #[test]
    fn evaluation_ignores_document_status() {
        let bob = Uuid::new_v4();
        for status in ["processing", "failed", "trashed"] {
            let doc = document(Uuid::new_v4(), status);
            let grant = share(&doc, bob, &["view"]);
            assert_eq!(evaluate(bob, &doc, Some(&grant)).source(), AccessSource::Share);
        }
    }
}
