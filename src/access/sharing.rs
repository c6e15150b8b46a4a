use std::collections::HashMap;

use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::audit;
use super::error::{AccessError, AccessResult};
use super::evaluator::{find_share, load_document, require_owner};
use super::permissions::PermissionSet;
use super::principal::Principal;
use crate::documents::DocumentStatus;
use crate::models::{
    Document, DocumentShare, NewDocumentShare, NewUserDocumentStatus, User, UserDocumentStatus,
};
use crate::schema::{document_shares, documents, user_document_status, users};

#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub share: DocumentShare,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct UnreadDocument {
    pub document: Document,
    pub share: DocumentShare,
    pub sharer: User,
}

/// Grants `permissions` on a document to `recipient_id`, replacing any earlier
/// grant for the same pair, and flags the document unread for the recipient.
pub fn share_document(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
    recipient_id: Uuid,
    permissions: &PermissionSet,
) -> AccessResult<ShareOutcome> {
    conn.transaction::<_, AccessError, _>(|conn| {
        let document = require_owner(conn, owner.id(), document_id)?;

        if permissions.is_empty() {
            return Err(AccessError::validation("permissions must not be empty"));
        }
        if recipient_id == document.owner_id {
            return Err(AccessError::validation(
                "a document cannot be shared with its owner",
            ));
        }

        let recipient: Option<User> = users::table.find(recipient_id).first(conn).optional()?;
        if !recipient.is_some_and(|user| user.is_active()) {
            return Err(AccessError::NotFound("recipient"));
        }

        let existing = find_share(conn, document_id, recipient_id)?;
        let granted = permissions.to_stored();
        let now = Utc::now().naive_utc();

        let share: DocumentShare = diesel::insert_into(document_shares::table)
            .values(&NewDocumentShare {
                id: Uuid::new_v4(),
                document_id,
                recipient_id,
                sharer_id: owner.id(),
                permission_granted: granted.clone(),
            })
            .on_conflict((document_shares::document_id, document_shares::recipient_id))
            .do_update()
            .set((
                document_shares::permission_granted.eq(granted.clone()),
                document_shares::sharer_id.eq(owner.id()),
                document_shares::updated_at.eq(now),
            ))
            .get_result(conn)?;

        set_read_state(conn, recipient_id, document_id, false)?;

        audit::record(
            conn,
            Some(owner.id()),
            audit::ACTION_DOCUMENT_SHARE,
            "document_shares",
            share.id,
            json!({
                "document_id": document_id,
                "recipient_id": recipient_id,
                "permissions": granted,
                "previous_permissions": existing.as_ref().map(|s| &s.permission_granted),
            }),
        )?;

        info!(
            %document_id,
            %recipient_id,
            owner_id = %owner.id(),
            created = existing.is_none(),
            "document shared"
        );

        Ok(ShareOutcome {
            share,
            created: existing.is_none(),
        })
    })
}

/// Revokes a recipient's grant. Revoking a grant that does not exist is a
/// no-op; the recipient's read status is left as it was.
pub fn unshare_document(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
    recipient_id: Uuid,
) -> AccessResult<bool> {
    conn.transaction::<_, AccessError, _>(|conn| {
        require_owner(conn, owner.id(), document_id)?;

        let removed: Vec<Uuid> = diesel::delete(
            document_shares::table
                .filter(document_shares::document_id.eq(document_id))
                .filter(document_shares::recipient_id.eq(recipient_id)),
        )
        .returning(document_shares::id)
        .get_results(conn)?;

        let Some(share_id) = removed.first() else {
            return Ok(false);
        };

        audit::record(
            conn,
            Some(owner.id()),
            audit::ACTION_DOCUMENT_UNSHARE,
            "document_shares",
            share_id,
            json!({ "document_id": document_id, "recipient_id": recipient_id }),
        )?;

        info!(%document_id, %recipient_id, owner_id = %owner.id(), "document share revoked");
        Ok(true)
    })
}

/// Marks a document read for the caller, whether or not a share still exists.
pub fn mark_read(conn: &mut PgConnection, user: &Principal, document_id: Uuid) -> AccessResult<()> {
    conn.transaction::<_, AccessError, _>(|conn| {
        load_document(conn, document_id)?;
        set_read_state(conn, user.id(), document_id, true)?;
        Ok(())
    })
}

pub(crate) fn set_read_state(
    conn: &mut PgConnection,
    user_id: Uuid,
    document_id: Uuid,
    is_read: bool,
) -> QueryResult<()> {
    diesel::insert_into(user_document_status::table)
        .values(&NewUserDocumentStatus {
            id: Uuid::new_v4(),
            user_id,
            document_id,
            is_read,
        })
        .on_conflict((user_document_status::user_id, user_document_status::document_id))
        .do_update()
        .set((
            user_document_status::is_read.eq(is_read),
            user_document_status::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn is_read(conn: &mut PgConnection, user_id: Uuid, document_id: Uuid) -> QueryResult<Option<bool>> {
    user_document_status::table
        .filter(user_document_status::user_id.eq(user_id))
        .filter(user_document_status::document_id.eq(document_id))
        .select(user_document_status::is_read)
        .first(conn)
        .optional()
}

/// Unread notifications for a user. Rows whose document is gone or trashed,
/// or whose share has since been revoked, are skipped.
pub fn list_unread_for_user(conn: &mut PgConnection, user_id: Uuid) -> AccessResult<Vec<UnreadDocument>> {
    let unread: Vec<UserDocumentStatus> = user_document_status::table
        .filter(user_document_status::user_id.eq(user_id))
        .filter(user_document_status::is_read.eq(false))
        .order(user_document_status::updated_at.desc())
        .load(conn)?;

    if unread.is_empty() {
        return Ok(Vec::new());
    }

    let document_ids: Vec<Uuid> = unread.iter().map(|row| row.document_id).collect();

    let mut documents_by_id: HashMap<Uuid, Document> = documents::table
        .filter(documents::id.eq_any(&document_ids))
        .filter(documents::status.ne(DocumentStatus::Trashed.as_str()))
        .load::<Document>(conn)?
        .into_iter()
        .map(|doc| (doc.id, doc))
        .collect();

    let mut shares_by_document: HashMap<Uuid, DocumentShare> = document_shares::table
        .filter(document_shares::recipient_id.eq(user_id))
        .filter(document_shares::document_id.eq_any(&document_ids))
        .load::<DocumentShare>(conn)?
        .into_iter()
        .map(|share| (share.document_id, share))
        .collect();

    let sharer_ids: Vec<Uuid> = shares_by_document.values().map(|s| s.sharer_id).collect();
    let sharers: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&sharer_ids))
        .load::<User>(conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let mut results = Vec::with_capacity(unread.len());
    for row in unread {
        let (Some(document), Some(share)) = (
            documents_by_id.remove(&row.document_id),
            shares_by_document.remove(&row.document_id),
        ) else {
            continue;
        };
        let Some(sharer) = sharers.get(&share.sharer_id).cloned() else {
            continue;
        };
        results.push(UnreadDocument {
            document,
            share,
            sharer,
        });
    }

    Ok(results)
}

/// Current grants on a document, with their recipients. Owner only.
pub fn list_shares(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Vec<(DocumentShare, User)>> {
    require_owner(conn, owner.id(), document_id)?;

    let shares: Vec<DocumentShare> = document_shares::table
        .filter(document_shares::document_id.eq(document_id))
        .order(document_shares::created_at.asc())
        .load(conn)?;

    let recipient_ids: Vec<Uuid> = shares.iter().map(|s| s.recipient_id).collect();
    let recipients: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&recipient_ids))
        .load::<User>(conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(shares
        .into_iter()
        .filter_map(|share| {
            let recipient = recipients.get(&share.recipient_id)?.clone();
            Some((share, recipient))
        })
        .collect())
}
