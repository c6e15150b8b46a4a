//! Department and organization distribution.
//!
//! Two mechanisms live here. `send_to_departments`/`send_to_organization`
//! only append to the distribution log and are authorized by permission OR
//! the Director role name. `send_document_to_departments`/
//! `send_document_to_company` additionally grant `view` shares to every
//! targeted member; they sit behind the strict permission gate at the route.

use std::collections::HashSet;

use diesel::{prelude::*, PgConnection};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::audit;
use super::error::{AccessError, AccessResult};
use super::evaluator::{effective_permissions, require_owner, DocumentAccess};
use super::permissions::{DocumentPermission, PermissionSet, DOCUMENT_SEND_DEPARTMENT};
use super::principal::Principal;
use crate::models::{
    DistributedDocument, Document, NewDistributedDocument, NewDocumentShare,
    NewUserDocumentStatus, STATUS_ACTIVE,
};
use crate::schema::{departments, distributed_documents, document_shares, user_document_status, users};

// Keeps each multi-row insert well below Postgres' bind parameter limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone)]
pub struct BulkShareOutcome {
    pub distribution: DistributedDocument,
    pub shared_with: Vec<Uuid>,
    pub already_shared: usize,
}

/// Deduplicates requested departments, preserving order.
pub fn normalize_department_ids(requested: &[Uuid]) -> AccessResult<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let ids: Vec<Uuid> = requested
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();
    if ids.is_empty() {
        return Err(AccessError::validation("department_ids must not be empty"));
    }
    Ok(ids)
}

/// A Head of Department may only target departments they control. Every
/// other role is unrestricted here.
pub fn check_department_scope(sender: &Principal, requested: &[Uuid]) -> AccessResult<()> {
    if !sender.is_head_of_department() {
        return Ok(());
    }

    let controlled = &sender.user.controlled_departments;
    if controlled.is_empty() {
        warn!(user_id = %sender.id(), "head of department has no controlled departments");
        return Err(AccessError::OutOfScope(requested.to_vec()));
    }

    let out_of_scope: Vec<Uuid> = requested
        .iter()
        .filter(|id| !controlled.contains(id))
        .copied()
        .collect();

    if out_of_scope.is_empty() {
        Ok(())
    } else {
        warn!(
            user_id = %sender.id(),
            out_of_scope = ?out_of_scope,
            "head of department targeted uncontrolled departments"
        );
        Err(AccessError::OutOfScope(out_of_scope))
    }
}

/// Log-only departmental distribution.
pub fn send_to_departments(
    conn: &mut PgConnection,
    sender: &Principal,
    document_id: Uuid,
    department_ids: &[Uuid],
) -> AccessResult<DistributedDocument> {
    if !sender.may_distribute_to_departments() {
        return Err(AccessError::MissingPermissions(vec![
            DOCUMENT_SEND_DEPARTMENT.to_string(),
        ]));
    }

    let ids = normalize_department_ids(department_ids)?;
    check_department_scope(sender, &ids)?;

    conn.transaction::<_, AccessError, _>(|conn| {
        let document = authorize_sender(conn, sender, document_id)?;
        ensure_active_departments(conn, &ids)?;

        let distribution = append_distribution(conn, document.id, sender.id(), ids.clone(), false)?;
        audit::record(
            conn,
            Some(sender.id()),
            audit::ACTION_DISTRIBUTE_DEPARTMENTS,
            "distributed_documents",
            distribution.id,
            json!({ "document_id": document.id, "department_ids": ids }),
        )?;

        info!(%document_id, sender_id = %sender.id(), departments = ids.len(), "document distributed to departments");
        Ok(distribution)
    })
}

/// Log-only organization-wide distribution. Directors only.
pub fn send_to_organization(
    conn: &mut PgConnection,
    sender: &Principal,
    document_id: Uuid,
) -> AccessResult<DistributedDocument> {
    if !sender.is_director() {
        return Err(AccessError::not_authorized(
            "only a Director may distribute to the whole organization",
        ));
    }

    conn.transaction::<_, AccessError, _>(|conn| {
        let document = authorize_sender(conn, sender, document_id)?;
        let distribution = append_distribution(conn, document.id, sender.id(), Vec::new(), true)?;
        audit::record(
            conn,
            Some(sender.id()),
            audit::ACTION_DISTRIBUTE_ORGANIZATION,
            "distributed_documents",
            distribution.id,
            json!({ "document_id": document.id, "sent_to_all": true }),
        )?;

        info!(%document_id, sender_id = %sender.id(), "document distributed to organization");
        Ok(distribution)
    })
}

/// Grants `view` to every active member of the given departments.
pub fn send_document_to_departments(
    conn: &mut PgConnection,
    sender: &Principal,
    document_id: Uuid,
    department_ids: &[Uuid],
) -> AccessResult<BulkShareOutcome> {
    let ids = normalize_department_ids(department_ids)?;
    check_department_scope(sender, &ids)?;

    conn.transaction::<_, AccessError, _>(|conn| {
        let document = authorize_sender(conn, sender, document_id)?;
        ensure_active_departments(conn, &ids)?;
        let recipients = department_members(conn, &ids, sender, &document)?;
        bulk_share(
            conn,
            sender,
            &document,
            &recipients,
            ids,
            false,
            audit::ACTION_SEND_DEPARTMENT,
        )
    })
}

/// Grants `view` to every active user, or to the members of
/// `department_ids` when a non-empty filter is given.
pub fn send_document_to_company(
    conn: &mut PgConnection,
    sender: &Principal,
    document_id: Uuid,
    department_ids: Option<&[Uuid]>,
) -> AccessResult<BulkShareOutcome> {
    let filter = match department_ids {
        Some(ids) if !ids.is_empty() => {
            let ids = normalize_department_ids(ids)?;
            check_department_scope(sender, &ids)?;
            Some(ids)
        }
        _ => None,
    };

    conn.transaction::<_, AccessError, _>(|conn| {
        let document = authorize_sender(conn, sender, document_id)?;

        let (recipients, ids, sent_to_all) = match filter {
            Some(ids) => {
                ensure_active_departments(conn, &ids)?;
                let recipients = department_members(conn, &ids, sender, &document)?;
                (recipients, ids, false)
            }
            None => {
                let recipients: Vec<Uuid> = users::table
                    .filter(users::status.eq(STATUS_ACTIVE))
                    .filter(users::id.ne(sender.id()))
                    .filter(users::id.ne(document.owner_id))
                    .select(users::id)
                    .load(conn)?;
                (recipients, Vec::new(), true)
            }
        };

        bulk_share(
            conn,
            sender,
            &document,
            &recipients,
            ids,
            sent_to_all,
            audit::ACTION_SEND_COMPANY,
        )
    })
}

/// Distribution history of a document. Owner only.
pub fn list_distributions(
    conn: &mut PgConnection,
    owner: &Principal,
    document_id: Uuid,
) -> AccessResult<Vec<DistributedDocument>> {
    require_owner(conn, owner.id(), document_id)?;
    Ok(distributed_documents::table
        .filter(distributed_documents::document_id.eq(document_id))
        .order(distributed_documents::created_at.desc())
        .load(conn)?)
}

/// Senders must own the document or hold the `resend` grant on it.
fn authorize_sender(
    conn: &mut PgConnection,
    sender: &Principal,
    document_id: Uuid,
) -> AccessResult<Document> {
    let (document, access) = effective_permissions(conn, sender.id(), document_id)?;
    match access {
        DocumentAccess::None => Err(AccessError::NotFound("document")),
        ref access if !access.allows(DocumentPermission::Resend) => Err(
            AccessError::not_authorized("'resend' permission is required to distribute this document"),
        ),
        _ => Ok(document),
    }
}

pub(crate) fn ensure_active_departments(conn: &mut PgConnection, ids: &[Uuid]) -> AccessResult<()> {
    let found: HashSet<Uuid> = departments::table
        .filter(departments::id.eq_any(ids.to_vec()))
        .filter(departments::status.eq(STATUS_ACTIVE))
        .select(departments::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();

    let missing: Vec<Uuid> = ids.iter().filter(|id| !found.contains(id)).copied().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AccessError::MissingReferences {
            kind: "department",
            ids: missing,
        })
    }
}

fn department_members(
    conn: &mut PgConnection,
    department_ids: &[Uuid],
    sender: &Principal,
    document: &Document,
) -> QueryResult<Vec<Uuid>> {
    users::table
        .filter(users::department_id.eq_any(department_ids.to_vec()))
        .filter(users::status.eq(STATUS_ACTIVE))
        .filter(users::id.ne(sender.id()))
        .filter(users::id.ne(document.owner_id))
        .select(users::id)
        .load(conn)
}

fn append_distribution(
    conn: &mut PgConnection,
    document_id: Uuid,
    sender_id: Uuid,
    recipient_department_ids: Vec<Uuid>,
    sent_to_all: bool,
) -> QueryResult<DistributedDocument> {
    diesel::insert_into(distributed_documents::table)
        .values(&NewDistributedDocument {
            id: Uuid::new_v4(),
            document_id,
            sender_id,
            recipient_department_ids,
            sent_to_all,
        })
        .get_result(conn)
}

/// Inserts `view` shares for recipients that have none yet. Existing grants
/// are left untouched so a bulk send never narrows an individual share.
fn bulk_share(
    conn: &mut PgConnection,
    sender: &Principal,
    document: &Document,
    recipients: &[Uuid],
    department_ids: Vec<Uuid>,
    sent_to_all: bool,
    action: &str,
) -> AccessResult<BulkShareOutcome> {
    let view = PermissionSet::view_only().to_stored();
    let mut shared_with = Vec::with_capacity(recipients.len());

    for chunk in recipients.chunks(INSERT_CHUNK) {
        let rows: Vec<NewDocumentShare> = chunk
            .iter()
            .map(|recipient_id| NewDocumentShare {
                id: Uuid::new_v4(),
                document_id: document.id,
                recipient_id: *recipient_id,
                sharer_id: sender.id(),
                permission_granted: view.clone(),
            })
            .collect();

        let inserted: Vec<Uuid> = diesel::insert_into(document_shares::table)
            .values(&rows)
            .on_conflict((document_shares::document_id, document_shares::recipient_id))
            .do_nothing()
            .returning(document_shares::recipient_id)
            .get_results(conn)?;

        if !inserted.is_empty() {
            let statuses: Vec<NewUserDocumentStatus> = inserted
                .iter()
                .map(|user_id| NewUserDocumentStatus {
                    id: Uuid::new_v4(),
                    user_id: *user_id,
                    document_id: document.id,
                    is_read: false,
                })
                .collect();

            diesel::insert_into(user_document_status::table)
                .values(&statuses)
                .on_conflict((user_document_status::user_id, user_document_status::document_id))
                .do_update()
                .set(user_document_status::is_read.eq(false))
                .execute(conn)?;
        }

        shared_with.extend(inserted);
    }

    let already_shared = recipients.len() - shared_with.len();
    let distribution = append_distribution(
        conn,
        document.id,
        sender.id(),
        department_ids.clone(),
        sent_to_all,
    )?;

    audit::record(
        conn,
        Some(sender.id()),
        action,
        "document_shares",
        document.id,
        json!({
            "distribution_id": distribution.id,
            "department_ids": department_ids,
            "sent_to_all": sent_to_all,
            "shared_with": shared_with.len(),
            "already_shared": already_shared,
        }),
    )?;

    info!(
        document_id = %document.id,
        sender_id = %sender.id(),
        shared_with = shared_with.len(),
        already_shared,
        sent_to_all,
        "document shared in bulk"
    );

    Ok(BulkShareOutcome {
        distribution,
        shared_with,
        already_shared,
    })
}
