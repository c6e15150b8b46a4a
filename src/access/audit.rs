use diesel::{prelude::*, PgConnection};
use serde_json::Value;
use uuid::Uuid;

use crate::models::NewAuditLog;
use crate::schema::audit_logs;

pub const ACTION_DOCUMENT_CREATE: &str = "document.create";
pub const ACTION_DOCUMENT_UPDATE: &str = "document.update";
pub const ACTION_DOCUMENT_TRASH: &str = "document.trash";
pub const ACTION_DOCUMENT_RESTORE: &str = "document.restore";
pub const ACTION_DOCUMENT_DELETE: &str = "document.delete";
pub const ACTION_DOCUMENT_REPROCESS: &str = "document.reprocess";
pub const ACTION_DOCUMENT_SHARE: &str = "document.share";
pub const ACTION_DOCUMENT_UNSHARE: &str = "document.unshare";
pub const ACTION_DISTRIBUTE_DEPARTMENTS: &str = "document.distribute.departments";
pub const ACTION_DISTRIBUTE_ORGANIZATION: &str = "document.distribute.organization";
pub const ACTION_SEND_DEPARTMENT: &str = "document.send.department";
pub const ACTION_SEND_COMPANY: &str = "document.send.company";
pub const ACTION_USER_CREATE: &str = "user.create";
pub const ACTION_USER_UPDATE: &str = "user.update";
pub const ACTION_USER_ARCHIVE: &str = "user.archive";
pub const ACTION_DEPARTMENT_CREATE: &str = "department.create";
pub const ACTION_DEPARTMENT_UPDATE: &str = "department.update";
pub const ACTION_DEPARTMENT_ARCHIVE: &str = "department.archive";
pub const ACTION_ROLE_CREATE: &str = "role.create";
pub const ACTION_ROLE_UPDATE: &str = "role.update";

/// Appends one immutable audit row. Call inside the transaction of the
/// mutation being described so both commit or neither does.
pub fn record(
    conn: &mut PgConnection,
    actor_id: Option<Uuid>,
    action: &str,
    target_table: &str,
    target_id: impl ToString,
    details: Value,
) -> QueryResult<()> {
    let entry = NewAuditLog {
        id: Uuid::new_v4(),
        actor_id,
        action: action.to_string(),
        target_table: target_table.to_string(),
        target_id: target_id.to_string(),
        details,
    };

    diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}
