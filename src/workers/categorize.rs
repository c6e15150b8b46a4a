use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::{prelude::*, PgConnection};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    access::AccessError,
    ai::{DocumentClassifier, DocumentContent, RosterEntry},
    documents::{complete_processing, fail_processing, DocumentStatus},
    jobs::JOB_CATEGORIZE_DOCUMENT,
    models::{Department, Document, Job, User, STATUS_ACTIVE},
    schema::{departments, documents, users},
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct CategorizePayload {
    document_id: Uuid,
}

pub struct CategorizeDocumentJob {
    classifier: Arc<dyn DocumentClassifier>,
}

impl CategorizeDocumentJob {
    pub fn new(classifier: Arc<dyn DocumentClassifier>) -> Self {
        Self { classifier }
    }
}

struct CategorizeContext {
    document: Document,
    roster: Vec<RosterEntry>,
}

#[async_trait]
impl JobHandler for CategorizeDocumentJob {
    fn job_type(&self) -> &'static str {
        JOB_CATEGORIZE_DOCUMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: CategorizePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid categorize payload: {err}"),
                }
            }
        };
        let document_id = payload.document_id;

        let context = match state
            .run_blocking(move |conn| Ok(load_context(conn, document_id)?))
            .await
        {
            Ok(Some(context)) => context,
            Ok(None) => return JobExecution::Success,
            Err(err) => {
                warn!(job_id = %job.id, error = ?err, "could not load categorize context");
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: format!("{err:?}"),
                };
            }
        };

        let document = context.document;
        let outcome = match state.storage.get_object(&document.file_id).await {
            Ok(bytes) => {
                let content = DocumentContent::from_bytes(&document.name, &document.mime_type, &bytes);
                self.classifier
                    .classify(&content, &context.roster)
                    .await
                    .map_err(|err| err.to_string())
            }
            Err(err) => Err(format!("failed to read document blob: {err}")),
        };

        let verdict = outcome.clone();
        let recorded = state
            .run_blocking(move |conn| {
                let result = match &verdict {
                    Ok(classification) => complete_processing(
                        conn,
                        document_id,
                        classification.categories.clone(),
                        classification.suggested_recipients.clone(),
                    ),
                    Err(message) => fail_processing(conn, document_id, message),
                };
                match result {
                    Ok(_) | Err(AccessError::NotFound(_)) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            })
            .await;

        match (recorded, outcome) {
            (Err(err), _) => JobExecution::Retry {
                delay: Duration::from_secs(30),
                error: format!("{err:?}"),
            },
            (Ok(()), Ok(classification)) => {
                info!(
                    %document_id,
                    categories = classification.categories.len(),
                    suggested = classification.suggested_recipients.len(),
                    "document categorized"
                );
                JobExecution::Success
            }
            (Ok(()), Err(message)) => {
                warn!(%document_id, error = %message, "document categorization failed");
                JobExecution::Failed { error: message }
            }
        }
    }
}

/// `None` when the document is gone or no longer waiting for categorization.
fn load_context(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> QueryResult<Option<CategorizeContext>> {
    let Some(document) = documents::table
        .find(document_id)
        .first::<Document>(conn)
        .optional()?
    else {
        info!(%document_id, "document deleted before categorization; skipping");
        return Ok(None);
    };
    if document.status != DocumentStatus::Processing.as_str() {
        info!(%document_id, status = %document.status, "document not in processing; skipping");
        return Ok(None);
    }

    let members: Vec<User> = users::table
        .filter(users::status.eq(STATUS_ACTIVE))
        .filter(users::id.ne(document.owner_id))
        .order(users::email.asc())
        .load(conn)?;

    let department_names: HashMap<Uuid, String> = departments::table
        .load::<Department>(conn)?
        .into_iter()
        .map(|department| (department.id, department.name))
        .collect();

    let roster = members
        .into_iter()
        .map(|user| RosterEntry {
            id: user.id,
            name: user.display_name().to_string(),
            department: user
                .department_id
                .and_then(|id| department_names.get(&id).cloned()),
        })
        .collect();

    Ok(Some(CategorizeContext { document, roster }))
}
