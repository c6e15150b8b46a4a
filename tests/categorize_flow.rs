mod common;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_json, TestApp, TestUser};
use diesel::prelude::*;
use docshare::ai::{
    Classification, ClassifierError, DocumentClassifier, DocumentContent, RosterEntry,
};
use docshare::jobs::{
    reserve_job, settle_job, Settlement, JOB_CATEGORIZE_DOCUMENT, STATUS_QUEUED, STATUS_SUCCEEDED,
};
use docshare::models::Job;
use docshare::schema::jobs;
use docshare::workers::{categorize::CategorizeDocumentJob, JobExecution, JobHandler};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Replies with a fixed classification and remembers the roster it was shown.
struct ScriptedClassifier {
    reply: Result<Classification, String>,
    seen_roster: Mutex<Vec<Uuid>>,
}

impl ScriptedClassifier {
    fn new(reply: Result<Classification, String>) -> Self {
        Self {
            reply,
            seen_roster: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DocumentClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        content: &DocumentContent,
        roster: &[RosterEntry],
    ) -> Result<Classification, ClassifierError> {
        assert!(matches!(content, DocumentContent::Text { .. }));
        *self.seen_roster.lock().expect("roster lock") = roster.iter().map(|r| r.id).collect();
        self.reply
            .clone()
            .map_err(|message| ClassifierError::Status {
                status: 502,
                body: message,
            })
    }
}

#[derive(Deserialize)]
struct DocumentView {
    id: Uuid,
    status: String,
    ai_categories: Vec<String>,
    ai_suggested_recipients: Option<Vec<Uuid>>,
    ai_processing_error: Option<String>,
}

#[derive(Deserialize)]
struct UploadUrl {
    file_id: String,
}

async fn queued_jobs(app: &TestApp) -> Result<i64> {
    app.with_conn(|conn| {
        jobs::table
            .filter(jobs::job_type.eq(JOB_CATEGORIZE_DOCUMENT))
            .filter(jobs::status.eq(STATUS_QUEUED))
            .count()
            .get_result::<i64>(conn)
            .context("failed to count jobs")
    })
    .await
}

/// Takes the next categorize job off the queue the way the worker does.
async fn reserve(app: &TestApp) -> Result<Job> {
    app.with_conn(|conn| {
        reserve_job(conn, &[JOB_CATEGORIZE_DOCUMENT])?.context("categorize job was not queued")
    })
    .await
}

async fn upload_unclassified(app: &TestApp, token: &str) -> Result<DocumentView> {
    let ticket: UploadUrl = expect_json(
        app.post_json(
            "/api/documents/upload-url",
            &json!({ "filename": "invoice.txt" }),
            Some(token),
        )
        .await?,
        StatusCode::OK,
    )
    .await?;
    app.storage()
        .put(&ticket.file_id, b"Invoice 42 for consulting services")
        .await;
    expect_json(
        app.post_json(
            "/api/documents",
            &json!({ "name": "invoice.txt", "file_id": ticket.file_id }),
            Some(token),
        )
        .await?,
        StatusCode::CREATED,
    )
    .await
}

#[tokio::test]
async fn categorization_completes_the_document() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let alice = app
        .insert_user(TestUser {
            email: "alice@example.com",
            ..TestUser::default()
        })
        .await?;
    let bob = app
        .insert_user(TestUser {
            email: "bob@example.com",
            ..TestUser::default()
        })
        .await?;
    let alice_token = app.token_for(alice, "alice@example.com")?;

    let created = upload_unclassified(&app, &alice_token).await?;
    assert_eq!(created.status, "processing");

    assert_eq!(queued_jobs(&app).await?, 1);
    let job = reserve(&app).await?;
    assert_eq!(job.payload, json!({ "document_id": created.id }));

    let classifier = Arc::new(ScriptedClassifier::new(Ok(Classification {
        categories: vec!["Finance".to_string()],
        suggested_recipients: vec![bob],
    })));
    let job_id = job.id;
    let handler = CategorizeDocumentJob::new(classifier.clone());
    let outcome = handler.handle(Arc::new(app.state.clone()), job).await;
    assert!(matches!(outcome, JobExecution::Success));
    assert_eq!(*classifier.seen_roster.lock().expect("roster lock"), vec![bob]);

    let (status, last_error) = app
        .with_conn(move |conn| {
            settle_job(conn, job_id, &Settlement::from(outcome))?;
            jobs::table
                .find(job_id)
                .select((jobs::status, jobs::last_error))
                .first::<(String, Option<String>)>(conn)
                .context("failed to load settled job")
        })
        .await?;
    assert_eq!(status, STATUS_SUCCEEDED);
    assert_eq!(last_error, None);

    let document: DocumentView = expect_json(
        app.get(&format!("/api/documents/{}", created.id), Some(&alice_token))
            .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(document.status, "completed");
    assert_eq!(document.ai_categories, vec!["Finance"]);
    assert_eq!(document.ai_suggested_recipients, Some(vec![bob]));
    assert!(document.ai_processing_error.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upstream_failure_marks_the_document_failed_until_reprocessed() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let alice = app
        .insert_user(TestUser {
            email: "alice@example.com",
            ..TestUser::default()
        })
        .await?;
    let token = app.token_for(alice, "alice@example.com")?;
    let created = upload_unclassified(&app, &token).await?;

    let job = reserve(&app).await?;
    assert_eq!(queued_jobs(&app).await?, 0);
    let handler = CategorizeDocumentJob::new(Arc::new(ScriptedClassifier::new(Err(
        "model overloaded".to_string(),
    ))));
    let outcome = handler.handle(Arc::new(app.state.clone()), job).await;
    assert!(matches!(outcome, JobExecution::Failed { .. }));

    let path = format!("/api/documents/{}", created.id);
    let failed: DocumentView = expect_json(app.get(&path, Some(&token)).await?, StatusCode::OK).await?;
    assert_eq!(failed.status, "failed");
    assert!(failed
        .ai_processing_error
        .as_deref()
        .is_some_and(|error| error.contains("model overloaded")));

    let requeued: DocumentView = expect_json(
        app.post_empty(&format!("{path}/reprocess"), Some(&token))
            .await?,
        StatusCode::ACCEPTED,
    )
    .await?;
    assert_eq!(requeued.id, created.id);
    assert_eq!(requeued.status, "processing");
    assert!(requeued.ai_processing_error.is_none());
    assert_eq!(queued_jobs(&app).await?, 1);

    app.cleanup().await?;
    Ok(())
}
