mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_json, TestApp, TestUser};
use docshare::access::audit::{ACTION_DOCUMENT_SHARE, ACTION_DOCUMENT_UNSHARE};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
struct Share {
    recipient_id: Uuid,
    sharer_id: Uuid,
    permissions: Vec<String>,
}

#[derive(Deserialize)]
struct DocumentView {
    id: Uuid,
    access: String,
    permissions: Vec<String>,
}

#[derive(Deserialize)]
struct SharedBy {
    id: Uuid,
    email: String,
}

#[derive(Deserialize)]
struct Notification {
    document: DocumentView,
    shared_by: SharedBy,
}

struct Cast {
    alice: Uuid,
    alice_token: String,
    bob: Uuid,
    bob_token: String,
    document_id: Uuid,
}

async fn cast(app: &TestApp) -> Result<Cast> {
    let alice = app
        .insert_user(TestUser {
            email: "alice@example.com",
            role: Some("Employee"),
            ..TestUser::default()
        })
        .await?;
    let bob = app
        .insert_user(TestUser {
            email: "bob@example.com",
            role: Some("Employee"),
            ..TestUser::default()
        })
        .await?;
    let document_id = app.insert_document(alice, "Budget.pdf").await?;

    Ok(Cast {
        alice,
        alice_token: app.token_for(alice, "alice@example.com")?,
        bob,
        bob_token: app.token_for(bob, "bob@example.com")?,
        document_id,
    })
}

async fn unread(app: &TestApp, token: &str) -> Result<Vec<Notification>> {
    expect_json(
        app.get("/api/notifications/unread", Some(token)).await?,
        StatusCode::OK,
    )
    .await
}

#[tokio::test]
async fn share_read_and_revoke_lifecycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let c = cast(&app).await?;
    let doc_path = format!("/api/documents/{}", c.document_id);
    let share_path = format!("{doc_path}/shares/{}", c.bob);

    // Bob cannot tell the document exists yet.
    let response = app.get(&doc_path, Some(&c.bob_token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let share: Share = expect_json(
        app.put_json(&share_path, &json!({ "permissions": ["view"] }), Some(&c.alice_token))
            .await?,
        StatusCode::CREATED,
    )
    .await?;
    assert_eq!(share.recipient_id, c.bob);
    assert_eq!(share.sharer_id, c.alice);
    assert_eq!(share.permissions, vec!["view"]);

    let seen: DocumentView = expect_json(
        app.get(&doc_path, Some(&c.bob_token)).await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(seen.id, c.document_id);
    assert_eq!(seen.access, "share");
    assert_eq!(seen.permissions, vec!["view"]);

    let response = app
        .get(&format!("{doc_path}/download"), Some(&c.bob_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let notifications = unread(&app, &c.bob_token).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].document.id, c.document_id);
    assert_eq!(notifications[0].shared_by.id, c.alice);
    assert_eq!(notifications[0].shared_by.email, "alice@example.com");

    let response = app
        .post_empty(&format!("{doc_path}/read"), Some(&c.bob_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(unread(&app, &c.bob_token).await?.is_empty());

    // Re-sharing replaces the grant and flags the document unread again.
    let share: Share = expect_json(
        app.put_json(
            &share_path,
            &json!({ "permissions": ["download", "view"] }),
            Some(&c.alice_token),
        )
        .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(share.permissions, vec!["view", "download"]);
    assert_eq!(app.share_count(c.document_id).await?, 1);
    assert_eq!(unread(&app, &c.bob_token).await?.len(), 1);

    let response = app
        .get(&format!("{doc_path}/download"), Some(&c.bob_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.delete(&share_path, Some(&c.alice_token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.delete(&share_path, Some(&c.alice_token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(app.share_count(c.document_id).await?, 0);
    let response = app.get(&doc_path, Some(&c.bob_token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(unread(&app, &c.bob_token).await?.is_empty());

    assert_eq!(app.audit_entries(ACTION_DOCUMENT_SHARE).await?.len(), 2);
    let revoked = app.audit_entries(ACTION_DOCUMENT_UNSHARE).await?;
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].actor_id, Some(c.alice));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_the_owner_manages_shares() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let c = cast(&app).await?;
    let carol = app
        .insert_user(TestUser {
            email: "carol@example.com",
            ..TestUser::default()
        })
        .await?;

    let response = app
        .put_json(
            &format!("/api/documents/{}/shares/{}", c.document_id, c.bob),
            &json!({ "permissions": ["view", "resend"] }),
            Some(&c.alice_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Holding a share, even with resend, does not make Bob an owner.
    let response = app
        .put_json(
            &format!("/api/documents/{}/shares/{carol}", c.document_id),
            &json!({ "permissions": ["view"] }),
            Some(&c.bob_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get(
            &format!("/api/documents/{}/shares", c.document_id),
            Some(&c.bob_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let shares: Vec<Share> = expect_json(
        app.get(
            &format!("/api/documents/{}/shares", c.document_id),
            Some(&c.alice_token),
        )
        .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].recipient_id, c.bob);
    assert_eq!(app.share_permissions(c.document_id, carol).await?, None);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_share_requests_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let c = cast(&app).await?;
    let base = format!("/api/documents/{}/shares", c.document_id);

    let response = app
        .put_json(
            &format!("{base}/{}", c.alice),
            &json!({ "permissions": ["view"] }),
            Some(&c.alice_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = expect_json(
        app.put_json(
            &format!("{base}/{}", c.bob),
            &json!({ "permissions": ["view", "delete"] }),
            Some(&c.alice_token),
        )
        .await?,
        StatusCode::BAD_REQUEST,
    )
    .await?;
    assert_eq!(body["code"], "validation_error");

    let response = app
        .put_json(
            &format!("{base}/{}", c.bob),
            &json!({ "permissions": [] }),
            Some(&c.alice_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(
            &format!("{base}/{}", Uuid::new_v4()),
            &json!({ "permissions": ["view"] }),
            Some(&c.alice_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .put_json(
            &format!("/api/documents/{}/shares/{}", Uuid::new_v4(), c.bob),
            &json!({ "permissions": ["view"] }),
            Some(&c.alice_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(app.share_count(c.document_id).await?, 0);
    assert!(app.audit_entries(ACTION_DOCUMENT_SHARE).await?.is_empty());

    app.cleanup().await?;
    Ok(())
}
