use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use docshare::auth::jwt::{Claims, JwtService};
use docshare::auth::password::hash_password;
use docshare::config::{AiConfig, AppConfig};
use docshare::db::{self, PgPool, MIGRATIONS};
use docshare::models::{AuditLog, NewDepartment, NewDocument, NewUser, STATUS_ACTIVE};
use docshare::routes;
use docshare::schema::{audit_logs, departments, document_shares, documents, roles, users};
use docshare::state::AppState;
use docshare::storage::ObjectStorage;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const SEEDED_ROLES: [&str; 4] = ["Administrator", "Director", "Head of Department", "Employee"];

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn presign_put_object(
        &self,
        key: &str,
        _content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "https://fake-storage/put/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
        _content_disposition: Option<String>,
    ) -> Result<String> {
        let guard = self.objects.lock().await;
        if !guard.contains_key(key) {
            return Err(anyhow!("object {key} missing"));
        }
        Ok(format!(
            "https://fake-storage/get/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn object_size(&self, key: &str) -> Result<Option<i64>> {
        let guard = self.objects.lock().await;
        Ok(guard.get(key).map(|bytes| bytes.len() as i64))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        self.deleted.lock().await.push(key.to_string());
        Ok(())
    }
}

impl FakeStorage {
    /// Stands in for the client's direct upload to a presigned URL.
    pub async fn put(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
    }

    #[allow(dead_code)]
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    #[allow(dead_code)]
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[derive(Default)]
pub struct TestUser<'a> {
    pub email: &'a str,
    pub password: Option<&'a str>,
    pub role: Option<&'a str>,
    pub department_id: Option<Uuid>,
    pub controlled_departments: Vec<Uuid>,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    /// Builds an app against `TEST_DATABASE_URL`, or returns `None` when it is
    /// unset so the suite can run without Postgres.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            upload_url_expiry_seconds: 900,
            ai: AiConfig::default(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub async fn role_id(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            roles::table
                .filter(roles::name.eq(&name))
                .select(roles::id)
                .first::<Uuid>(conn)
                .with_context(|| format!("role '{name}' not seeded"))
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_department(&self, name: &str) -> Result<Uuid> {
        let row = NewDepartment {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            status: STATUS_ACTIVE.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(departments::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert department")?;
            Ok(row.id)
        })
        .await
    }

    pub async fn insert_user(&self, user: TestUser<'_>) -> Result<Uuid> {
        let role_id = match user.role {
            Some(name) => Some(self.role_id(name).await?),
            None => None,
        };
        let password_hash = user.password.map(hash_password).transpose()?;
        let row = NewUser {
            id: Uuid::new_v4(),
            email: user.email.to_string(),
            password_hash,
            name: None,
            role_id,
            department_id: user.department_id,
            controlled_departments: user.controlled_departments,
            status: STATUS_ACTIVE.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(users::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(row.id)
        })
        .await
    }

    /// Inserts a `completed` document directly, skipping the upload handshake.
    #[allow(dead_code)]
    pub async fn insert_document(&self, owner_id: Uuid, name: &str) -> Result<Uuid> {
        let file_id = format!("uploads/{owner_id}/{}.pdf", Uuid::new_v4());
        self.storage.put(&file_id, b"%PDF-1.4 test").await;
        let row = NewDocument {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            file_id,
            mime_type: "application/pdf".to_string(),
            file_size: 13,
            status: "completed".to_string(),
            classified: true,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(documents::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(row.id)
        })
        .await
    }

    pub fn token_for(&self, user_id: Uuid, email: &str) -> Result<String> {
        self.state.jwt.generate_token(user_id, email)
    }

    /// A token asserting only a verified email, as an external identity
    /// provider would issue it.
    #[allow(dead_code)]
    pub fn email_only_token(&self, email: &str) -> Result<String> {
        let config = &self.state.config;
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: None,
            email: Some(email.to_string()),
            iss: config.jwt_issuer.clone(),
            aud: config.jwt_audience.clone(),
            iat: now.timestamp() as usize,
            exp: (now + chrono::Duration::minutes(5)).timestamp() as usize,
        };
        let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        encode(&Header::default(), &claims, &key).context("failed to encode token")
    }

    #[allow(dead_code)]
    pub async fn share_count(&self, document_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            document_shares::table
                .filter(document_shares::document_id.eq(document_id))
                .count()
                .get_result::<i64>(conn)
                .context("failed to count shares")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn share_permissions(
        &self,
        document_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<Vec<String>>> {
        self.with_conn(move |conn| {
            document_shares::table
                .filter(document_shares::document_id.eq(document_id))
                .filter(document_shares::recipient_id.eq(recipient_id))
                .select(document_shares::permission_granted)
                .first::<Vec<String>>(conn)
                .optional()
                .context("failed to load share")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn audit_entries(&self, action: &str) -> Result<Vec<AuditLog>> {
        let action = action.to_string();
        self.with_conn(move |conn| {
            audit_logs::table
                .filter(audit_logs::action.eq(&action))
                .order(audit_logs::created_at.asc())
                .load::<AuditLog>(conn)
                .context("failed to load audit log")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn distribution_count(&self, document_id: Uuid) -> Result<i64> {
        use docshare::schema::distributed_documents;
        self.with_conn(move |conn| {
            distributed_documents::table
                .filter(distributed_documents::document_id.eq(document_id))
                .count()
                .get_result::<i64>(conn)
                .context("failed to count distributions")
        })
        .await
    }

    pub async fn request_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&T>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match payload {
            Some(payload) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(payload)?)
            }
            None => Body::empty(),
        };
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.request_json(Method::POST, path, Some(payload), token).await
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request_json::<()>(Method::POST, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.request_json(Method::PUT, path, Some(payload), token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.request_json(Method::PATCH, path, Some(payload), token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request_json::<()>(Method::GET, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request_json::<()>(Method::DELETE, path, None, token).await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Asserts the status and decodes the JSON body.
#[allow(dead_code)]
pub async fn expect_json<T: DeserializeOwned>(
    response: hyper::Response<Body>,
    status: StatusCode,
) -> Result<T> {
    let actual = response.status();
    let body = body_to_vec(response.into_body()).await?;
    if actual != status {
        return Err(anyhow!(
            "expected {status}, got {actual}: {}",
            String::from_utf8_lossy(&body)
        ));
    }
    Ok(serde_json::from_slice(&body)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE audit_logs, distributed_documents, user_document_status, document_shares, \
         documents, refresh_tokens, jobs, users, departments RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    diesel::delete(roles::table.filter(roles::name.ne_all(SEEDED_ROLES.to_vec())))
        .execute(conn)
        .context("failed to remove test roles")?;
    Ok(())
}
