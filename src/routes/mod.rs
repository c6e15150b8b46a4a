use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access::{
    permissions::{
        DEPARTMENT_MANAGE, DOCUMENT_SEND_COMPANY, DOCUMENT_SEND_DEPARTMENT, LOGS_VIEW,
        ROLE_MANAGE, USER_MANAGE,
    },
    require_permissions, PermissionGate,
};
use crate::{auth::SessionIdentity, state::AppState};

pub mod admin;
pub mod auth;
pub mod distribution;
pub mod documents;
pub mod health;
pub mod shares;

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => AllowOrigin::list(origins.split(',').filter_map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    tracing::warn!(origin = %trimmed, "ignoring invalid CORS origin");
                    None
                }
            }
        })),
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let gate = |required: &'static [&'static str]| {
        middleware::from_fn_with_state(PermissionGate::new(state.clone(), required), require_permissions)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let send_department_routes = Router::new()
        .route("/:id/send/department", post(distribution::send_to_department))
        .route_layer(gate(&[DOCUMENT_SEND_DEPARTMENT]));

    let send_company_routes = Router::new()
        .route("/:id/send/company", post(distribution::send_to_company))
        .route_layer(gate(&[DOCUMENT_SEND_COMPANY]));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route("/upload-url", post(documents::create_upload_url))
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/:id/permissions", get(documents::get_permissions))
        .route("/:id/download", get(documents::download_document))
        .route("/:id/trash", post(documents::trash_document))
        .route("/:id/restore", post(documents::restore_document))
        .route("/:id/reprocess", post(documents::reprocess_document))
        .route("/:id/read", post(shares::mark_read))
        .route("/:id/shares", get(shares::list_shares))
        .route(
            "/:id/shares/:recipient_id",
            put(shares::share_document).delete(shares::unshare_document),
        )
        .route(
            "/:id/distribute/departments",
            post(distribution::distribute_to_departments),
        )
        .route(
            "/:id/distribute/organization",
            post(distribution::distribute_to_organization),
        )
        .route("/:id/distributions", get(distribution::list_distributions))
        .merge(send_department_routes)
        .merge(send_company_routes);

    let notifications_routes = Router::new().route("/unread", get(shares::list_unread));

    let admin_users_routes = Router::new()
        .route(
            "/",
            get(admin::users::list_users).post(admin::users::create_user),
        )
        .route("/:id", patch(admin::users::update_user))
        .route("/:id/archive", post(admin::users::archive_user))
        .route_layer(gate(&[USER_MANAGE]));

    let admin_departments_routes = Router::new()
        .route(
            "/",
            get(admin::departments::list_departments).post(admin::departments::create_department),
        )
        .route("/:id", patch(admin::departments::update_department))
        .route("/:id/archive", post(admin::departments::archive_department))
        .route_layer(gate(&[DEPARTMENT_MANAGE]));

    let admin_roles_routes = Router::new()
        .route(
            "/",
            get(admin::roles::list_roles).post(admin::roles::create_role),
        )
        .route("/:id", patch(admin::roles::update_role))
        .route_layer(gate(&[ROLE_MANAGE]));

    let admin_audit_routes = Router::new()
        .route("/", get(admin::audit_logs::list_audit_logs))
        .route_layer(gate(&[LOGS_VIEW]));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/admin/users", admin_users_routes)
        .nest("/api/admin/departments", admin_departments_routes)
        .nest("/api/admin/roles", admin_roles_routes)
        .nest("/api/admin/audit-logs", admin_audit_routes)
        .layer(middleware::from_extractor_with_state::<SessionIdentity, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
