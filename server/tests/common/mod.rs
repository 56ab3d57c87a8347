#![allow(dead_code)]

use audit_server::{
    AppConfig, AppState, auth::hash_password, build_router_with, middleware::AuditContext,
};
use axum::{
    Extension, Json, Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
    routing::any,
};
use axum_extra::extract::cookie::Key;
use entity::{activity_logs, users};
use http_body_util::BodyExt;
use migration::{Migrator, MigratorTrait};
use platform_db::DbPool;
use sea_orm::{ConnectOptions, Database, EntityTrait, QueryOrder};
use serde_json::{Value, json};
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
}

async fn ok() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn bad() -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": true })))
}

async fn boom() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn audit_context(Extension(context): Extension<AuditContext>) -> Json<Value> {
    Json(json!({
        "event_kind": context.event_kind,
        "provisional_username": context.provisional_username,
    }))
}

/// Stand-ins for the host application's audited endpoints.
fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/ocr/", any(ok))
        .route("/dashboard/recent-features/", any(ok))
        .route("/save-to-database/create/", any(ok))
        .route("/api/v1/comments/", any(ok))
        .route("/api/v1/annotations/", any(ok))
        .route("/api/v1/documents/123/", any(ok))
        .route("/auth/api/protected-endpoint/", any(ok))
        .route("/some-random-path/", any(ok))
        .route("/will-return-400/", any(bad))
        .route("/api/chat/something/", any(ok))
        .route("/api/chat/rejected/", any(bad))
        .route("/api/chat/crashed/", any(boom))
        .route("/whoami/", any(audit_context))
        .route("/api/chat/whoami/", any(audit_context))
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let pool = Database::connect(options).await.expect("sqlite pool");
    Migrator::up(&pool, None).await.expect("migrations");

    let mut config = AppConfig::new(Key::from(&[7u8; 64]));
    tweak(&mut config);
    let state = AppState::new(pool.clone(), config);
    TestApp {
        router: build_router_with(state, app_routes()),
        pool,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn logs(&self) -> Vec<activity_logs::Model> {
        activity_logs::Entity::find()
            .order_by_asc(activity_logs::Column::Id)
            .all(&self.pool)
            .await
            .expect("activity logs")
    }

    pub async fn create_user(&self, username: &str, password: &str) -> users::Model {
        let hash = hash_password(password).expect("hash");
        platform_db::users::create_user(
            &self.pool,
            username,
            &format!("{username}@example.com"),
            hash,
        )
        .await
        .expect("user")
    }
}

pub fn get(path: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(path)
}

pub fn post(path: &str) -> axum::http::request::Builder {
    Request::builder().method("POST").uri(path)
}

pub fn json_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
    builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty(builder: axum::http::request::Builder) -> Request<Body> {
    builder.body(Body::empty()).expect("request")
}

pub fn with_cookie(
    builder: axum::http::request::Builder,
    cookie: &Option<String>,
) -> axum::http::request::Builder {
    match cookie {
        Some(cookie) => builder.header(header::COOKIE, cookie),
        None => builder,
    }
}

/// `name=value` pair of the session cookie set on a response, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter(|value| value.starts_with("audit_session="))
        .map(|value| value.split(';').next().unwrap_or_default().to_string())
        .next()
}

pub async fn json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
