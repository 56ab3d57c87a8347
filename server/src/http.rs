use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, FromRef, Path, Query, Request, State},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use platform_api::{ApiError, ApiResult};
use platform_audit::DbActivityStore;
use platform_db::{DbPool, activity_logs};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    auth,
    config::AppConfig,
    graphql::{self, SchemaType},
    middleware::audit_middleware,
    query::{ActivityLogView, LogListParams, LogPageBody},
    session::{Session, session_middleware},
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub schema: SchemaType,
    pub config: Arc<AppConfig>,
    pub audit_store: Arc<DbActivityStore>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        Self {
            schema: graphql::build_schema(pool.clone()),
            audit_store: Arc::new(DbActivityStore::new(pool.clone())),
            config: Arc::new(config),
            pool,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.config.cookie_key.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "audit server listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    // Credentials cannot be combined with a wildcard origin.
    let with_credentials = !allowed.is_empty();
    let allow_origin = if with_credentials {
        AllowOrigin::list(allowed)
    } else {
        AllowOrigin::any()
    };
    CorsLayer::new()
        .allow_credentials(with_credentials)
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    build_router_with(state, Router::new())
}

/// Mounts `app_routes` next to the built-in routes so they run under the
/// same session and audit layers.
pub fn build_router_with(state: AppState, app_routes: Router<AppState>) -> Router {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    Router::new()
        .route("/auth/login/", post(auth::login_handler))
        .route("/auth/logout/", post(auth::logout_handler))
        .route("/api/audit/ping/", get(ping_handler))
        .route("/api/audit/logs/", get(list_logs_handler))
        .route("/api/audit/logs/{id}/", get(get_log_handler))
        .route("/graphql", post(graphql_handler))
        .merge(app_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

async fn ping_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_logs_handler(
    State(state): State<AppState>,
    Query(params): Query<LogListParams>,
) -> ApiResult<Json<LogPageBody>> {
    let query = params.into_query()?;
    let page = activity_logs::search_activity_logs(&state.pool, &query).await?;
    if page.is_out_of_range() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(LogPageBody::from(page)))
}

async fn get_log_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ActivityLogView>> {
    activity_logs::find_activity_log(&state.pool, id)
        .await?
        .map(|row| Json(ActivityLogView::from(row)))
        .ok_or(ApiError::NotFound)
}

async fn graphql_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let req = request.into_inner().data(session.identity());
    GraphQLResponse::from(state.schema.execute(req).await)
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First `x-forwarded-for` hop, else the peer address.
pub(crate) fn client_ip(request: &Request) -> Option<String> {
    if let Some(forwarded) = header_str(request.headers(), "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|hop| !hop.is_empty()) {
            return Some(first.to_string());
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}
