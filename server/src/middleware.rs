//! Audit layer: resolves a provisional identity for every request, captures
//! what login resolution needs before the handler runs, and records one
//! activity row for every classified request that did not fail.

use axum::{
    body::{self, Body, HttpBody},
    extract::{Request, State},
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use platform_audit::{
    AUDIT_SESSION_KEY, ActivityEntry, CapturedBody, EventKind, Identity, RequestContext,
    SessionCache, classify, log_activity, provisional_username, resolve_final,
};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    http::{AppState, REQUEST_ID_HEADER, client_ip, header_str},
    session::Session,
};

/// Inserted into request extensions for every request. `event_kind` is
/// `None` when the route is not audited.
#[derive(Clone, Debug)]
pub struct AuditContext {
    pub event_kind: Option<EventKind>,
    pub provisional_username: String,
}

pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let kind = classify(request.uri().path(), request.method());

    let (mut request, captured) = if kind == Some(EventKind::UserLogin) {
        capture_body(request, state.config.capture_limit_bytes).await
    } else {
        (request, CapturedBody::default())
    };

    let session = request.extensions().get::<Session>().cloned();
    let store = state.audit_store.as_ref();
    let provisional = provisional_username(
        &identity_of(session.as_ref()),
        &cache_of(session.as_ref()),
        store,
    )
    .await;

    request.extensions_mut().insert(AuditContext {
        event_kind: kind,
        provisional_username: provisional.clone(),
    });
    let Some(kind) = kind else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let querystring = request.uri().query().unwrap_or_default().to_string();
    let context = RequestContext {
        ip_address: client_ip(&request),
        user_agent: header_str(request.headers(), "user-agent")
            .unwrap_or_default()
            .to_string(),
        request_id: header_str(request.headers(), REQUEST_ID_HEADER)
            .unwrap_or_default()
            .to_string(),
    };

    let response = next.run(request).await;
    let status = response.status();
    if status.as_u16() >= 400 {
        debug!(event = %kind, %status, "request failed; not audited");
        return response;
    }

    // Re-read so a handler that signed the user in is visible here.
    let auth = identity_of(session.as_ref());
    let cache = cache_of(session.as_ref());
    let resolution = resolve_final(kind, &auth, &provisional, &cache, &captured, store).await;

    if let (Some(session), Some(name)) = (&session, &resolution.session_write) {
        session.insert(AUDIT_SESSION_KEY, Value::String(name.clone()));
    }

    let mut metadata = Map::new();
    metadata.insert("path".into(), json!(path));
    metadata.insert("method".into(), json!(method));
    metadata.insert("status_code".into(), json!(status.as_u16()));
    metadata.insert("querystring".into(), json!(querystring));
    metadata.insert("username".into(), json!(resolution.username));

    let entry = ActivityEntry::new(resolution.identity, kind)
        .request(&context)
        .metadata(metadata);
    if let Err(err) = log_activity(store, entry).await {
        warn!(%err, event = %kind, %path, "failed to record activity");
    }

    response
}

fn identity_of(session: Option<&Session>) -> Identity {
    session.map(Session::identity).unwrap_or(Identity::Anonymous)
}

fn cache_of(session: Option<&Session>) -> SessionCache {
    let cached = session
        .and_then(|session| session.get(AUDIT_SESSION_KEY))
        .and_then(|value| value.as_str().map(str::to_string));
    SessionCache::new(cached)
}

/// Buffers the body so it can be read here and still reach the handler.
/// Only bodies with a known length within `limit` are buffered; anything
/// else reaches the handler untouched with nothing captured.
async fn capture_body(request: Request, limit: usize) -> (Request, CapturedBody) {
    let content_type = header_str(request.headers(), CONTENT_TYPE.as_str()).map(str::to_string);
    let declared = header_str(request.headers(), CONTENT_LENGTH.as_str())
        .and_then(|raw| raw.parse::<u64>().ok())
        .or_else(|| request.body().size_hint().upper());
    match declared {
        Some(len) if len <= limit as u64 => {}
        Some(len) => {
            debug!(len, limit, "login body over capture limit; skipping capture");
            return (request, CapturedBody::new(Vec::new(), content_type));
        }
        None => {
            debug!("login body has no known length; skipping capture");
            return (request, CapturedBody::new(Vec::new(), content_type));
        }
    }

    let (parts, body) = request.into_parts();
    match body::to_bytes(body, limit).await {
        Ok(bytes) => {
            let captured = CapturedBody::new(bytes.to_vec(), content_type);
            (Request::from_parts(parts, Body::from(bytes)), captured)
        }
        Err(err) => {
            // The body was consumed; the handler sees it as empty.
            warn!(%err, "failed to read login body");
            (
                Request::from_parts(parts, Body::empty()),
                CapturedBody::new(Vec::new(), content_type),
            )
        }
    }
}
