//! Cookie-backed server-side sessions.
//!
//! The session middleware loads the row named by the encrypted
//! `audit_session` cookie, resolves its user, and exposes a [`Session`]
//! handle to inner layers and handlers. Changes are persisted after the
//! response is produced; a cookie is only issued once a new session is
//! actually written.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::Utc;
use entity::users;
use platform_audit::Identity;
use platform_db::{sessions::SessionRecord, users as user_store};
use serde_json::{Map, Value};
use time::Duration as TimeDuration;
use tracing::warn;
use uuid::Uuid;

use crate::http::{AppState, client_ip, header_str};

pub const SESSION_COOKIE: &str = "audit_session";

struct SessionState {
    record: SessionRecord,
    user: Option<users::Model>,
    is_new: bool,
    dirty: bool,
    flushed: bool,
}

/// Shared handle to the current request's session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(record: SessionRecord, user: Option<users::Model>, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                record,
                user,
                is_new,
                dirty: false,
                flushed: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.state().record.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state().record.data.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state();
        let key = key.into();
        if state.record.data.get(&key) != Some(&value) {
            state.record.data.insert(key, value);
            state.dirty = true;
        }
    }

    pub fn current_user(&self) -> Option<users::Model> {
        self.state().user.clone()
    }

    /// The session user as an audit identity.
    pub fn identity(&self) -> Identity {
        match self.current_user() {
            Some(user) => Identity::Authenticated {
                user_id: user.id,
                username: user.username,
            },
            None => Identity::Anonymous,
        }
    }

    pub fn login(&self, user: &users::Model) {
        let mut state = self.state();
        state.record.user_id = Some(user.id);
        state.user = Some(user.clone());
        state.dirty = true;
    }

    /// Drops the user and every stored value.
    pub fn logout(&self) {
        let mut state = self.state();
        state.record.user_id = None;
        state.record.data = Map::new();
        state.user = None;
        state.flushed = true;
        state.dirty = true;
    }
}

enum Outcome {
    Unchanged,
    Saved { issue_cookie: bool },
    Deleted,
}

pub async fn session_middleware(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session_id = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());

    let existing = match session_id {
        Some(id) => platform_db::sessions::load_session(&state.pool, id)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, session_id = %id, "failed to load session");
                None
            }),
        None => None,
    };

    let session = match existing {
        Some(record) => {
            let user = match record.user_id {
                Some(user_id) => load_active_user(&state, user_id).await,
                None => None,
            };
            Session::new(record, user, false)
        }
        None => {
            let record = SessionRecord {
                id: Uuid::new_v4(),
                user_id: None,
                data: Map::new(),
                expires_at: Utc::now() + state.config.session_ttl,
                ip: client_ip(&request),
                user_agent: header_str(request.headers(), "user-agent").map(str::to_string),
            };
            Session::new(record, None, true)
        }
    };

    request.extensions_mut().insert(session.clone());
    let response = next.run(request).await;

    match persist(&state, &session).await {
        Outcome::Unchanged => response,
        Outcome::Saved { issue_cookie: false } => response,
        Outcome::Saved { issue_cookie: true } => {
            let cookie = session_cookie(&state, session.id());
            (jar.add(cookie), response).into_response()
        }
        Outcome::Deleted => {
            let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
            (jar.remove(removal), response).into_response()
        }
    }
}

async fn load_active_user(state: &AppState, user_id: Uuid) -> Option<users::Model> {
    match user_store::find_user(&state.pool, user_id).await {
        Ok(user) => user.filter(|user| user.is_active),
        Err(err) => {
            warn!(%err, %user_id, "failed to load session user");
            None
        }
    }
}

async fn persist(state: &AppState, session: &Session) -> Outcome {
    let (record, is_new, flushed) = {
        let mut guard = session.state();
        if !guard.dirty {
            return Outcome::Unchanged;
        }
        guard.dirty = false;
        (guard.record.clone(), guard.is_new, guard.flushed)
    };

    if flushed && record.data.is_empty() && record.user_id.is_none() {
        if !is_new {
            if let Err(err) = platform_db::sessions::delete_session(&state.pool, record.id).await {
                warn!(%err, session_id = %record.id, "failed to delete session");
            }
        }
        return Outcome::Deleted;
    }

    match platform_db::sessions::save_session(&state.pool, &record, is_new).await {
        Ok(()) => {
            session.state().is_new = false;
            Outcome::Saved {
                issue_cookie: is_new,
            }
        }
        Err(err) => {
            warn!(%err, session_id = %record.id, "failed to save session");
            Outcome::Unchanged
        }
    }
}

fn session_cookie(state: &AppState, id: Uuid) -> Cookie<'static> {
    let max_age = TimeDuration::seconds(state.config.session_ttl.num_seconds());
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}
