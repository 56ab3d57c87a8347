//! Acting-identity resolution.
//!
//! Resolution runs in two phases. Before the handler, [`provisional_username`]
//! produces a best guess from the authenticated user, the session cache and
//! the activity history. After the handler, [`resolve_final`] refines it per
//! event kind and reports what should be written back into the session cache.
//! Neither phase mutates the session itself; callers apply [`Resolution`].

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{EventKind, IdentityHistory};

/// Session key holding the last identity seen on this session.
pub const AUDIT_SESSION_KEY: &str = "audit_username";
pub const ANONYMOUS: &str = "anonymous";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// A user of the directory, with a row to reference.
    Authenticated { user_id: Uuid, username: String },
    /// A name with no directory row behind it.
    External { username: String },
    Anonymous,
}

impl Identity {
    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Authenticated { username, .. } | Identity::External { username } => {
                Some(username.as_str())
            }
            Identity::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated { .. })
    }

    fn authenticated_username(&self) -> Option<&str> {
        match self {
            Identity::Authenticated { username, .. } => Some(username.as_str()),
            _ => None,
        }
    }
}

/// The audit slot of a client session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCache {
    username: Option<String>,
}

impl SessionCache {
    pub fn new(username: Option<String>) -> Self {
        Self { username }
    }

    /// Cached username, ignoring empty values.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|name| !name.is_empty())
    }
}

/// Raw request payload captured before the handler consumed it.
#[derive(Clone, Debug, Default)]
pub struct CapturedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl CapturedBody {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    fn is_form(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
            .unwrap_or(false)
    }
}

/// Outcome of the post-handler phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Identity reference to attach to the log row.
    pub identity: Identity,
    /// Username recorded in the log metadata.
    pub username: String,
    /// Value to store under [`AUDIT_SESSION_KEY`], if any.
    pub session_write: Option<String>,
}

impl Resolution {
    pub fn apply(&self, cache: SessionCache) -> SessionCache {
        match &self.session_write {
            Some(name) => SessionCache::new(Some(name.clone())),
            None => cache,
        }
    }
}

async fn history_username(history: &dyn IdentityHistory) -> Option<String> {
    let found = history.last_known_username().await.unwrap_or_else(|err| {
        debug!(%err, "identity history unavailable; skipping fallback");
        None
    });
    found.filter(|name| !name.is_empty())
}

/// Pre-handler guess: authenticated user, else session cache, else history,
/// else [`ANONYMOUS`].
pub async fn provisional_username(
    auth: &Identity,
    session: &SessionCache,
    history: &dyn IdentityHistory,
) -> String {
    let known = match auth.authenticated_username() {
        Some(name) => name.to_string(),
        None => session.username().unwrap_or_default().to_string(),
    };
    if !known.is_empty() {
        return known;
    }
    history_username(history)
        .await
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Post-handler resolution for a request that will be logged.
pub async fn resolve_final(
    kind: EventKind,
    auth: &Identity,
    provisional: &str,
    session: &SessionCache,
    captured: &CapturedBody,
    history: &dyn IdentityHistory,
) -> Resolution {
    let reference = if auth.is_authenticated() {
        auth.clone()
    } else {
        Identity::Anonymous
    };

    match kind {
        EventKind::UserLogin => {
            let username = login_username(captured);
            let session_write = (!username.is_empty()).then(|| username.clone());
            Resolution {
                identity: reference,
                username,
                session_write,
            }
        }
        EventKind::OcrUploaded => {
            let username = match auth.authenticated_username() {
                Some(name) => name.to_string(),
                None => first_known(&[provisional], history).await,
            };
            Resolution {
                identity: reference,
                session_write: Some(username.clone()),
                username,
            }
        }
        _ => match auth.authenticated_username() {
            Some(name) => Resolution {
                identity: reference,
                username: name.to_string(),
                session_write: Some(name.to_string()),
            },
            None => {
                let cached = session.username().unwrap_or_default();
                Resolution {
                    identity: Identity::Anonymous,
                    username: first_known(&[cached, provisional], history).await,
                    session_write: None,
                }
            }
        },
    }
}

/// First non-empty candidate, else history, else [`ANONYMOUS`].
async fn first_known(candidates: &[&str], history: &dyn IdentityHistory) -> String {
    if let Some(found) = candidates.iter().find(|name| !name.is_empty()) {
        return found.to_string();
    }
    history_username(history)
        .await
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Username-like field of a login payload: JSON `username`, `email`, `user`,
/// then form fields `username`, `email`. Empty when none is present.
/// Any truthy JSON value counts; non-string scalars are rendered as text.
pub fn login_username(captured: &CapturedBody) -> String {
    let payload = if captured.bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&captured.bytes).unwrap_or(Value::Null)
    };
    let from_json = ["username", "email", "user"]
        .iter()
        .find_map(|key| payload.get(key).and_then(truthy_text));
    if let Some(found) = from_json {
        return found;
    }
    if !captured.is_form() {
        return String::new();
    }
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(&captured.bytes)
        .into_owned()
        .collect();
    ["username", "email"]
        .iter()
        .find_map(|key| {
            fields
                .iter()
                .find(|(name, value)| name == key && !value.is_empty())
                .map(|(_, value)| value.clone())
        })
        .unwrap_or_default()
}

/// Text of a JSON value that a login form would treat as present.
fn truthy_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("True".to_string()),
        Value::String(text) => (!text.is_empty()).then(|| text.clone()),
        Value::Number(number) => (number.as_f64() != Some(0.0)).then(|| number.to_string()),
        Value::Array(items) => (!items.is_empty()).then(|| value.to_string()),
        Value::Object(fields) => (!fields.is_empty()).then(|| value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use async_trait::async_trait;

    enum History {
        Empty,
        Known(&'static str),
        Broken,
    }

    #[async_trait]
    impl IdentityHistory for History {
        async fn last_known_username(&self) -> Result<Option<String>, StorageError> {
            match self {
                History::Empty => Ok(None),
                History::Known(name) => Ok(Some(name.to_string())),
                History::Broken => Err(StorageError::Unavailable("no database access".into())),
            }
        }
    }

    fn hafizh() -> Identity {
        Identity::Authenticated {
            user_id: Uuid::nil(),
            username: "hafizh".into(),
        }
    }

    fn json_body(raw: &str) -> CapturedBody {
        CapturedBody::new(raw.as_bytes(), Some("application/json".into()))
    }

    fn cache(name: &str) -> SessionCache {
        SessionCache::new(Some(name.into()))
    }

    #[tokio::test]
    async fn provisional_follows_fallback_chain() {
        let anon = Identity::Anonymous;
        assert_eq!(
            provisional_username(&hafizh(), &cache("alice"), &History::Known("prev")).await,
            "hafizh"
        );
        assert_eq!(
            provisional_username(&anon, &cache("alice"), &History::Known("prev")).await,
            "alice"
        );
        assert_eq!(
            provisional_username(&anon, &SessionCache::default(), &History::Known("prev")).await,
            "prev"
        );
        assert_eq!(
            provisional_username(&anon, &SessionCache::default(), &History::Empty).await,
            ANONYMOUS
        );
    }

    #[tokio::test]
    async fn provisional_treats_storage_errors_as_not_found() {
        let name =
            provisional_username(&Identity::Anonymous, &cache(""), &History::Broken).await;
        assert_eq!(name, ANONYMOUS);
    }

    #[test]
    fn login_username_priority() {
        assert_eq!(login_username(&json_body(r#"{"username":"a","email":"b"}"#)), "a");
        assert_eq!(login_username(&json_body(r#"{"email":"b"}"#)), "b");
        assert_eq!(login_username(&json_body(r#"{"user":"u","email":""}"#)), "u");
        let form = CapturedBody::new(
            &b"username=c&password=x"[..],
            Some("application/x-www-form-urlencoded; charset=utf-8".into()),
        );
        assert_eq!(login_username(&form), "c");
        let email_form = CapturedBody::new(
            &b"email=d%40example.com"[..],
            Some("application/x-www-form-urlencoded".into()),
        );
        assert_eq!(login_username(&email_form), "d@example.com");
    }

    #[test]
    fn login_username_renders_truthy_scalars() {
        assert_eq!(login_username(&json_body(r#"{"username":42}"#)), "42");
        assert_eq!(login_username(&json_body(r#"{"username":0,"email":"b"}"#)), "b");
        assert_eq!(login_username(&json_body(r#"{"username":false,"user":true}"#)), "True");
        assert_eq!(login_username(&json_body(r#"{"username":null,"email":[]}"#)), "");
    }

    #[test]
    fn login_username_tolerates_garbage() {
        assert_eq!(login_username(&json_body("{not json")), "");
        assert_eq!(login_username(&json_body("[1,2,3]")), "");
        assert_eq!(login_username(&CapturedBody::default()), "");
    }

    #[tokio::test]
    async fn login_writes_extracted_name_to_session() {
        let res = resolve_final(
            EventKind::UserLogin,
            &Identity::Anonymous,
            "anonymous",
            &SessionCache::default(),
            &json_body(r#"{"username":"alice"}"#),
            &History::Empty,
        )
        .await;
        assert_eq!(res.username, "alice");
        assert_eq!(res.identity, Identity::Anonymous);
        assert_eq!(res.apply(SessionCache::default()).username(), Some("alice"));
    }

    #[tokio::test]
    async fn login_without_name_leaves_session_alone() {
        let res = resolve_final(
            EventKind::UserLogin,
            &Identity::Anonymous,
            "prev",
            &cache("prev"),
            &json_body("{}"),
            &History::Empty,
        )
        .await;
        assert_eq!(res.username, "");
        assert_eq!(res.session_write, None);
        assert_eq!(res.apply(cache("prev")).username(), Some("prev"));
    }

    #[tokio::test]
    async fn ocr_upload_uses_provisional_and_writes_it_back() {
        let res = resolve_final(
            EventKind::OcrUploaded,
            &Identity::Anonymous,
            "precomputed-stub-user",
            &cache("precomputed-stub-user"),
            &CapturedBody::default(),
            &History::Empty,
        )
        .await;
        assert_eq!(res.username, "precomputed-stub-user");
        assert_eq!(res.session_write.as_deref(), Some("precomputed-stub-user"));

        let fallback = resolve_final(
            EventKind::OcrUploaded,
            &Identity::Anonymous,
            "",
            &SessionCache::default(),
            &CapturedBody::default(),
            &History::Known("prevuser"),
        )
        .await;
        assert_eq!(fallback.username, "prevuser");
    }

    #[tokio::test]
    async fn authenticated_user_always_wins() {
        for kind in [
            EventKind::OcrUploaded,
            EventKind::FeatureUsed,
            EventKind::DashboardViewed,
        ] {
            let res = resolve_final(
                kind,
                &hafizh(),
                "someone-else",
                &cache("someone-else"),
                &CapturedBody::default(),
                &History::Known("prev"),
            )
            .await;
            assert_eq!(res.username, "hafizh");
            assert_eq!(res.identity, hafizh());
            assert_eq!(res.session_write.as_deref(), Some("hafizh"));
        }
    }

    #[tokio::test]
    async fn anonymous_feature_prefers_session_then_provisional() {
        let from_session = resolve_final(
            EventKind::FeatureUsed,
            &Identity::Anonymous,
            "prov",
            &cache("alice"),
            &CapturedBody::default(),
            &History::Known("prev"),
        )
        .await;
        assert_eq!(from_session.username, "alice");
        assert_eq!(from_session.session_write, None);

        let from_provisional = resolve_final(
            EventKind::FeatureUsed,
            &Identity::Anonymous,
            "prov",
            &SessionCache::default(),
            &CapturedBody::default(),
            &History::Known("prev"),
        )
        .await;
        assert_eq!(from_provisional.username, "prov");

        let from_history = resolve_final(
            EventKind::FeatureUsed,
            &Identity::Anonymous,
            "",
            &SessionCache::default(),
            &CapturedBody::default(),
            &History::Broken,
        )
        .await;
        assert_eq!(from_history.username, ANONYMOUS);
    }
}
