use entity::{activity_logs, users};
use platform_db::NewActivityLog;
use serde_json::{Map, Value};

use crate::{ActivityLog, ActivityStore, EventKind, Identity, StorageError};

/// A persisted object an activity can point at.
pub trait AuditTarget: std::fmt::Display + Sync {
    fn app_label(&self) -> &'static str;
    fn model_name(&self) -> &'static str;
    fn target_pk(&self) -> String;
}

impl AuditTarget for users::Model {
    fn app_label(&self) -> &'static str {
        "accounts"
    }

    fn model_name(&self) -> &'static str {
        "user"
    }

    fn target_pk(&self) -> String {
        self.id.to_string()
    }
}

impl AuditTarget for activity_logs::Model {
    fn app_label(&self) -> &'static str {
        "audittrail"
    }

    fn model_name(&self) -> &'static str {
        "activitylog"
    }

    fn target_pk(&self) -> String {
        self.id.to_string()
    }
}

/// Client details copied onto the log row.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub request_id: String,
}

pub struct ActivityEntry<'a> {
    pub identity: Identity,
    pub event_kind: EventKind,
    pub target: Option<&'a dyn AuditTarget>,
    pub request: Option<&'a RequestContext>,
    pub metadata: Option<Map<String, Value>>,
}

impl<'a> ActivityEntry<'a> {
    pub fn new(identity: Identity, event_kind: EventKind) -> Self {
        Self {
            identity,
            event_kind,
            target: None,
            request: None,
            metadata: None,
        }
    }

    pub fn target(mut self, target: &'a dyn AuditTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn request(mut self, request: &'a RequestContext) -> Self {
        self.request = Some(request);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

fn build_record(entry: ActivityEntry<'_>) -> NewActivityLog {
    let mut metadata = entry.metadata.unwrap_or_default();
    let (acting_user_id, username) = match entry.identity {
        Identity::Authenticated { user_id, username } => (Some(user_id), username),
        Identity::External { username } => {
            let slot = metadata.entry("username").or_insert(Value::Null);
            if slot.is_null() {
                *slot = Value::String(username.clone());
            }
            (None, username)
        }
        Identity::Anonymous => {
            let named = metadata
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (None, named)
        }
    };

    let (target_app, target_model, target_id, target_repr) = match entry.target {
        Some(target) => (
            target.app_label().to_string(),
            target.model_name().to_string(),
            target.target_pk(),
            target.to_string(),
        ),
        None => Default::default(),
    };

    let request = entry.request.cloned().unwrap_or_default();

    NewActivityLog {
        acting_user_id,
        username,
        event_type: entry.event_kind,
        target_app,
        target_model,
        target_id,
        target_repr,
        ip_address: request.ip_address,
        user_agent: request.user_agent,
        request_id: request.request_id,
        metadata: Value::Object(metadata),
    }
}

/// Appends one activity row. Storage failures surface to the caller.
pub async fn log_activity(
    store: &dyn ActivityStore,
    entry: ActivityEntry<'_>,
) -> Result<ActivityLog, StorageError> {
    store.append(build_record(entry)).await
}
