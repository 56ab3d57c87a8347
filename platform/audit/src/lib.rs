//! Audit trail core.
//!
//! Requests are classified into [`EventKind`]s by path and method, the acting
//! identity is resolved through a fallback chain (authenticated user, session
//! cache, request payload, last known identity, `"anonymous"`), and one
//! [`ActivityLog`] row is appended per successful audited request.

pub mod classify;
pub mod error;
pub mod identity;
pub mod service;
pub mod store;

pub use classify::classify;
pub use entity::activity_logs::{EventKind, Model as ActivityLog};
pub use error::StorageError;
pub use identity::{
    ANONYMOUS, AUDIT_SESSION_KEY, CapturedBody, Identity, Resolution, SessionCache,
    provisional_username, resolve_final,
};
pub use service::{ActivityEntry, AuditTarget, RequestContext, log_activity};
pub use store::{ActivityStore, DbActivityStore, IdentityHistory};
