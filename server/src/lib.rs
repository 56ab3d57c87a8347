//! HTTP surface of the audit trail: session and audit layers, login/logout,
//! and the read-only log query API over REST and GraphQL.

pub mod auth;
pub mod config;
pub mod graphql;
pub mod http;
pub mod middleware;
pub mod query;
pub mod session;

pub use config::AppConfig;
pub use http::{AppState, build_router, build_router_with};
