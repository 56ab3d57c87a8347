use async_graphql::{
    Context, EmptyMutation, EmptySubscription, ErrorExtensions, InputObject, Json, Object, Schema,
    SimpleObject,
};
use chrono::{DateTime, Utc};
use entity::activity_logs;
use platform_api::{ApiError, ApiResult};
use platform_audit::{EventKind, Identity};
use platform_db::{DbPool, activity_logs as log_store};
use sea_orm::Iterable;
use serde::Serialize;
use tracing::instrument;

use crate::query::LogListParams;

pub type SchemaType = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

pub fn build_schema(pool: DbPool) -> SchemaType {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(pool)
        .finish()
}

#[derive(Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    #[instrument(name = "graphql.health", skip_all)]
    async fn health(&self) -> ApiResult<HealthPayload> {
        Ok(HealthPayload { ok: true })
    }

    #[instrument(name = "graphql.version", skip_all)]
    async fn version(&self) -> ApiResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    /// Username of the signed-in caller, if any.
    #[instrument(name = "graphql.viewer", skip_all)]
    async fn viewer(&self, ctx: &Context<'_>) -> Option<String> {
        ctx.data_opt::<Identity>()
            .filter(|identity| identity.is_authenticated())
            .and_then(|identity| identity.username().map(str::to_string))
    }

    #[instrument(name = "graphql.event_kinds", skip_all)]
    async fn event_kinds(&self) -> Vec<EventKindPayload> {
        EventKind::iter()
            .map(|kind| EventKindPayload {
                value: kind.as_str().to_string(),
                label: kind.label().to_string(),
            })
            .collect()
    }

    #[instrument(name = "graphql.activity_logs", skip_all)]
    async fn activity_logs(
        &self,
        ctx: &Context<'_>,
        filter: Option<ActivityLogFilter>,
        page: Option<i32>,
        page_size: Option<i32>,
        ordering: Option<String>,
    ) -> async_graphql::Result<ActivityLogConnection> {
        let pool = ctx.data::<DbPool>()?;
        let filter = filter.unwrap_or_default();
        let params = LogListParams {
            username: filter.username,
            event_type: filter.event_type,
            date_from: filter.date_from,
            date_to: filter.date_to,
            search: filter.search,
            ordering,
            page: page.map(|p| p.to_string()),
            page_size: page_size.map(|s| s.to_string()),
        };
        search_logs(pool, params).await.map_err(|err| err.extend())
    }
}

async fn search_logs(pool: &DbPool, params: LogListParams) -> ApiResult<ActivityLogConnection> {
    let query = params.into_query()?;
    let page = log_store::search_activity_logs(pool, &query).await?;
    if page.is_out_of_range() {
        return Err(ApiError::NotFound);
    }
    Ok(ActivityLogConnection {
        count: page.count,
        page: page.page,
        page_size: page.page_size,
        has_next: page.has_next(),
        results: page.results.into_iter().map(Into::into).collect(),
    })
}

#[derive(Clone, Debug, SimpleObject, Serialize)]
pub struct HealthPayload {
    pub ok: bool,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct EventKindPayload {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Default, InputObject)]
pub struct ActivityLogFilter {
    pub username: Option<String>,
    pub event_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct ActivityLogNode {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub username: String,
    pub target_app: String,
    pub target_model: String,
    pub target_id: String,
    pub target_repr: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub request_id: String,
    pub metadata: Json<serde_json::Value>,
}

impl From<activity_logs::Model> for ActivityLogNode {
    fn from(row: activity_logs::Model) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at.with_timezone(&Utc),
            event_type: row.event_type.as_str().to_string(),
            username: row.username,
            target_app: row.target_app,
            target_model: row.target_model,
            target_id: row.target_id,
            target_repr: row.target_repr,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            request_id: row.request_id,
            metadata: Json(row.metadata),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct ActivityLogConnection {
    pub count: u64,
    pub page: u64,
    pub page_size: u64,
    pub has_next: bool,
    pub results: Vec<ActivityLogNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Request;
    use sea_orm::{ConnectOptions, Database};
    use serde_json::json;

    async fn schema() -> SchemaType {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let pool = Database::connect(options).await.expect("sqlite");
        build_schema(pool)
    }

    #[tokio::test]
    async fn health_query_returns_ok() {
        let schema = schema().await;
        let response = schema.execute(Request::new("{ health { ok } }")).await;
        assert!(response.errors.is_empty());
        let body = response.data.into_json().unwrap();
        assert_eq!(body, json!({"health": {"ok": true}}));
    }

    #[tokio::test]
    async fn event_kinds_lists_every_kind() {
        let schema = schema().await;
        let response = schema
            .execute(Request::new("{ eventKinds { value label } }"))
            .await;
        assert!(response.errors.is_empty());
        let body = response.data.into_json().unwrap();
        let kinds = body["eventKinds"].as_array().unwrap();
        assert_eq!(kinds.len(), 11);
        assert_eq!(kinds[0], json!({"value": "USER_LOGIN", "label": "User login"}));
    }

    #[tokio::test]
    async fn bad_filter_is_reported_as_invalid_input() {
        let schema = schema().await;
        let response = schema
            .execute(Request::new(
                r#"{ activityLogs(filter: { eventType: "NOPE" }) { count } }"#,
            ))
            .await;
        assert_eq!(response.errors.len(), 1);
        let code = response.errors[0]
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("INVALID_INPUT")));
    }

    #[tokio::test]
    async fn viewer_reflects_request_identity() {
        let schema = schema().await;
        let anonymous = schema
            .execute(Request::new("{ viewer }").data(Identity::Anonymous))
            .await;
        assert_eq!(anonymous.data.into_json().unwrap(), json!({"viewer": null}));

        let signed_in = schema
            .execute(Request::new("{ viewer }").data(Identity::Authenticated {
                user_id: uuid::Uuid::nil(),
                username: "alice".into(),
            }))
            .await;
        assert_eq!(signed_in.data.into_json().unwrap(), json!({"viewer": "alice"}));
    }
}
