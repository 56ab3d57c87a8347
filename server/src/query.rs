//! Parameter parsing and response shapes for the activity log listing.

use chrono::{DateTime, NaiveDate, Utc};
use entity::activity_logs;
use platform_api::{ApiError, ApiResult};
use platform_db::{ActivityLogOrdering, ActivityLogPage, ActivityLogQuery, DEFAULT_PAGE_SIZE};
use platform_audit::EventKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw query-string filters. Blank values count as absent.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogListParams {
    pub username: Option<String>,
    pub event_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

impl LogListParams {
    pub fn into_query(self) -> ApiResult<ActivityLogQuery> {
        let event_type = present(self.event_type)
            .map(|raw| {
                raw.parse::<EventKind>()
                    .map_err(|err| ApiError::invalid(format!("event_type: {err}")))
            })
            .transpose()?;
        let date_from = present(self.date_from)
            .map(|raw| parse_bound("date_from", &raw))
            .transpose()?;
        let date_to = present(self.date_to)
            .map(|raw| parse_bound("date_to", &raw))
            .transpose()?;
        let page = match present(self.page) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|page| *page >= 1)
                .ok_or_else(|| ApiError::invalid("page must be a positive integer"))?,
            None => 1,
        };
        let page_size = present(self.page_size)
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|size| *size >= 1)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let ordering = present(self.ordering)
            .and_then(|raw| ActivityLogOrdering::parse(&raw))
            .unwrap_or_default();

        Ok(ActivityLogQuery {
            username: present(self.username),
            event_type,
            date_from,
            date_to,
            search: present(self.search),
            ordering,
            page,
            page_size,
        })
    }
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_bound(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ApiError::invalid(format!("{field}: expected ISO-8601 date or datetime")))
}

#[derive(Clone, Debug, Serialize)]
pub struct ActivityLogView {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub event_type: EventKind,
    pub username: String,
    pub target_app: String,
    pub target_model: String,
    pub target_id: String,
    pub target_repr: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub request_id: String,
    pub metadata: Value,
}

impl From<activity_logs::Model> for ActivityLogView {
    fn from(row: activity_logs::Model) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at.with_timezone(&Utc),
            event_type: row.event_type,
            username: row.username,
            target_app: row.target_app,
            target_model: row.target_model,
            target_id: row.target_id,
            target_repr: row.target_repr,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            request_id: row.request_id,
            metadata: row.metadata,
        }
    }
}

/// Paginated listing envelope; `next`/`previous` are page numbers.
#[derive(Clone, Debug, Serialize)]
pub struct LogPageBody {
    pub count: u64,
    pub next: Option<u64>,
    pub previous: Option<u64>,
    pub results: Vec<ActivityLogView>,
}

impl From<ActivityLogPage> for LogPageBody {
    fn from(page: ActivityLogPage) -> Self {
        Self {
            count: page.count,
            next: page.has_next().then_some(page.page + 1),
            previous: page.has_previous().then(|| page.page - 1),
            results: page.results.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn params() -> LogListParams {
        LogListParams::default()
    }

    #[test]
    fn empty_params_use_defaults() {
        let query = params().into_query().expect("query");
        assert_eq!(query, ActivityLogQuery::default());
    }

    #[test]
    fn filters_are_parsed() {
        let query = LogListParams {
            username: Some(" alice ".into()),
            event_type: Some("USER_LOGIN".into()),
            date_from: Some("2024-01-02".into()),
            date_to: Some("2024-01-03T10:00:00+02:00".into()),
            search: Some("".into()),
            ordering: Some("id".into()),
            page: Some("3".into()),
            page_size: Some("10".into()),
        }
        .into_query()
        .expect("query");
        assert_eq!(query.username.as_deref(), Some("alice"));
        assert_eq!(query.event_type, Some(EventKind::UserLogin));
        assert_eq!(
            query.date_from,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(
            query.date_to,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap())
        );
        assert_eq!(query.search, None);
        assert_eq!(query.ordering, ActivityLogOrdering::IdAsc);
        assert_eq!((query.page, query.page_size), (3, 10));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for bad in [
            LogListParams {
                event_type: Some("NOT_A_KIND".into()),
                ..params()
            },
            LogListParams {
                date_from: Some("yesterday".into()),
                ..params()
            },
            LogListParams {
                page: Some("0".into()),
                ..params()
            },
            LogListParams {
                page: Some("two".into()),
                ..params()
            },
        ] {
            let err = bad.into_query().expect_err("rejected");
            assert!(matches!(err, ApiError::InvalidInput(_)), "{err:?}");
        }
    }

    #[test]
    fn lenient_values_fall_back() {
        let query = LogListParams {
            ordering: Some("-username".into()),
            page_size: Some("lots".into()),
            ..params()
        }
        .into_query()
        .expect("query");
        assert_eq!(query.ordering, ActivityLogOrdering::CreatedAtDesc);
        assert_eq!(query.page_size, DEFAULT_PAGE_SIZE);
    }
}
