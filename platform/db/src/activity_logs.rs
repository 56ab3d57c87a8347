use chrono::{DateTime, Utc};
use entity::activity_logs::{self, EventKind};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Select,
    prelude::DateTimeWithTimeZone,
    sea_query::{Alias, Expr, Func, LikeExpr, SimpleExpr},
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::DbPool;

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 200;

const HISTORY_BATCH: u64 = 50;
/// Older candidates than `HISTORY_BATCH * HISTORY_WINDOW_BATCHES` rows are never scanned.
const HISTORY_WINDOW_BATCHES: u64 = 4;

/// Fields of a record about to be appended. `created_at` is stamped by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewActivityLog {
    pub acting_user_id: Option<Uuid>,
    pub username: String,
    pub event_type: EventKind,
    pub target_app: String,
    pub target_model: String,
    pub target_id: String,
    pub target_repr: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub request_id: String,
    pub metadata: Value,
}

pub async fn insert_activity_log(
    db: &DbPool,
    record: NewActivityLog,
) -> Result<activity_logs::Model, sea_orm::DbErr> {
    let created_at: DateTimeWithTimeZone = Utc::now().into();
    activity_logs::ActiveModel {
        acting_user_id: Set(record.acting_user_id),
        username: Set(record.username),
        event_type: Set(record.event_type),
        created_at: Set(created_at),
        target_app: Set(record.target_app),
        target_model: Set(record.target_model),
        target_id: Set(record.target_id),
        target_repr: Set(record.target_repr),
        ip_address: Set(record.ip_address),
        user_agent: Set(record.user_agent),
        request_id: Set(record.request_id),
        metadata: Set(record.metadata),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn find_activity_log(
    db: &DbPool,
    id: i64,
) -> Result<Option<activity_logs::Model>, sea_orm::DbErr> {
    activity_logs::Entity::find_by_id(id).one(db).await
}

/// Username of the newest login or OCR upload whose metadata carries a
/// non-null `username`. An empty string on that record yields `None`.
/// Only the most recent candidates are scanned.
pub async fn last_known_username(db: &DbPool) -> Result<Option<String>, sea_orm::DbErr> {
    scan_history(db, HISTORY_BATCH, HISTORY_WINDOW_BATCHES).await
}

async fn scan_history(
    db: &DbPool,
    batch_size: u64,
    max_batches: u64,
) -> Result<Option<String>, sea_orm::DbErr> {
    let paginator = activity_logs::Entity::find()
        .filter(
            activity_logs::Column::EventType
                .is_in([EventKind::UserLogin, EventKind::OcrUploaded]),
        )
        .order_by_desc(activity_logs::Column::CreatedAt)
        .order_by_desc(activity_logs::Column::Id)
        .paginate(db, batch_size);
    for page in 0..max_batches {
        let batch = paginator.fetch_page(page).await?;
        if batch.is_empty() {
            return Ok(None);
        }
        for row in &batch {
            match row.metadata.get("username") {
                Some(Value::Null) | None => continue,
                Some(Value::String(name)) if name.is_empty() => return Ok(None),
                Some(Value::String(name)) => return Ok(Some(name.clone())),
                Some(other) => return Ok(Some(other.to_string())),
            }
        }
    }
    debug!(
        rows = batch_size * max_batches,
        "no username within the history window"
    );
    Ok(None)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivityLogOrdering {
    CreatedAtAsc,
    #[default]
    CreatedAtDesc,
    IdAsc,
    IdDesc,
}

impl ActivityLogOrdering {
    /// Parses `created_at`, `-created_at`, `id`, `-id`. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "created_at" => Some(Self::CreatedAtAsc),
            "-created_at" => Some(Self::CreatedAtDesc),
            "id" => Some(Self::IdAsc),
            "-id" => Some(Self::IdDesc),
            _ => None,
        }
    }

    fn apply(self, select: Select<activity_logs::Entity>) -> Select<activity_logs::Entity> {
        use activity_logs::Column;
        match self {
            Self::CreatedAtAsc => select
                .order_by_asc(Column::CreatedAt)
                .order_by_asc(Column::Id),
            Self::CreatedAtDesc => select
                .order_by_desc(Column::CreatedAt)
                .order_by_desc(Column::Id),
            Self::IdAsc => select.order_by_asc(Column::Id),
            Self::IdDesc => select.order_by_desc(Column::Id),
        }
    }
}

/// Filter set for the read-only log listing.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityLogQuery {
    pub username: Option<String>,
    pub event_type: Option<EventKind>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub ordering: ActivityLogOrdering,
    pub page: u64,
    pub page_size: u64,
}

impl Default for ActivityLogQuery {
    fn default() -> Self {
        Self {
            username: None,
            event_type: None,
            date_from: None,
            date_to: None,
            search: None,
            ordering: ActivityLogOrdering::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ActivityLogQuery {
    pub fn page(&self) -> u64 {
        self.page.max(1)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    fn condition(&self) -> Condition {
        use activity_logs::Column;
        let mut cond = Condition::all();
        if let Some(username) = &self.username {
            cond = cond.add(Column::Username.eq(username.as_str()));
        }
        if let Some(kind) = self.event_type {
            cond = cond.add(Column::EventType.eq(kind));
        }
        if let Some(from) = self.date_from {
            cond = cond.add(Column::CreatedAt.gte(DateTimeWithTimeZone::from(from)));
        }
        if let Some(to) = self.date_to {
            cond = cond.add(Column::CreatedAt.lte(DateTimeWithTimeZone::from(to)));
        }
        if let Some(terms) = self.search.as_deref() {
            cond = cond.add(search_condition(terms));
        }
        cond
    }
}

/// Every whitespace or comma separated word must match at least one field.
fn search_condition(terms: &str) -> Condition {
    terms
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|word| !word.is_empty())
        .fold(Condition::all(), |cond, word| cond.add(word_condition(word)))
}

fn word_condition(word: &str) -> Condition {
    use activity_logs::Column;
    let pattern = format!("%{}%", escape_like(&word.to_lowercase()));
    let lowered = |expr: SimpleExpr| {
        Expr::expr(Func::lower(expr)).like(LikeExpr::new(pattern.clone()).escape('\\'))
    };
    Condition::any()
        .add(lowered(Expr::col(Column::Username).into()))
        .add(lowered(Expr::col(Column::EventType).into()))
        .add(lowered(Expr::col(Column::TargetRepr).into()))
        .add(lowered(
            Func::cast_as(Expr::col(Column::Metadata), Alias::new("text")).into(),
        ))
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActivityLogPage {
    pub count: u64,
    pub page: u64,
    pub page_size: u64,
    pub num_pages: u64,
    pub results: Vec<activity_logs::Model>,
}

impl ActivityLogPage {
    pub fn has_next(&self) -> bool {
        self.page < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    /// Pages past the end are reported so callers can answer "not found";
    /// page 1 of an empty listing is always valid.
    pub fn is_out_of_range(&self) -> bool {
        self.page > 1 && self.page > self.num_pages
    }
}

pub async fn search_activity_logs(
    db: &DbPool,
    query: &ActivityLogQuery,
) -> Result<ActivityLogPage, sea_orm::DbErr> {
    let page = query.page();
    let page_size = query.page_size();
    let select = query
        .ordering
        .apply(activity_logs::Entity::find().filter(query.condition()));
    let paginator = select.paginate(db, page_size);
    let count = paginator.num_items().await?;
    let num_pages = count.div_ceil(page_size).max(1);
    let results = if page > num_pages {
        Vec::new()
    } else {
        paginator.fetch_page(page - 1).await?
    };
    Ok(ActivityLogPage {
        count,
        page,
        page_size,
        num_pages,
        results,
    })
}
