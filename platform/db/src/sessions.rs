use chrono::{DateTime, Utc};
use entity::sessions;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, prelude::DateTimeWithTimeZone};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::DbPool;

/// Snapshot of a session row as the HTTP layer sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub data: Map<String, Value>,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<sessions::Model> for SessionRecord {
    fn from(model: sessions::Model) -> Self {
        let data = match model.data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: model.id,
            user_id: model.user_id,
            data,
            expires_at: model.expires_at.with_timezone(&Utc),
            ip: model.ip,
            user_agent: model.user_agent,
        }
    }
}

/// Loads a live session; expired rows are deleted and reported as missing.
pub async fn load_session(db: &DbPool, id: Uuid) -> Result<Option<SessionRecord>, sea_orm::DbErr> {
    let Some(model) = sessions::Entity::find_by_id(id).one(db).await? else {
        return Ok(None);
    };
    if model.expires_at.with_timezone(&Utc) <= Utc::now() {
        sessions::Entity::delete_by_id(id).exec(db).await?;
        return Ok(None);
    }
    Ok(Some(model.into()))
}

/// Inserts a new session row or overwrites the mutable columns of an existing one.
pub async fn save_session(
    db: &DbPool,
    record: &SessionRecord,
    is_new: bool,
) -> Result<(), sea_orm::DbErr> {
    let expires_at: DateTimeWithTimeZone = record.expires_at.into();
    let mut model = sessions::ActiveModel {
        id: Set(record.id),
        user_id: Set(record.user_id),
        data: Set(Value::Object(record.data.clone())),
        expires_at: Set(expires_at),
        ip: Set(record.ip.clone()),
        user_agent: Set(record.user_agent.clone()),
        ..Default::default()
    };
    if is_new {
        model.created_at = Set(Utc::now().into());
        model.insert(db).await?;
    } else {
        model.update(db).await?;
    }
    Ok(())
}

pub async fn delete_session(db: &DbPool, id: Uuid) -> Result<(), sea_orm::DbErr> {
    sessions::Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}
