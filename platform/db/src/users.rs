use chrono::Utc;
use entity::users;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::DbPool;

pub async fn find_user(db: &DbPool, id: Uuid) -> Result<Option<users::Model>, sea_orm::DbErr> {
    users::Entity::find_by_id(id).one(db).await
}

/// Looks a user up by username first, then by email.
pub async fn find_user_by_login(
    db: &DbPool,
    login: &str,
) -> Result<Option<users::Model>, sea_orm::DbErr> {
    let by_username = users::Entity::find()
        .filter(users::Column::Username.eq(login))
        .one(db)
        .await?;
    if by_username.is_some() {
        return Ok(by_username);
    }
    users::Entity::find()
        .filter(users::Column::Email.eq(login))
        .one(db)
        .await
}

pub async fn create_user(
    db: &DbPool,
    username: &str,
    email: &str,
    password_hash: String,
) -> Result<users::Model, sea_orm::DbErr> {
    users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
}

pub async fn delete_user(db: &DbPool, id: Uuid) -> Result<(), sea_orm::DbErr> {
    users::Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}
