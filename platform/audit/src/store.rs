use async_trait::async_trait;
use platform_db::{DbPool, NewActivityLog, activity_logs};

use crate::{ActivityLog, StorageError};

/// Source of the "last known identity" fallback.
#[async_trait]
pub trait IdentityHistory: Send + Sync {
    async fn last_known_username(&self) -> Result<Option<String>, StorageError>;
}

/// Append-only activity log storage.
#[async_trait]
pub trait ActivityStore: IdentityHistory {
    async fn append(&self, record: NewActivityLog) -> Result<ActivityLog, StorageError>;
}

/// [`ActivityStore`] over the shared sea-orm pool.
#[derive(Clone, Debug)]
pub struct DbActivityStore {
    pool: DbPool,
}

impl DbActivityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityHistory for DbActivityStore {
    async fn last_known_username(&self) -> Result<Option<String>, StorageError> {
        Ok(activity_logs::last_known_username(&self.pool).await?)
    }
}

#[async_trait]
impl ActivityStore for DbActivityStore {
    async fn append(&self, record: NewActivityLog) -> Result<ActivityLog, StorageError> {
        Ok(activity_logs::insert_activity_log(&self.pool, record).await?)
    }
}
