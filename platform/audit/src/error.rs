use thiserror::Error;

/// Failure of the backing activity store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
    #[error("activity store unavailable: {0}")]
    Unavailable(String),
}
