#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

pub type StorageResult<T> = Result<T, StorageError>;
