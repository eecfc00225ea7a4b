#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
}
