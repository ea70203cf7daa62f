use rollcall_core::AttendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt embedding {position} for {usn}: {reason}")]
    CorruptEmbedding {
        usn: String,
        position: i64,
        reason: String,
    },
}

impl From<StoreError> for AttendError {
    fn from(err: StoreError) -> Self {
        AttendError::store(err)
    }
}
