#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A required transfer file header field was not found.
    #[error("transfer file missing header field {field:?}")]
    Metadata { field: &'static str },

    #[error("invalid fileopen_time {value:?}")]
    Timestamp { value: String },

    /// Serializing the checkpoint failed.
    #[error("checkpoint encode: {0}")]
    Checkpoint(#[from] serde_json::Error),

    /// The temporary checkpoint could not be renamed over the previous one.
    #[error("checkpoint persist: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, Error>;
