use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The named record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cannot prepare database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database at schema version {found}, this build understands up to {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}
