//! Schema migrations, tracked with `PRAGMA user_version`.

/// Applied in order; entry `i` moves the database to version `i + 1`.
pub const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS chat_histories (
    identity TEXT NOT NULL,
    title TEXT NOT NULL,
    messages TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (identity, title)
);

CREATE INDEX IF NOT EXISTS idx_chat_histories_created
    ON chat_histories(identity, created_at);
"#, r#"
CREATE TABLE IF NOT EXISTS mcp_configs (
    id TEXT PRIMARY KEY,
    identity TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    connections TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mcp_configs_identity
    ON mcp_configs(identity, created_at);
"#];

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}
