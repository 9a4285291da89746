use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use conduit_core::mcp_config::McpConfig;

use crate::database::Database;
use crate::error::StoreError;

/// A named set of MCP server connections saved for an identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpConfigRecord {
    pub id: String,
    pub identity: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub config: McpConfig,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, identity, name, description, connections, created_at, updated_at";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(McpConfigRecord, String)> {
    Ok((
        McpConfigRecord {
            id: row.get(0)?,
            identity: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            config: McpConfig::default(),
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        },
        row.get(4)?,
    ))
}

fn decode((mut record, body): (McpConfigRecord, String)) -> Result<McpConfigRecord, StoreError> {
    record.config.connections =
        serde_json::from_str(&body).map_err(|e| StoreError::CorruptRow {
            table: "mcp_configs",
            column: "connections",
            detail: e.to_string(),
        })?;
    Ok(record)
}

pub struct ConfigRepo {
    db: Database,
}

impl ConfigRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, description, config), fields(servers = config.connections.len()))]
    pub fn create(
        &self,
        identity: &str,
        name: &str,
        description: Option<&str>,
        config: &McpConfig,
    ) -> Result<McpConfigRecord, StoreError> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(&config.connections)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mcp_configs (id, identity, name, description, connections, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, identity, name, description, body, now],
            )?;
            Ok(())
        })?;

        self.get(&id, identity)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &str, identity: &str) -> Result<McpConfigRecord, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM mcp_configs WHERE id = ?1 AND identity = ?2"),
                    [id, identity],
                    read_row,
                )
                .optional()?)
        })?;
        decode(row.ok_or_else(|| StoreError::NotFound(format!("config '{id}'")))?)
    }

    /// All configs for an identity, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self, identity: &str) -> Result<Vec<McpConfigRecord>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM mcp_configs WHERE identity = ?1 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([identity], read_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })?;
        rows.into_iter().map(decode).collect()
    }

    /// Replace name, description and connections of an existing config.
    #[instrument(skip(self, description, config))]
    pub fn update(
        &self,
        id: &str,
        identity: &str,
        name: &str,
        description: Option<&str>,
        config: &McpConfig,
    ) -> Result<McpConfigRecord, StoreError> {
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(&config.connections)?;

        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE mcp_configs SET name = ?3, description = ?4, connections = ?5, updated_at = ?6
                 WHERE id = ?1 AND identity = ?2",
                rusqlite::params![id, identity, name, description, body, now],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("config '{id}'")));
        }
        self.get(id, identity)
    }

    /// Returns whether a config was removed.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str, identity: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM mcp_configs WHERE id = ?1 AND identity = ?2",
                [id, identity],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::mcp_config::{McpServerConfig, McpTransport};

    fn repo() -> ConfigRepo {
        ConfigRepo::new(Database::in_memory().unwrap())
    }

    fn weather() -> McpConfig {
        McpConfig {
            connections: vec![McpServerConfig {
                name: "weather".into(),
                description: Some("Forecasts".into()),
                transport: McpTransport::StreamableHttp {
                    url: "http://localhost:9000/mcp".into(),
                },
            }],
        }
    }

    #[test]
    fn create_then_get() {
        let repo = repo();
        let created = repo
            .create("alice", "Home", Some("daily tools"), &weather())
            .unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.config, weather());

        let loaded = repo.get(&created.id, "alice").unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn identity_scopes_configs() {
        let repo = repo();
        let created = repo.create("alice", "Home", None, &weather()).unwrap();
        assert!(matches!(
            repo.get(&created.id, "bob"),
            Err(StoreError::NotFound(_))
        ));
        assert!(repo.list("bob").unwrap().is_empty());
        assert!(!repo.delete(&created.id, "bob").unwrap());
    }

    #[test]
    fn update_replaces_connections() {
        let repo = repo();
        let created = repo.create("alice", "Home", None, &weather()).unwrap();

        let updated = repo
            .update(&created.id, "alice", "Work", Some("office"), &McpConfig::default())
            .unwrap();
        assert_eq!(updated.name, "Work");
        assert_eq!(updated.description.as_deref(), Some("office"));
        assert!(updated.config.connections.is_empty());
        assert_eq!(updated.created_at, created.created_at);

        assert!(matches!(
            repo.update("missing", "alice", "x", None, &weather()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_and_delete() {
        let repo = repo();
        let a = repo.create("alice", "A", None, &weather()).unwrap();
        repo.create("alice", "B", None, &McpConfig::default()).unwrap();

        let names: Vec<_> = repo
            .list("alice")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);

        assert!(repo.delete(&a.id, "alice").unwrap());
        assert!(!repo.delete(&a.id, "alice").unwrap());
        assert_eq!(repo.list("alice").unwrap().len(), 1);
    }

    #[test]
    fn record_serializes_connections_inline() {
        let repo = repo();
        let created = repo.create("alice", "Home", None, &weather()).unwrap();
        let value = serde_json::to_value(&created).unwrap();
        assert_eq!(value["connections"][0]["name"], "weather");
        assert!(value.get("description").is_none());
    }
}
