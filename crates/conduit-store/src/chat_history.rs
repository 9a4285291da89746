use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use conduit_core::messages::ChatMessage;

use crate::database::Database;
use crate::error::StoreError;

/// A saved conversation, keyed by (identity, title).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryRecord {
    pub identity: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing entry without the message bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistorySummary {
    pub title: String,
    pub message_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ChatHistoryRepo {
    db: Database,
}

impl ChatHistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the history stored under `title`.
    /// The original `created_at` survives a replace.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub fn save(
        &self,
        title: &str,
        identity: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatHistoryRecord, StoreError> {
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(messages)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_histories (identity, title, messages, message_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(identity, title) DO UPDATE SET
                    messages = excluded.messages,
                    message_count = excluded.message_count,
                    updated_at = excluded.updated_at",
                rusqlite::params![identity, title, body, messages.len() as u32, now],
            )?;
            Ok(())
        })?;

        self.get(title, identity)
    }

    #[instrument(skip(self))]
    pub fn get(&self, title: &str, identity: &str) -> Result<ChatHistoryRecord, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT messages, created_at, updated_at FROM chat_histories
                     WHERE identity = ?1 AND title = ?2",
                    [identity, title],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        let (body, created_at, updated_at) =
            row.ok_or_else(|| StoreError::NotFound(format!("chat history '{title}'")))?;
        let messages = serde_json::from_str(&body).map_err(|e| StoreError::CorruptRow {
            table: "chat_histories",
            column: "messages",
            detail: e.to_string(),
        })?;

        Ok(ChatHistoryRecord {
            identity: identity.to_string(),
            title: title.to_string(),
            messages,
            created_at,
            updated_at,
        })
    }

    /// All histories for an identity, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self, identity: &str) -> Result<Vec<ChatHistorySummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT title, message_count, created_at, updated_at FROM chat_histories
                 WHERE identity = ?1 ORDER BY created_at ASC, title ASC",
            )?;
            let rows = stmt.query_map([identity], |row| {
                Ok(ChatHistorySummary {
                    title: row.get(0)?,
                    message_count: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Returns whether a history was removed.
    #[instrument(skip(self))]
    pub fn delete(&self, title: &str, identity: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM chat_histories WHERE identity = ?1 AND title = ?2",
                [identity, title],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ChatHistoryRepo {
        ChatHistoryRepo::new(Database::in_memory().unwrap())
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
    }

    #[test]
    fn save_then_get() {
        let repo = repo();
        let saved = repo.save("Greeting", "alice", &conversation()).unwrap();
        assert_eq!(saved.messages.len(), 2);

        let loaded = repo.get("Greeting", "alice").unwrap();
        assert_eq!(loaded.messages[1].content, "hello");
    }

    #[test]
    fn identity_scopes_titles() {
        let repo = repo();
        repo.save("Shared", "alice", &conversation()).unwrap();
        assert!(matches!(
            repo.get("Shared", "bob"),
            Err(StoreError::NotFound(_))
        ));
        assert!(repo.list("bob").unwrap().is_empty());
    }

    #[test]
    fn save_replaces_and_keeps_created_at() {
        let repo = repo();
        let first = repo.save("T", "alice", &conversation()).unwrap();
        let mut longer = conversation();
        longer.push(ChatMessage::user("again"));
        let second = repo.save("T", "alice", &longer).unwrap();

        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(repo.list("alice").unwrap().len(), 1);
        assert_eq!(repo.list("alice").unwrap()[0].message_count, 3);
    }

    #[test]
    fn delete_reports_removal() {
        let repo = repo();
        repo.save("T", "alice", &conversation()).unwrap();
        assert!(repo.delete("T", "alice").unwrap());
        assert!(!repo.delete("T", "alice").unwrap());
        assert!(repo.list("alice").unwrap().is_empty());
    }

    #[test]
    fn corrupt_body_is_reported() {
        let repo = repo();
        repo.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO chat_histories VALUES ('alice', 'Bad', 'not json', 0, 'x', 'x')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            repo.get("Bad", "alice"),
            Err(StoreError::CorruptRow { column: "messages", .. })
        ));
    }
}
