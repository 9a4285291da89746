use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

/// Shared SQLite connection.
///
/// rusqlite connections are not `Sync`, so every access goes through one
/// `parking_lot::Mutex`. Calls are short and synchronous.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open the database at `path`, creating parent directories and
    /// migrating the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Directory {
                path: dir.to_owned(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(schema::PRAGMAS)?;
        let version = migrate(&conn)?;
        info!(path = %path.display(), schema_version = version, "database opened");

        Ok(Self::wrap(conn, path.to_owned()))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self::wrap(conn, PathBuf::from(":memory:")))
    }

    fn wrap(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    /// Run `f` with the locked connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        f(&self.conn.lock())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Liveness check for `/health`.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(user_version)
    }
}

fn user_version(conn: &Connection) -> Result<u32, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply pending migrations and return the resulting version.
fn migrate(conn: &Connection) -> Result<u32, StoreError> {
    let supported = schema::latest_version();
    let mut version = user_version(conn)?;
    if version > supported {
        return Err(StoreError::UnsupportedSchema {
            found: version,
            supported,
        });
    }

    for (idx, ddl) in schema::MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = idx as u32 + 1;
        conn.execute_batch(&format!(
            "BEGIN;\n{ddl}\nPRAGMA user_version = {target};\nCOMMIT;"
        ))?;
        debug!(from = version, to = target, "schema migrated");
        version = target;
    }
    Ok(version)
}
