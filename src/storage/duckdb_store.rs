use super::{migrations, KeyValueStorage, StorageError, StorageResult};
use anyhow::{Context, Result};
use directories::BaseDirs;
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// DuckDB-backed key-value store.
#[derive(Clone)]
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Create or open the database at the provided path and run migrations.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).context("creating storage directory")?;
            }
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("database connection mutex poisoned".to_string()))
    }

    /// Flush the WAL into the main database file. Call before shutdown.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.conn()?.execute_batch("CHECKPOINT;")?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        migrations::current_version(&conn)
    }
}

impl KeyValueStorage for DuckDbStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM kv_store WHERE starts_with(key, ?) ORDER BY key")?;
        let mut rows = stmt.query(params![prefix])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.duckdb");

        {
            let storage = DuckDbStorage::open(&path).unwrap();
            storage.set("canvas:a", "first").unwrap();
            storage.set("canvas:a", "second").unwrap();
            storage.set("canvas:b", "other").unwrap();
            storage.checkpoint().unwrap();
        }

        let storage = DuckDbStorage::open(&path).unwrap();
        assert_eq!(storage.get("canvas:a").unwrap(), Some("second".to_string()));
        assert_eq!(
            storage.keys_with_prefix("canvas:").unwrap(),
            vec!["canvas:a".to_string(), "canvas:b".to_string()]
        );
        assert_eq!(storage.schema_version().unwrap(), 1);
    }

    #[test]
    fn remove_and_missing_keys() {
        let storage = DuckDbStorage::open_in_memory().unwrap();
        assert_eq!(storage.get("nope").unwrap(), None);

        storage.set("k", "v").unwrap();
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        // Removing twice is fine
        storage.remove("k").unwrap();
    }
}
