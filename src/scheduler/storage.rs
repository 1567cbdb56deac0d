use crate::db::queries::CREATE_LOCAL_STORAGE;
use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
#[cfg(test)]
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Durable key-value area: `get` yields the stored value or the given default.
pub trait KeyValueArea: Send + Sync {
    fn get(&self, key: &str, default: Value) -> Result<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Key-value area stored in the `local_storage` table next to the collections.
pub struct SqliteKeyValueArea {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueArea {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;
        conn.execute(CREATE_LOCAL_STORAGE, [])
            .context("Failed to initialize local storage")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueArea for SqliteKeyValueArea {
    fn get(&self, key: &str, default: Value) -> Result<Value> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("local storage lock poisoned"))?;

        let stored = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("Failed to read local storage key {key}"))?;

        match stored {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt local storage value for {key}")),
            None => Ok(default),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("local storage lock poisoned"))?;

        conn.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value.to_string()],
        )
        .with_context(|| format!("Failed to write local storage key {key}"))?;

        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryKeyValueArea {
    values: Mutex<HashMap<String, Value>>,
}

#[cfg(test)]
impl KeyValueArea for MemoryKeyValueArea {
    fn get(&self, key: &str, default: Value) -> Result<Value> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow!("local storage lock poisoned"))?;
        Ok(values.get(key).cloned().unwrap_or(default))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| anyhow!("local storage lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }
}
