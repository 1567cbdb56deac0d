pub mod collections;
pub mod queries;
pub mod scan;

pub use collections::Collection;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
#[cfg(test)]
use rusqlite::{OptionalExtension, params};
use std::fs;
use std::path::Path;
use url::Url;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Opens a read-write transaction over the whole store. Dropping it without
    /// `commit` rolls every write back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start transaction")
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("Failed to count rows of {table}"))
    }
}

/// Fixture writers and lookups used by the tests.
#[cfg(test)]
impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite DB")?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn put_page(&self, url: &str, hostname: Option<&str>) -> Result<()> {
        let hostname = hostname
            .map(ToOwned::to_owned)
            .or_else(|| hostname_of(url));

        self.conn
            .execute(
                "INSERT OR REPLACE INTO pages (url, hostname, full_url) VALUES (?1, ?2, ?3)",
                params![url, hostname, format!("https://{url}")],
            )
            .context("Failed to put page")?;

        Ok(())
    }

    pub fn put_visit(&self, url: &str, time: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO visits (url, time) VALUES (?1, ?2)",
                params![url, time],
            )
            .context("Failed to put visit")?;

        Ok(())
    }

    pub fn put_bookmark(&self, url: &str, time: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO bookmarks (url, time) VALUES (?1, ?2)",
                params![url, time],
            )
            .context("Failed to put bookmark")?;

        Ok(())
    }

    pub fn put_annotation(&self, url: &str, page_url: &str, comment: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO annotations (url, page_url, comment) VALUES (?1, ?2, ?3)",
                params![url, page_url, comment],
            )
            .context("Failed to put annotation")?;

        Ok(())
    }

    pub fn put_annotation_privacy_level(&self, annotation: &str, privacy_level: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO annotation_privacy_levels (annotation, privacy_level) VALUES (?1, ?2)",
                params![annotation, privacy_level],
            )
            .context("Failed to put annotation privacy level")?;

        Ok(())
    }

    pub fn put_shared_annotation_metadata(&self, local_id: &str, remote_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO shared_annotation_metadata (local_id, remote_id) VALUES (?1, ?2)",
                params![local_id, remote_id],
            )
            .context("Failed to put shared annotation metadata")?;

        Ok(())
    }

    pub fn put_custom_list(&self, id: i64, name: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO custom_lists (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .context("Failed to put custom list")?;

        Ok(())
    }

    pub fn put_list_entry(&self, list_id: i64, page_url: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO page_list_entries (list_id, page_url, full_url) VALUES (?1, ?2, ?3)",
                params![list_id, page_url, format!("https://{page_url}")],
            )
            .context("Failed to put list entry")?;

        Ok(())
    }

    pub fn put_shared_list_metadata(&self, local_id: i64, remote_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO shared_list_metadata (local_id, remote_id) VALUES (?1, ?2)",
                params![local_id, remote_id],
            )
            .context("Failed to put shared list metadata")?;

        Ok(())
    }

    pub fn put_tag(&self, url: &str, name: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO tags (url, name) VALUES (?1, ?2)",
                params![url, name],
            )
            .context("Failed to put tag")?;

        Ok(())
    }

    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .context("Failed to put setting")?;

        Ok(())
    }

    pub fn put_template(&self, id: i64, title: &str, code: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO templates (id, title, code) VALUES (?1, ?2, ?3)",
                params![id, title, code],
            )
            .context("Failed to put template")?;

        Ok(())
    }

    pub fn put_fav_icon(&self, hostname: &str, fav_icon: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO fav_icons (hostname, fav_icon) VALUES (?1, ?2)",
                params![hostname, fav_icon],
            )
            .context("Failed to put favicon")?;

        Ok(())
    }

    pub fn page_exists(&self, url: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM pages WHERE url = ?1", params![url], |_| Ok(()))
            .optional()
            .context("Failed to look up page")?;

        Ok(found.is_some())
    }

    pub fn fav_icon_exists(&self, hostname: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM fav_icons WHERE hostname = ?1",
                params![hostname],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to look up favicon")?;

        Ok(found.is_some())
    }

    /// Visit times for a page, oldest first.
    pub fn visit_times(&self, url: &str) -> Result<Vec<i64>> {
        let mut statement = self
            .conn
            .prepare("SELECT time FROM visits WHERE url = ?1 ORDER BY time ASC")?;

        let times = statement
            .query_map(params![url], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()
            .context("Failed to query visits")?;

        Ok(times)
    }
}

/// Hostname of a normalized page URL. Memex page URLs usually carry no scheme.
pub fn hostname_of(page_url: &str) -> Option<String> {
    let parsed = if page_url.contains("://") {
        Url::parse(page_url)
    } else {
        Url::parse(&format!("https://{page_url}"))
    };

    parsed
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
}
