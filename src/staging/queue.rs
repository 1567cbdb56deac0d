use super::{QueueBatch, QueueSink};
use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub collection: String,
    pub objs: Vec<Value>,
}

/// Upload queue kept in the `migration_queue` table of the local store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteQueue;

impl SqliteQueue {
    pub fn entries(conn: &Connection) -> Result<Vec<QueueEntry>> {
        let mut statement =
            conn.prepare("SELECT id, collection, objs FROM migration_queue ORDER BY id ASC")?;

        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read migration queue")?;

        rows.into_iter()
            .map(|(id, collection, objs)| {
                let objs = serde_json::from_str(&objs)
                    .with_context(|| format!("Corrupt migration queue entry {id}"))?;
                Ok(QueueEntry { collection, objs })
            })
            .collect()
    }
}

impl QueueSink for SqliteQueue {
    fn reset_queue(&mut self, conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM migration_queue", [])
            .context("Failed to clear migration queue")?;
        Ok(())
    }

    fn queue_objs(&mut self, conn: &Connection, batch: QueueBatch) -> Result<()> {
        let objs = serde_json::to_string(&batch.objs).context("Failed to encode queue batch")?;

        conn.execute(
            "INSERT INTO migration_queue (collection, objs) VALUES (?1, ?2)",
            params![batch.collection.name(), objs],
        )
        .with_context(|| format!("Failed to queue {} batch", batch.collection))?;

        Ok(())
    }
}
