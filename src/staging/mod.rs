pub mod queue;

pub use queue::SqliteQueue;

use crate::db::scan::{DEFAULT_CHUNK_SIZE, scan_in_chunks};
use crate::db::{Collection, Database};
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueBatch {
    pub collection: Collection,
    pub objs: Vec<Value>,
}

/// Destination for staged batches. Both calls receive the connection of the
/// staging transaction so queue writes commit or roll back with the walk.
pub trait QueueSink {
    fn reset_queue(&mut self, conn: &Connection) -> Result<()>;
    fn queue_objs(&mut self, conn: &Connection, batch: QueueBatch) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSummary {
    pub collection: Collection,
    pub batches: usize,
    pub objects: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub collections: Vec<CollectionSummary>,
}

impl StageSummary {
    pub fn total_objects(&self) -> usize {
        self.collections.iter().map(|entry| entry.objects).sum()
    }

    pub fn total_batches(&self) -> usize {
        self.collections.iter().map(|entry| entry.batches).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationStager {
    chunk_size: usize,
}

impl Default for MigrationStager {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl MigrationStager {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Discards anything previously staged, then queues every row of every
    /// collection in dependency order. Runs in one transaction: on error
    /// nothing (not even the reset) is persisted.
    pub fn stage<S: QueueSink>(
        &self,
        database: &mut Database,
        sink: &mut S,
    ) -> Result<StageSummary> {
        let transaction = database.transaction()?;
        sink.reset_queue(&transaction)
            .context("Failed to reset migration queue")?;

        let mut summary = StageSummary::default();

        for collection in Collection::DEPENDENCY_ORDER {
            let mut objects = 0_usize;
            let batches = scan_in_chunks(&transaction, collection.table(), self.chunk_size, |objs| {
                objects += objs.len();
                sink.queue_objs(&transaction, QueueBatch { collection, objs })
            })
            .with_context(|| format!("Failed to stage collection {collection}"))?;

            debug!(collection = %collection, batches, objects, "collection staged");
            summary.collections.push(CollectionSummary {
                collection,
                batches,
                objects,
            });
        }

        transaction
            .commit()
            .context("Failed to commit staged migration queue")?;

        info!(
            batches = summary.total_batches(),
            objects = summary.total_objects(),
            "data migration staged"
        );

        Ok(summary)
    }
}
