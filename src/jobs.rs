use crate::config::Config;
use crate::db::Database;
use crate::prune::{WipeArgs, WipeSummary, wipe_passive_data};
use crate::scheduler::{JobDefinition, Schedule};
use crate::staging::{MigrationStager, SqliteQueue, StageSummary};
use anyhow::{Context, Result};
use std::sync::Arc;

pub const PREPARE_DATA_MIGRATION: &str = "prepare-data-migration";
pub const PASSIVE_DATA_WIPE: &str = "passive-data-wipe";

/// Jobs the service registers on every start.
pub fn static_jobs(config: Arc<Config>) -> Vec<JobDefinition> {
    let stage_config = Arc::clone(&config);
    let wipe_config = Arc::clone(&config);

    vec![
        JobDefinition::new(
            PREPARE_DATA_MIGRATION,
            Schedule::Periodic {
                period_in_minutes: config.stage_period_minutes,
            },
            move || {
                let config = Arc::clone(&stage_config);
                async move {
                    tokio::task::spawn_blocking(move || run_stage(&config).map(|_| ()))
                        .await
                        .context("Staging task panicked")?
                }
            },
        ),
        JobDefinition::new(
            PASSIVE_DATA_WIPE,
            Schedule::Periodic {
                period_in_minutes: config.wipe_period_minutes,
            },
            move || {
                let config = Arc::clone(&wipe_config);
                async move {
                    tokio::task::spawn_blocking(move || run_scheduled_wipe(&config))
                        .await
                        .context("Passive data wipe task panicked")?
                }
            },
        ),
    ]
}

pub fn run_stage(config: &Config) -> Result<StageSummary> {
    let mut database = Database::open(&config.db_path)?;
    MigrationStager::new(config.chunk_size).stage(&mut database, &mut SqliteQueue)
}

pub fn run_wipe(config: &Config, visit_limit: usize) -> Result<WipeSummary> {
    let mut database = Database::open(&config.db_path)?;
    wipe_passive_data(&mut database, WipeArgs { visit_limit })
}

fn run_scheduled_wipe(config: &Config) -> Result<()> {
    run_wipe(config, config.visit_limit).map(|_| ())
}
