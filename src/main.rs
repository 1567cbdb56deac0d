mod cli;
mod config;
mod db;
mod jobs;
mod prune;
mod scheduler;
mod staging;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::config::Config;
use crate::db::{Collection, Database};
use crate::prune::is_passive_data_removal_needed;
use crate::scheduler::{
    Clock, JobRegistry, JobScheduler, KeyValueArea, SqliteKeyValueArea, SystemClock, TokioAlarms,
    read_timer,
};
use crate::staging::SqliteQueue;
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command } => handle_config_command(command),
        Commands::Status => handle_status(),
        Commands::Stage => handle_stage(),
        Commands::Wipe { visit_limit, check } => handle_wipe(visit_limit, check),
        Commands::Jobs => handle_jobs(),
        Commands::Service => {
            let config = Config::load_or_default()?;
            run_service(config).await
        }
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_or_default()?;
            config.set_value(&key, &value)?;
            config.save()?;

            println!("Config saved: {key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = Config::load_or_default()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_status() -> Result<()> {
    let config = Config::load_or_default()?;
    let database = Database::open(&config.db_path)?;

    println!("memex-sync status");
    println!("- db_path: {}", config.db_path.display());
    for collection in Collection::all() {
        println!(
            "- {}: {} row(s)",
            collection,
            database.count_rows(collection.table())?
        );
    }

    let queued = SqliteQueue::entries(database.connection())?.into_iter().fold(
        BTreeMap::new(),
        |mut acc, entry| {
            let counts = acc.entry(entry.collection).or_insert((0_usize, 0_usize));
            counts.0 += 1;
            counts.1 += entry.objs.len();
            acc
        },
    );
    if queued.is_empty() {
        println!("- migration queue: empty");
    }
    for (collection, (batches, objects)) in queued {
        println!("- queued {collection}: {objects} object(s) in {batches} batch(es)");
    }

    print_job_timers(&config)
}

fn handle_stage() -> Result<()> {
    let config = Config::load_or_default()?;
    let summary = jobs::run_stage(&config)?;

    println!("Staged {} object(s) in {} batch(es)", summary.total_objects(), summary.total_batches());
    summary
        .collections
        .iter()
        .filter(|entry| entry.objects > 0)
        .for_each(|entry| {
            println!(
                "- {}: {} object(s), {} batch(es)",
                entry.collection, entry.objects, entry.batches
            )
        });

    Ok(())
}

fn handle_wipe(visit_limit: Option<usize>, check: bool) -> Result<()> {
    let config = Config::load_or_default()?;

    if check {
        let database = Database::open(&config.db_path)?;
        let needed = is_passive_data_removal_needed(&database, config.passive_data_cutoff_ms()?)?;
        println!(
            "passive data removal needed (visits on or before {}): {needed}",
            config.passive_data_cutoff
        );
        return Ok(());
    }

    let summary = jobs::run_wipe(&config, visit_limit.unwrap_or(config.visit_limit))?;

    println!("Passive data wiped");
    println!("- pages deleted: {}", summary.deleted_pages);
    println!("- orphan visits deleted: {}", summary.deleted_orphan_visits);
    println!("- visits over limit deleted: {}", summary.capped_visits);
    println!("- favicons deleted: {}", summary.deleted_fav_icons);

    Ok(())
}

fn handle_jobs() -> Result<()> {
    let config = Config::load_or_default()?;
    print_job_timers(&config)
}

fn print_job_timers(config: &Config) -> Result<()> {
    let storage = SqliteKeyValueArea::open(&config.db_path)?;

    for job in jobs::static_jobs(Arc::new(config.clone())) {
        let kind = if job.schedule.is_one_off() {
            "one-off"
        } else {
            "periodic"
        };
        println!("- job {} ({kind}): {}", job.name, read_timer(&storage, &job.name)?);
    }

    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    Database::open(&config.db_path)?.init_schema()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage: Arc<dyn KeyValueArea> = Arc::new(SqliteKeyValueArea::open(&config.db_path)?);
    let (alarms, events) = TokioAlarms::new(Arc::clone(&clock));

    let registry = JobRegistry::default();
    let scheduler = Arc::new(JobScheduler::new(
        registry,
        Arc::new(alarms),
        storage,
        Arc::clone(&clock),
    ));

    for job in jobs::static_jobs(Arc::new(config)) {
        let name = job.name.clone();
        if let Err(error) = scheduler.schedule_job(job).await {
            error!(error = %format!("{error:#}"), job = %name, "job failed while scheduling");
        }
    }

    info!(jobs = ?scheduler.registry().names()?, "memex-sync service started");

    tokio::select! {
        dispatcher_result = scheduler::run_alarm_dispatcher(Arc::clone(&scheduler), events) => {
            dispatcher_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
