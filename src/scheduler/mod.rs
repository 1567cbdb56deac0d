pub mod alarms;
pub mod storage;

pub use alarms::{AlarmEvents, AlarmSpec, Alarms, TokioAlarms};
#[cfg(test)]
pub use storage::MemoryKeyValueArea;
pub use storage::{KeyValueArea, SqliteKeyValueArea};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// Persisted marker of a job that was never scheduled.
pub const NOT_SET: i64 = -1;
/// Persisted marker of a one-off job that has fired.
pub const ALREADY_RUN: i64 = -2;

/// Every alarm re-fires hourly, whatever period the job itself declares.
pub const ALARM_PERIOD_MINUTES: f64 = 60.0;

const TIMER_KEY_PREFIX: &str = "job-timer:";

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTimer {
    Unset,
    Due(i64),
    AlreadyRun,
}

impl JobTimer {
    pub fn from_stored(value: i64) -> Self {
        match value {
            NOT_SET => Self::Unset,
            ALREADY_RUN => Self::AlreadyRun,
            due => Self::Due(due),
        }
    }

    pub fn to_stored(self) -> i64 {
        match self {
            Self::Unset => NOT_SET,
            Self::AlreadyRun => ALREADY_RUN,
            Self::Due(due) => due,
        }
    }
}

impl fmt::Display for JobTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("not set"),
            Self::AlreadyRun => f.write_str("already run"),
            Self::Due(due) => match chrono::DateTime::from_timestamp_millis(*due) {
                Some(at) => write!(f, "due {}", at.to_rfc3339()),
                None => write!(f, "due {due}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Periodic { period_in_minutes: f64 },
    Delayed { delay_in_minutes: f64 },
    At { when: i64 },
}

impl Schedule {
    pub fn is_one_off(&self) -> bool {
        !matches!(self, Self::Periodic { .. })
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub schedule: Schedule,
    pub job: JobFn,
}

impl JobDefinition {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            job: Arc::new(move || Box::pin(job()) as JobFuture),
        }
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

/// In-memory job definitions. Not persisted: the owning process registers its
/// jobs again on every start.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobDefinition>>,
}

impl JobRegistry {
    pub fn insert(&self, definition: JobDefinition) -> Result<()> {
        self.jobs
            .write()
            .map_err(|_| anyhow!("job registry lock poisoned"))?
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<JobDefinition>> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| anyhow!("job registry lock poisoned"))?
            .get(name)
            .cloned())
    }

    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = self
            .jobs
            .read()
            .map_err(|_| anyhow!("job registry lock poisoned"))?
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

/// Runs registered jobs when their alarms fire, keeping one persisted timer per
/// job name so firings stay idempotent across restarts.
///
/// Two wake-ups for the same name racing each other can both read the timer
/// before either writes it back; alarms fire at minute granularity, so this is
/// left unguarded.
pub struct JobScheduler {
    registry: JobRegistry,
    alarms: Arc<dyn Alarms>,
    storage: Arc<dyn KeyValueArea>,
    clock: Arc<dyn Clock>,
}

impl JobScheduler {
    pub fn new(
        registry: JobRegistry,
        alarms: Arc<dyn Alarms>,
        storage: Arc<dyn KeyValueArea>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            alarms,
            storage,
            clock,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Registers (or replaces) a job, arms its alarm and wakes it once right away.
    pub async fn schedule_job(&self, definition: JobDefinition) -> Result<()> {
        let name = definition.name.clone();
        let spec = alarm_spec_for(&definition.schedule);

        self.registry.insert(definition)?;
        self.alarms
            .create(&name, spec)
            .with_context(|| format!("Failed to create alarm for job {name}"))?;

        debug!(job = %name, ?spec, "job scheduled");

        self.handle_alarm(&name, self.clock.now_ms()).await
    }

    /// Decides whether the job named by an alarm is due at `now` and runs it.
    /// Job errors propagate to the caller.
    pub async fn handle_alarm(&self, name: &str, now: i64) -> Result<()> {
        let Some(definition) = self.registry.get(name)? else {
            debug!(alarm = %name, "alarm for unregistered job ignored");
            return Ok(());
        };

        let timer = self.timer(name)?;

        match definition.schedule {
            Schedule::Periodic { period_in_minutes } => {
                let period_ms = minutes_to_ms(period_in_minutes);
                match timer {
                    JobTimer::Unset => {
                        self.set_timer(name, JobTimer::Due(now + period_ms))?;
                    }
                    // A job that used to be one-off counts as overdue once it turns periodic.
                    JobTimer::AlreadyRun => {
                        self.run_periodic(&definition, period_ms).await?;
                    }
                    JobTimer::Due(due) if due < now => {
                        self.run_periodic(&definition, period_ms).await?;
                    }
                    JobTimer::Due(_) => {}
                }
            }
            Schedule::Delayed { delay_in_minutes } => {
                let due = now + minutes_to_ms(delay_in_minutes);
                self.handle_one_off(&definition, timer, now, None, due)
                    .await?;
            }
            Schedule::At { when } => {
                self.handle_one_off(&definition, timer, now, Some(when), when)
                    .await?;
            }
        }

        Ok(())
    }

    pub fn timer(&self, name: &str) -> Result<JobTimer> {
        read_timer(self.storage.as_ref(), name)
    }

    async fn handle_one_off(
        &self,
        definition: &JobDefinition,
        timer: JobTimer,
        now: i64,
        when: Option<i64>,
        due_if_unset: i64,
    ) -> Result<()> {
        let name = definition.name.as_str();

        match timer {
            JobTimer::Unset => self.set_timer(name, JobTimer::Due(due_if_unset)),
            JobTimer::AlreadyRun => Ok(()),
            // An explicit `when` runs on the first wake after registration, elapsed or not.
            JobTimer::Due(due) if due < now || when.is_some() => {
                info!(job = %name, "running one-off job");
                let result = (definition.job)().await;
                // At-most-once: the job is retired even when it failed.
                self.set_timer(name, JobTimer::AlreadyRun)?;
                result.with_context(|| format!("One-off job {name} failed"))
            }
            JobTimer::Due(_) => Ok(()),
        }
    }

    async fn run_periodic(&self, definition: &JobDefinition, period_ms: i64) -> Result<()> {
        info!(job = %definition.name, "running periodic job");
        (definition.job)()
            .await
            .with_context(|| format!("Periodic job {} failed", definition.name))?;

        // Rescheduled from the clock after the run, not from the alarm's `now`.
        let next = self.clock.now_ms() + period_ms;
        self.set_timer(&definition.name, JobTimer::Due(next))
    }

    fn set_timer(&self, name: &str, timer: JobTimer) -> Result<()> {
        debug!(job = %name, %timer, "job timer updated");
        self.storage
            .set(&timer_key(name), Value::from(timer.to_stored()))
            .with_context(|| format!("Failed to persist timer of job {name}"))
    }
}

/// Single listener for every alarm: dispatches each firing to the scheduler and
/// logs job failures. Returns once the alarm source is gone.
pub async fn run_alarm_dispatcher(scheduler: Arc<JobScheduler>, mut events: AlarmEvents) -> Result<()> {
    info!("job scheduler started");

    while let Some(name) = events.recv().await {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let now = scheduler.clock.now_ms();
            if let Err(error) = scheduler.handle_alarm(&name, now).await {
                error!(error = %format!("{error:#}"), job = %name, "scheduled job failed");
            }
        });
    }

    info!("alarm source closed, job scheduler stopped");
    Ok(())
}

/// Persisted timer of a job; jobs never seen before read as [`JobTimer::Unset`].
pub fn read_timer(storage: &dyn KeyValueArea, name: &str) -> Result<JobTimer> {
    let stored = storage.get(&timer_key(name), Value::from(NOT_SET))?;
    let raw = stored
        .as_i64()
        .with_context(|| format!("Timer of job {name} is not an integer: {stored}"))?;

    Ok(JobTimer::from_stored(raw))
}

pub fn alarm_spec_for(schedule: &Schedule) -> AlarmSpec {
    match schedule {
        Schedule::Periodic { .. } => AlarmSpec {
            period_in_minutes: Some(ALARM_PERIOD_MINUTES),
            ..AlarmSpec::default()
        },
        Schedule::At { when } => AlarmSpec {
            when: Some(*when),
            period_in_minutes: Some(ALARM_PERIOD_MINUTES),
            ..AlarmSpec::default()
        },
        Schedule::Delayed { .. } => AlarmSpec {
            delay_in_minutes: Some(rand::thread_rng().gen_range(0.0..ALARM_PERIOD_MINUTES)),
            period_in_minutes: Some(ALARM_PERIOD_MINUTES),
            ..AlarmSpec::default()
        },
    }
}

fn timer_key(name: &str) -> String {
    format!("{TIMER_KEY_PREFIX}{name}")
}

fn minutes_to_ms(minutes: f64) -> i64 {
    (minutes * 60_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::{
        ALARM_PERIOD_MINUTES, AlarmSpec, Alarms, Clock, JobDefinition, JobRegistry, JobScheduler,
        JobTimer, MemoryKeyValueArea, Schedule, alarm_spec_for,
    };
    use anyhow::{Result, bail};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const MINUTE: i64 = 60_000;
    const START: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        fn at(now: i64) -> Arc<Self> {
            let clock = Self::default();
            clock.set(now);
            Arc::new(clock)
        }

        fn set(&self, now: i64) {
            self.now.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingAlarms {
        created: Mutex<Vec<(String, AlarmSpec)>>,
    }

    impl Alarms for RecordingAlarms {
        fn create(&self, name: &str, spec: AlarmSpec) -> Result<()> {
            self.created
                .lock()
                .expect("alarms lock")
                .push((name.to_string(), spec));
            Ok(())
        }
    }

    struct Harness {
        scheduler: JobScheduler,
        clock: Arc<ManualClock>,
        alarms: Arc<RecordingAlarms>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::at(START);
        let alarms = Arc::new(RecordingAlarms::default());
        let scheduler = JobScheduler::new(
            JobRegistry::default(),
            alarms.clone(),
            Arc::new(MemoryKeyValueArea::default()),
            clock.clone(),
        );

        Harness {
            scheduler,
            clock,
            alarms,
        }
    }

    fn counting_job(name: &str, schedule: Schedule, runs: &Arc<AtomicUsize>) -> JobDefinition {
        let runs = Arc::clone(runs);
        JobDefinition::new(name, schedule, move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing_job(name: &str, schedule: Schedule, runs: &Arc<AtomicUsize>) -> JobDefinition {
        let runs = Arc::clone(runs);
        JobDefinition::new(name, schedule, move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                bail!("upstream unavailable")
            }
        })
    }

    #[test]
    fn timer_translates_persisted_markers() {
        assert_eq!(JobTimer::from_stored(-1), JobTimer::Unset);
        assert_eq!(JobTimer::from_stored(-2), JobTimer::AlreadyRun);
        assert_eq!(JobTimer::from_stored(START), JobTimer::Due(START));
        assert_eq!(JobTimer::AlreadyRun.to_stored(), -2);
        assert_eq!(JobTimer::Unset.to_stored(), -1);
    }

    #[tokio::test]
    async fn new_job_starts_unset_then_gets_future_timestamp() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        assert_eq!(h.scheduler.timer("fresh").expect("timer"), JobTimer::Unset);

        h.scheduler
            .schedule_job(counting_job(
                "fresh",
                Schedule::Periodic {
                    period_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");

        match h.scheduler.timer("fresh").expect("timer") {
            JobTimer::Due(due) => assert!(due > START),
            other => panic!("expected future timestamp, got {other:?}"),
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn periodic_job_fires_once_per_period() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(counting_job(
                "periodic",
                Schedule::Periodic {
                    period_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");

        for i in 1..=5 {
            let fire_at = START + (MINUTE + 1_000) * i;

            let early = fire_at - 2_000;
            h.clock.set(early);
            h.scheduler
                .handle_alarm("periodic", early)
                .await
                .expect("early firing");
            assert_eq!(runs.load(Ordering::SeqCst), i as usize - 1);

            h.clock.set(fire_at);
            h.scheduler
                .handle_alarm("periodic", fire_at)
                .await
                .expect("firing");
            assert_eq!(runs.load(Ordering::SeqCst), i as usize);
            assert_eq!(
                h.scheduler.timer("periodic").expect("timer"),
                JobTimer::Due(fire_at + MINUTE)
            );
        }
    }

    #[tokio::test]
    async fn repeated_alarm_within_period_is_a_no_op() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(counting_job(
                "periodic",
                Schedule::Periodic {
                    period_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");

        for i in 1..=5 {
            let fire_at = START + (MINUTE + 1_000) * i;
            h.clock.set(fire_at);

            h.scheduler
                .handle_alarm("periodic", fire_at)
                .await
                .expect("first firing");
            h.scheduler
                .handle_alarm("periodic", fire_at)
                .await
                .expect("repeated firing");

            assert_eq!(runs.load(Ordering::SeqCst), i as usize);
            assert_eq!(
                h.scheduler.timer("periodic").expect("timer"),
                JobTimer::Due(fire_at + MINUTE)
            );
        }
    }

    #[tokio::test]
    async fn periodic_reschedule_reads_clock_after_run() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(counting_job(
                "drift",
                Schedule::Periodic {
                    period_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");

        let alarm_now = START + MINUTE + 500;
        h.clock.set(alarm_now + 2_000);
        h.scheduler
            .handle_alarm("drift", alarm_now)
            .await
            .expect("firing");

        assert_eq!(
            h.scheduler.timer("drift").expect("timer"),
            JobTimer::Due(alarm_now + 2_000 + MINUTE)
        );
    }

    #[tokio::test]
    async fn failing_periodic_job_keeps_its_timer() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(failing_job(
                "flaky",
                Schedule::Periodic {
                    period_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");
        let before = h.scheduler.timer("flaky").expect("timer");

        let fire_at = START + MINUTE + 500;
        h.clock.set(fire_at);
        assert!(h.scheduler.handle_alarm("flaky", fire_at).await.is_err());
        assert_eq!(h.scheduler.timer("flaky").expect("timer"), before);

        assert!(h.scheduler.handle_alarm("flaky", fire_at).await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_off_job_fires_exactly_once() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(counting_job(
                "once",
                Schedule::Delayed {
                    delay_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");
        assert_eq!(
            h.scheduler.timer("once").expect("timer"),
            JobTimer::Due(START + MINUTE)
        );

        h.scheduler
            .handle_alarm("once", START + MINUTE - 1)
            .await
            .expect("early firing");
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        for i in 1..=5 {
            let fire_at = START + MINUTE * i + 500;
            h.clock.set(fire_at);
            h.scheduler
                .handle_alarm("once", fire_at)
                .await
                .expect("firing");
            assert_eq!(h.scheduler.timer("once").expect("timer"), JobTimer::AlreadyRun);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_one_off_job_is_retired() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));

        h.scheduler
            .schedule_job(failing_job(
                "doomed",
                Schedule::Delayed {
                    delay_in_minutes: 1.0,
                },
                &runs,
            ))
            .await
            .expect("scheduled");

        let fire_at = START + MINUTE + 500;
        assert!(h.scheduler.handle_alarm("doomed", fire_at).await.is_err());
        assert_eq!(h.scheduler.timer("doomed").expect("timer"), JobTimer::AlreadyRun);

        h.scheduler
            .handle_alarm("doomed", fire_at + MINUTE)
            .await
            .expect("retired job is a no-op");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn job_at_explicit_time_runs_on_next_wake() {
        let h = harness();
        let runs = Arc::new(AtomicUsize::new(0));
        let when = START + 30 * MINUTE;

        h.scheduler
            .schedule_job(counting_job("at", Schedule::At { when }, &runs))
            .await
            .expect("scheduled");
        assert_eq!(h.scheduler.timer("at").expect("timer"), JobTimer::Due(when));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        h.scheduler
            .handle_alarm("at", START + MINUTE)
            .await
            .expect("firing");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.timer("at").expect("timer"), JobTimer::AlreadyRun);
    }

    #[tokio::test]
    async fn timer_survives_scheduler_restart() {
        let storage = Arc::new(MemoryKeyValueArea::default());
        let clock = ManualClock::at(START);
        let runs = Arc::new(AtomicUsize::new(0));
        let schedule = Schedule::Delayed {
            delay_in_minutes: 1.0,
        };

        let first = JobScheduler::new(
            JobRegistry::default(),
            Arc::new(RecordingAlarms::default()),
            storage.clone(),
            clock.clone(),
        );
        first
            .schedule_job(counting_job("restart", schedule, &runs))
            .await
            .expect("scheduled");
        first
            .handle_alarm("restart", START + 2 * MINUTE)
            .await
            .expect("fired");
        drop(first);

        clock.set(START + 10 * MINUTE);
        let second = JobScheduler::new(
            JobRegistry::default(),
            Arc::new(RecordingAlarms::default()),
            storage,
            clock,
        );
        second
            .schedule_job(counting_job("restart", schedule, &runs))
            .await
            .expect("re-registered");
        second
            .handle_alarm("restart", START + 11 * MINUTE)
            .await
            .expect("no-op");

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_alarm_is_ignored() {
        let h = harness();
        h.scheduler
            .handle_alarm("nobody", START)
            .await
            .expect("ignored");
        assert_eq!(h.scheduler.timer("nobody").expect("timer"), JobTimer::Unset);
    }

    #[tokio::test]
    async fn re_registration_replaces_definition_and_rearms_alarm() {
        let h = harness();
        let first_runs = Arc::new(AtomicUsize::new(0));
        let second_runs = Arc::new(AtomicUsize::new(0));
        let schedule = Schedule::Periodic {
            period_in_minutes: 1.0,
        };

        h.scheduler
            .schedule_job(counting_job("sync", schedule, &first_runs))
            .await
            .expect("first registration");
        h.scheduler
            .schedule_job(counting_job("sync", schedule, &second_runs))
            .await
            .expect("second registration");

        let fire_at = START + MINUTE + 500;
        h.clock.set(fire_at);
        h.scheduler
            .handle_alarm("sync", fire_at)
            .await
            .expect("firing");

        assert_eq!(first_runs.load(Ordering::SeqCst), 0);
        assert_eq!(second_runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.alarms.created.lock().expect("alarms lock").len(), 2);
        assert_eq!(h.scheduler.registry().names().expect("names"), vec!["sync"]);
    }

    #[test]
    fn alarm_specs_follow_schedule_kind() {
        let periodic = alarm_spec_for(&Schedule::Periodic {
            period_in_minutes: 1440.0,
        });
        assert_eq!(periodic.period_in_minutes, Some(ALARM_PERIOD_MINUTES));
        assert_eq!(periodic.delay_in_minutes, None);

        let at = alarm_spec_for(&Schedule::At { when: START });
        assert_eq!(at.when, Some(START));

        let delayed = alarm_spec_for(&Schedule::Delayed {
            delay_in_minutes: 5.0,
        });
        let delay = delayed.delay_in_minutes.expect("random delay");
        assert!((0.0..ALARM_PERIOD_MINUTES).contains(&delay));
        assert_eq!(delayed.when, None);
    }
}
