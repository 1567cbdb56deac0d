use super::Clock;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, sleep};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlarmSpec {
    pub delay_in_minutes: Option<f64>,
    pub period_in_minutes: Option<f64>,
    pub when: Option<i64>,
}

impl AlarmSpec {
    /// Time until the first firing: `when` wins, then the delay, then one period.
    pub fn first_delay(&self, now_ms: i64) -> Duration {
        match (self.when, self.delay_in_minutes, self.period_in_minutes) {
            (Some(when), _, _) => Duration::from_millis(when.saturating_sub(now_ms).max(0) as u64),
            (None, Some(delay), _) => minutes_to_duration(delay),
            (None, None, Some(period)) => minutes_to_duration(period),
            (None, None, None) => Duration::ZERO,
        }
    }
}

/// Wake-up primitive. Creating an alarm under an existing name replaces it.
pub trait Alarms: Send + Sync {
    fn create(&self, name: &str, spec: AlarmSpec) -> Result<()>;
}

/// Receiving end of the alarms created through [`TokioAlarms`].
pub struct AlarmEvents {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl AlarmEvents {
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

pub struct TokioAlarms {
    sender: mpsc::UnboundedSender<String>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl TokioAlarms {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, AlarmEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let alarms = Self {
            sender,
            timers: Mutex::new(HashMap::new()),
            clock,
        };

        (alarms, AlarmEvents { receiver })
    }
}

impl Alarms for TokioAlarms {
    fn create(&self, name: &str, spec: AlarmSpec) -> Result<()> {
        let first = spec.first_delay(self.clock.now_ms());
        let period = spec
            .period_in_minutes
            .map(minutes_to_duration)
            .filter(|period| !period.is_zero());
        let sender = self.sender.clone();
        let alarm = name.to_string();

        let handle = tokio::spawn(async move {
            sleep(first).await;
            if sender.send(alarm.clone()).is_err() {
                return;
            }

            let Some(period) = period else {
                return;
            };

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if sender.send(alarm.clone()).is_err() {
                    break;
                }
            }
        });

        let mut timers = self
            .timers
            .lock()
            .map_err(|_| anyhow!("alarm registry lock poisoned"))?;
        if let Some(previous) = timers.insert(name.to_string(), handle) {
            previous.abort();
        }

        Ok(())
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            timers.values().for_each(JoinHandle::abort);
        }
    }
}

pub fn minutes_to_duration(minutes: f64) -> Duration {
    Duration::from_secs_f64((minutes * 60.0).max(0.0))
}
