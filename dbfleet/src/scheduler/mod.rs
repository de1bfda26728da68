//! Cadence-driven job scheduling.
//!
//! One loop polls on a coarse quantum and fires jobs whose next-fire time
//! has passed. Per-job next-fire state is explicit and `next_fire_after` is
//! a pure function, so cadence logic is testable without sleeping. The
//! central concurrency rule: at most one execution of a given job at a
//! time. A firing that lands while the previous run is still active is
//! skipped and logged, never queued.
//!
//! Cadence expressions:
//!
//! ```text
//! every 30s | every 5m | every 2h      fixed interval
//! daily 02:00                          every day at 02:00 UTC
//! weekly sun 01:00                     every Sunday at 01:00 UTC
//! ```

pub mod jobs;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc, Weekday};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// When a job fires, parsed from a config expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

impl Cadence {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        match parts.as_slice() {
            ["every", interval] => {
                let (digits, unit) = interval.split_at(
                    interval
                        .find(|c: char| !c.is_ascii_digit())
                        .ok_or_else(|| format!("interval '{}' is missing a unit (s/m/h)", interval))?,
                );
                let value: u64 = digits
                    .parse()
                    .map_err(|_| format!("bad interval value '{}'", interval))?;
                if value == 0 {
                    return Err("interval must be at least 1".to_string());
                }
                let seconds = match unit {
                    "s" => value,
                    "m" => value * 60,
                    "h" => value * 3600,
                    other => return Err(format!("unknown interval unit '{}'", other)),
                };
                Ok(Cadence::Every(Duration::from_secs(seconds)))
            }
            ["daily", time] => {
                let (hour, minute) = parse_time(time)?;
                Ok(Cadence::Daily { hour, minute })
            }
            ["weekly", day, time] => {
                let weekday = parse_weekday(day)?;
                let (hour, minute) = parse_time(time)?;
                Ok(Cadence::Weekly {
                    weekday,
                    hour,
                    minute,
                })
            }
            _ => Err(format!(
                "unrecognized cadence '{}' (expected 'every <n>[smh]', 'daily HH:MM' or 'weekly <dow> HH:MM')",
                expr
            )),
        }
    }

    /// The first instant strictly after `after` at which this cadence fires.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => {
                after + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::seconds(1))
            }
            Cadence::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
                let candidate = Utc.from_utc_datetime(&after.date_naive().and_time(time));
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::days(1)
                }
            }
            Cadence::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
                for offset in 0..=7 {
                    let date = after.date_naive() + ChronoDuration::days(offset);
                    if date.weekday() != weekday {
                        continue;
                    }
                    let candidate = Utc.from_utc_datetime(&date.and_time(time));
                    if candidate > after {
                        return candidate;
                    }
                }
                // Unreachable: a weekday recurs within 7 days.
                after + ChronoDuration::days(7)
            }
        }
    }
}

fn parse_time(time: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = time
        .split_once(':')
        .ok_or_else(|| format!("bad time '{}' (expected HH:MM)", time))?;
    let hour: u32 = hour.parse().map_err(|_| format!("bad hour in '{}'", time))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| format!("bad minute in '{}'", time))?;
    if hour > 23 {
        return Err(format!("hour {} is outside 0-23", hour));
    }
    if minute > 59 {
        return Err(format!("minute {} is outside 0-59", minute));
    }
    Ok((hour, minute))
}

fn parse_weekday(day: &str) -> Result<Weekday, String> {
    match day.to_ascii_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        other => Err(format!("unknown weekday '{}'", other)),
    }
}

pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named recurring unit of work bound to a cadence.
pub struct ScheduledJob {
    pub name: String,
    pub cadence: Cadence,
    callback: JobCallback,
}

impl ScheduledJob {
    pub fn new<F>(name: impl Into<String>, cadence: Cadence, callback: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cadence,
            callback: Arc::new(callback),
        }
    }
}

#[derive(Debug, Clone)]
struct RunningJob {
    started_at: DateTime<Utc>,
}

/// Idle/Running state per job. `try_start` refuses while a previous run is
/// active, which is what serializes firings of the same job.
pub struct JobStateTracker {
    running: Mutex<HashMap<String, RunningJob>>,
    skips: Mutex<HashMap<String, u64>>,
}

impl JobStateTracker {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            skips: Mutex::new(HashMap::new()),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<String, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_skips(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.skips.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition Idle -> Running. Returns false (and counts a skip) when
    /// the job is already running.
    pub fn try_start(&self, name: &str) -> bool {
        let mut running = self.lock_running();
        if running.contains_key(name) {
            drop(running);
            *self.lock_skips().entry(name.to_string()).or_insert(0) += 1;
            return false;
        }
        running.insert(
            name.to_string(),
            RunningJob {
                started_at: Utc::now(),
            },
        );
        true
    }

    /// Transition Running -> Idle.
    pub fn finish(&self, name: &str) {
        if let Some(job) = self.lock_running().remove(name) {
            let elapsed = Utc::now().signed_duration_since(job.started_at);
            info!(job = name, elapsed_secs = elapsed.num_seconds(), "job finished");
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock_running().contains_key(name)
    }

    pub fn active_count(&self) -> usize {
        self.lock_running().len()
    }

    pub fn skip_count(&self, name: &str) -> u64 {
        self.lock_skips().get(name).copied().unwrap_or(0)
    }

    /// Wait for in-flight jobs to drain, up to `grace`. Used during
    /// shutdown; jobs still running afterwards are reported, not killed.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                let running: Vec<String> = self.lock_running().keys().cloned().collect();
                warn!(?running, "shutdown grace period expired with jobs still running");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Default for JobStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct JobEntry {
    job: ScheduledJob,
    next_fire: DateTime<Utc>,
}

/// The cooperative timer loop. A shutdown signal stops new firings within
/// one polling quantum; in-flight jobs are left to finish.
pub struct Scheduler {
    entries: Vec<JobEntry>,
    tracker: Arc<JobStateTracker>,
    shutdown: watch::Receiver<bool>,
    poll_quantum: Duration,
}

impl Scheduler {
    pub fn new(jobs: Vec<ScheduledJob>, shutdown: watch::Receiver<bool>) -> Self {
        let now = Utc::now();
        let entries = jobs
            .into_iter()
            .map(|job| {
                let next_fire = job.cadence.next_fire_after(now);
                info!(job = %job.name, %next_fire, "job scheduled");
                JobEntry { job, next_fire }
            })
            .collect();

        Self {
            entries,
            tracker: Arc::new(JobStateTracker::new()),
            shutdown,
            poll_quantum: Duration::from_secs(1),
        }
    }

    pub fn tracker(&self) -> Arc<JobStateTracker> {
        self.tracker.clone()
    }

    pub async fn run(mut self) {
        enum Wake {
            Signal(bool),
            Quantum,
        }

        info!(jobs = self.entries.len(), "scheduler started");
        loop {
            let wake = tokio::select! {
                changed = self.shutdown.changed() => Wake::Signal(changed.is_err()),
                _ = tokio::time::sleep(self.poll_quantum) => Wake::Quantum,
            };

            match wake {
                Wake::Signal(closed) => {
                    if closed || *self.shutdown.borrow() {
                        break;
                    }
                }
                Wake::Quantum => self.tick(Utc::now()),
            }
        }
        info!("scheduler stopped, no further firings will be dispatched");
    }

    /// Fire every due job once and advance its next-fire time. Public so
    /// cadence behavior can be driven deterministically in tests.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let tracker = self.tracker.clone();
        for entry in &mut self.entries {
            if now < entry.next_fire {
                continue;
            }
            entry.next_fire = entry.job.cadence.next_fire_after(now);

            if tracker.try_start(&entry.job.name) {
                let callback = entry.job.callback.clone();
                let name = entry.job.name.clone();
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    callback().await;
                    tracker.finish(&name);
                });
            } else {
                warn!(job = %entry.job.name, "job skipped: previous run still active");
            }
        }
    }
}
