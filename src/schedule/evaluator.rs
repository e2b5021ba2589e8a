//! Periodic schedule evaluator.
//!
//! Turns the static schedule into due tasks by comparing each entry against
//! a wall-clock instant. All evaluation state lives in memory: the schedule
//! describes cadence, not history, so a restart re-baselines on the current
//! day and the first evaluation of a due entry fires immediately.

use std::sync::{Arc, LazyLock};

use chrono::{Local, NaiveDateTime, NaiveTime};
use regex::Regex;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::registry::JobRegistry;
use crate::schedule::Schedule;
use crate::store::TaskStore;
use crate::task::{Priority, Task, TaskKind};

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})\s+(\d+)$").unwrap());

/// Longest allowed period in minutes. Anything slower than hourly belongs to
/// a daily entry (period 0).
const MAX_PERIOD_MINUTES: i64 = 60;

#[derive(Debug)]
struct Entry {
    method: String,
    start: NaiveTime,
    period: chrono::Duration,
    /// Entry was declared with period 0: once per day.
    once: bool,
    /// Local time of the last fire. `None` until the entry first fires.
    last_run: Option<NaiveDateTime>,
    runs: u64,
}

/// Evaluates the periodic schedule against the local clock.
///
/// Due tasks are handed straight to the caller and never written to the
/// store; a periodic task exists only for the dispatch that runs it.
pub struct PeriodicEvaluator {
    entries: Vec<Entry>,
    store: Arc<dyn TaskStore>,
    priority: Priority,
}

impl PeriodicEvaluator {
    /// Build an evaluator from a schedule. Entries that are malformed or
    /// name an unregistered job are dropped here, with a warning, so the
    /// evaluation path only ever sees valid ones.
    pub fn new(
        schedule: &Schedule,
        registry: &JobRegistry,
        store: Arc<dyn TaskStore>,
        priority: Priority,
    ) -> Self {
        let mut entries = Vec::new();
        for (method, line) in schedule.entries() {
            if !registry.contains(method) {
                warn!(method = %method, "Schedule names an unregistered job, dropping entry");
                continue;
            }
            match parse_entry(line) {
                Ok((start, period, once)) => entries.push(Entry {
                    method: method.to_string(),
                    start,
                    period,
                    once,
                    last_run: None,
                    runs: 0,
                }),
                Err(reason) => {
                    warn!(method = %method, line = %line, reason = %reason, "Dropping schedule entry");
                }
            }
        }
        Self {
            entries,
            store,
            priority,
        }
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How often an entry has fired since startup.
    pub fn run_count(&self, method: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.method == method)
            .map(|e| e.runs)
    }

    /// One due task against the local clock, if any.
    pub async fn pop_task(&mut self) -> Result<Option<Task>, StoreError> {
        let now = Local::now().naive_local();
        Ok(self.get_tasks(now, true).await?.pop())
    }

    /// Evaluate every entry against `at`. With `one`, stop after the first
    /// due task; the rest stay due for the next call.
    ///
    /// Takes the clock explicitly so tests can drive it.
    pub async fn get_tasks(
        &mut self,
        at: NaiveDateTime,
        one: bool,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for entry in &mut self.entries {
            let start_today = at.date().and_time(entry.start);
            if at < start_today {
                continue;
            }
            // An entry that has never fired is treated as one period overdue,
            // so the first evaluation inside the window fires immediately.
            let last_run = entry
                .last_run
                .unwrap_or(start_today - entry.period - chrono::Duration::seconds(1));
            if at < last_run + entry.period {
                continue;
            }

            let key = self.store.new_task_key(self.priority).await?;
            let task = Task::new(key, &entry.method)
                .with_kind(TaskKind::Periodic)
                .with_priority(self.priority);
            entry.last_run = Some(at);
            entry.runs += 1;
            info!(method = %entry.method, key = %task.key, runs = entry.runs, "Periodic task due");
            tasks.push(task);
            if one {
                break;
            }
        }
        Ok(tasks)
    }

    /// One line per entry, for startup logging.
    pub fn info(&self) -> String {
        if self.entries.is_empty() {
            return "no periodic entries".to_string();
        }
        self.entries
            .iter()
            .map(|e| {
                if e.once {
                    format!("{} daily at {} (runs: {})", e.method, e.start, e.runs)
                } else {
                    format!(
                        "{} every {}m after {} (runs: {})",
                        e.method,
                        e.period.num_minutes(),
                        e.start,
                        e.runs
                    )
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parse a `"HH:MM period"` entry into start time, period and the once-a-day
/// flag. Period 0 normalizes to 24 hours.
fn parse_entry(line: &str) -> Result<(NaiveTime, chrono::Duration, bool), String> {
    let caps = ENTRY_RE
        .captures(line.trim())
        .ok_or_else(|| "expected \"HH:MM period\"".to_string())?;
    let hour: u32 = caps[1].parse().map_err(|_| "bad hour".to_string())?;
    let minute: u32 = caps[2].parse().map_err(|_| "bad minute".to_string())?;
    let start = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| format!("{hour}:{minute} is not a time of day"))?;
    let period: i64 = caps[3]
        .parse()
        .map_err(|_| "period is not a number".to_string())?;
    if period > MAX_PERIOD_MINUTES {
        return Err(format!(
            "period {period} exceeds {MAX_PERIOD_MINUTES} minutes"
        ));
    }
    if period == 0 {
        Ok((start, chrono::Duration::hours(24), true))
    } else {
        Ok((start, chrono::Duration::minutes(period), false))
    }
}
