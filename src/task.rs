//! Core data model: tasks, results, priorities and manage commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Advisory runtime budget applied when a task does not carry its own.
///
/// The dispatcher never kills a running job. The timeout bounds the claim
/// lease on the stored record, so a task whose worker died becomes claimable
/// again once this window lapses.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60 * 24;

/// Keyword-style parameters attached to a task or manage command.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Dispatch priority. Higher priorities sort first during claiming because
/// the numeric value is embedded in the task key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Supreme = 3,
}

impl Priority {
    /// Numeric value used in task keys.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "0" => Ok(Priority::Low),
            "normal" | "1" => Ok(Priority::Normal),
            "high" | "2" => Ok(Priority::High),
            "supreme" | "3" => Ok(Priority::Supreme),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Supreme => "supreme",
        };
        write!(f, "{s}")
    }
}

/// How a task entered the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Submitted by a producer through the client API.
    #[default]
    Adhoc,
    /// Generated by the periodic schedule evaluator.
    Periodic,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Adhoc => "adhoc",
            TaskKind::Periodic => "periodic",
        };
        write!(f, "{s}")
    }
}

/// Terminal status of a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Done,
    Failed,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultStatus::Done => "done",
            ResultStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ResultStatus,
    /// Rendered error description when the job failed or panicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional payload returned by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TaskResult {
    pub fn done(content: Option<String>) -> Self {
        Self {
            status: ResultStatus::Done,
            error: None,
            content,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            error: Some(error.into()),
            content: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == ResultStatus::Done
    }
}

/// One unit of work.
///
/// The serialized form is the stored record: everything except `key`, which
/// the store derives from the record's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store key. Embeds the priority so keys sort by urgency.
    #[serde(skip)]
    pub key: String,
    /// Registered job name to execute.
    pub method: String,
    /// Parameters handed to the job, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default)]
    pub priority: Priority,
    /// Seconds the worker waits before starting the job.
    #[serde(default)]
    pub delay: f64,
    /// Advisory runtime budget in seconds. Zero means the store default.
    #[serde(default)]
    pub timeout: u64,
    /// Set when a claimant wins the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken: Option<DateTime<Utc>>,
    /// Set when the result comes back. A returned task is never re-claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(key: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            method: method.into(),
            params: None,
            kind: TaskKind::Adhoc,
            priority: Priority::Normal,
            delay: 0.0,
            timeout: DEFAULT_TIMEOUT_SECS,
            taken: None,
            returned: None,
            result: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runtime budget with the zero-means-default rule applied.
    pub fn effective_timeout(&self) -> u64 {
        if self.timeout == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout
        }
    }

    /// Whether this record can be claimed right now: never returned, and
    /// either never taken or taken so long ago that the lease lapsed.
    pub fn claimable(&self, now: DateTime<Utc>) -> bool {
        if self.returned.is_some() {
            return false;
        }
        match self.taken {
            None => true,
            Some(taken) => {
                let secs = i64::try_from(self.effective_timeout()).unwrap_or(i64::MAX);
                let lease = chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX);
                match taken.checked_add_signed(lease) {
                    Some(deadline) => now >= deadline,
                    // Lease end not representable, treat the claim as live.
                    None => false,
                }
            }
        }
    }
}

/// Out-of-band instructions for a running dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageCommand {
    /// Force-free a worker slot whose job will never report back.
    FakeFreeWorker,
}

impl ManageCommand {
    /// Name under which the command is stored.
    pub fn as_str(self) -> &'static str {
        match self {
            ManageCommand::FakeFreeWorker => "fakefree",
        }
    }
}
