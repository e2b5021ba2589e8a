//! Coordinator — the worker-pool control loop.
//!
//! Each iteration drains finished work, applies operator recovery commands,
//! then fills free slots: periodic tasks first, stored ad-hoc tasks second.
//! Workers are isolated tasks that report back over a channel; the slot a
//! worker ran on stays busy until its completion is drained or an operator
//! force-frees it.

pub mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::pool::SlotPool;
use crate::registry::{Job, JobRegistry};
use crate::schedule::PeriodicEvaluator;
use crate::store::TaskStore;
use crate::task::{ManageCommand, Params, Task, TaskKind, TaskResult};

/// Error recorded on a task whose worker slot was force-freed.
pub const FAKE_FREE_ERROR: &str = "worker force-freed by manage command";

/// Lifecycle of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Stop requested, waiting for busy workers to report back.
    Draining,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// What a worker sends back when its task finishes.
#[derive(Debug)]
pub struct Completion {
    pub task_key: String,
    pub slot: usize,
    pub result: TaskResult,
}

/// Cloneable handle that asks a running coordinator to stop. The coordinator
/// finishes in-flight work before it exits; it never kills a worker.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Stop requested");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The dispatcher's control loop. Built once at startup from its parts and
/// consumed by [`Coordinator::run`].
pub struct Coordinator {
    config: DispatcherConfig,
    store: Arc<dyn TaskStore>,
    evaluator: PeriodicEvaluator,
    pool: SlotPool,
    registry: Arc<JobRegistry>,
    /// Methods already resolved against the registry this run.
    methods: HashMap<String, Arc<dyn Job>>,
    /// Task each busy slot is working on.
    in_flight: HashMap<usize, Task>,
    completion_tx: UnboundedSender<Completion>,
    completion_rx: UnboundedReceiver<Completion>,
    stop: Arc<AtomicBool>,
    state: RunState,
}

impl Coordinator {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn TaskStore>,
        evaluator: PeriodicEvaluator,
        pool: SlotPool,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            evaluator,
            pool,
            registry,
            methods: HashMap::new(),
            in_flight: HashMap::new(),
            completion_tx,
            completion_rx,
            stop: Arc::new(AtomicBool::new(false)),
            state: RunState::Stopped,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Run the control loop until a stop is requested and every busy worker
    /// has reported back.
    pub async fn run(mut self) -> Result<()> {
        let store_info = self.store.info().await?;
        debug!("Store info:\n{store_info}");
        info!(
            workers = self.pool.len(),
            jobs = self.registry.len(),
            schedule = %self.evaluator.info(),
            "Dispatcher starting"
        );
        self.state = RunState::Running;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                if self.pool.all_free() {
                    break;
                }
                if self.state != RunState::Draining {
                    self.state = RunState::Draining;
                    info!(
                        state = %self.state,
                        busy = self.pool.count_busy(),
                        "Stop requested, draining busy workers"
                    );
                }
            }

            let freed = self.drain_completions().await?;
            self.apply_manage_commands(&freed).await?;
            self.dispatch().await?;
            tokio::time::sleep(self.config.step_delay).await;
        }

        self.state = RunState::Stopped;
        info!("Dispatcher stopped");
        Ok(())
    }

    /// Pull every completion a worker has sent since the last iteration and
    /// free the matching slots.
    async fn drain_completions(&mut self) -> Result<HashSet<usize>> {
        let mut freed = HashSet::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            let Completion {
                task_key,
                slot,
                result,
            } = completion;

            let matches = self.in_flight.get(&slot).map(|t| t.key == task_key);
            match matches {
                Some(true) => {
                    let Some(mut task) = self.in_flight.remove(&slot) else {
                        continue;
                    };
                    let failed = !result.is_done();
                    task.result = Some(result);
                    task.returned = Some(Utc::now());
                    // Periodic tasks exist only in memory, there is no
                    // record to complete.
                    if task.kind == TaskKind::Adhoc {
                        self.store.update_task(&task).await?;
                    }
                    self.pool.mark_free(slot);
                    freed.insert(slot);
                    if failed {
                        warn!(key = %task.key, worker = slot + 1, "Task finished with a failure");
                    } else {
                        info!(key = %task.key, worker = slot + 1, "Task finished");
                    }
                }
                Some(false) => {
                    if let Some(current) = self.in_flight.get(&slot) {
                        error!(
                            worker = slot + 1,
                            expected = %current.key,
                            got = %task_key,
                            "Completion does not match the slot's task, leaving the slot busy"
                        );
                    }
                }
                None => {
                    error!(
                        worker = slot + 1,
                        key = %task_key,
                        "Completion for an idle slot, ignoring"
                    );
                }
            }
        }
        Ok(freed)
    }

    /// Apply pending force-free commands. A slot whose completion was drained
    /// this same iteration is skipped: the worker did report back, the
    /// command is stale.
    async fn apply_manage_commands(&mut self, freed: &HashSet<usize>) -> Result<()> {
        let commands = self
            .store
            .select_manage_commands(ManageCommand::FakeFreeWorker.as_str())
            .await?;
        for (id, params) in commands {
            let Some(worker) = parse_worker(&params) else {
                return Err(DispatchError::MalformedCommand {
                    name: ManageCommand::FakeFreeWorker.as_str().to_string(),
                    id,
                    reason: "params need a positive integer \"worker\"".to_string(),
                }
                .into());
            };
            let slot = worker - 1;
            if slot >= self.pool.len() {
                return Err(DispatchError::WorkerOutOfRange {
                    worker,
                    size: self.pool.len(),
                }
                .into());
            }

            if freed.contains(&slot) {
                info!(
                    worker,
                    command = %id,
                    "Worker reported back this iteration, skipping force-free"
                );
                continue;
            }

            match self.in_flight.remove(&slot) {
                Some(mut task) => {
                    task.result = Some(TaskResult::failed(FAKE_FREE_ERROR));
                    task.returned = Some(Utc::now());
                    self.store.update_task(&task).await?;
                    self.pool.mark_free(slot);
                    warn!(worker, key = %task.key, "Worker force-freed, its job is abandoned");
                }
                None => {
                    debug!(worker, command = %id, "Force-free for an idle worker, nothing to do");
                }
            }
        }
        Ok(())
    }

    /// Fill free slots: periodic tasks take precedence over stored ones.
    async fn dispatch(&mut self) -> Result<()> {
        if self.stop.load(Ordering::SeqCst) {
            if self.pool.count_free() > 0 {
                debug!("Stop requested, not starting new work");
            }
            return Ok(());
        }
        let budget = self.pool.count_free();
        for _ in 0..budget {
            let task = match self.evaluator.pop_task().await? {
                Some(task) => Some(task),
                None => self.store.pop_task().await?,
            };
            let Some(task) = task else {
                break;
            };

            if !self.ensure_method(&task.method) {
                error!(
                    key = %task.key,
                    method = %task.method,
                    "Claimed task names an unregistered method, abandoning the claim"
                );
                continue;
            }

            let Some(slot) = self.pool.get_free() else {
                break;
            };
            self.pool.mark_busy(slot);
            self.in_flight.insert(slot, task.clone());
            info!(
                key = %task.key,
                method = %task.method,
                kind = %task.kind,
                worker = slot + 1,
                "Dispatching task"
            );
            worker::spawn(
                slot,
                task,
                Arc::clone(&self.registry),
                self.completion_tx.clone(),
            );
        }
        Ok(())
    }

    /// Resolve a method against the registry, memoizing per run.
    fn ensure_method(&mut self, method: &str) -> bool {
        if self.methods.contains_key(method) {
            return true;
        }
        match self.registry.get(method) {
            Some(job) => {
                self.methods.insert(method.to_string(), job);
                true
            }
            None => false,
        }
    }
}

fn parse_worker(params: &Params) -> Option<usize> {
    let worker = params.get("worker")?.as_u64()?;
    if worker == 0 {
        return None;
    }
    Some(worker as usize)
}
