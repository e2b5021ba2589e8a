//! Worker execution shim.
//!
//! One spawned task per dispatched job. The shim owns everything between
//! "slot marked busy" and "completion sent": the optional pre-delay, the
//! registry lookup, and the job call itself. Panics are caught here so a
//! broken job can never take the dispatcher down, and every path ends with
//! exactly one completion on the channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::registry::{JobContext, JobRegistry};
use crate::task::{Task, TaskResult};

use super::Completion;

pub(crate) fn spawn(
    slot: usize,
    task: Task,
    registry: Arc<JobRegistry>,
    tx: UnboundedSender<Completion>,
) -> JoinHandle<()> {
    tokio::spawn(run(slot, task, registry, tx))
}

pub(crate) async fn run(
    slot: usize,
    task: Task,
    registry: Arc<JobRegistry>,
    tx: UnboundedSender<Completion>,
) {
    let span = info_span!("worker", worker = slot + 1, key = %task.key);
    async {
        if task.delay > 0.0 {
            match Duration::try_from_secs_f64(task.delay) {
                Ok(delay) => {
                    info!(delay_secs = task.delay, "Delaying before execution");
                    tokio::time::sleep(delay).await;
                }
                Err(_) => warn!(delay = task.delay, "Ignoring unusable delay"),
            }
        }

        let result = execute(slot, &task, &registry).await;
        let completion = Completion {
            task_key: task.key.clone(),
            slot,
            result,
        };
        if tx.send(completion).is_err() {
            warn!("Completion channel closed, result dropped");
        }
    }
    .instrument(span)
    .await;
}

async fn execute(slot: usize, task: &Task, registry: &JobRegistry) -> TaskResult {
    // Resolved again here rather than handed over by the coordinator: the
    // shim stays self-contained and a registry miss is still a plain failed
    // result, not a crash.
    let Some(job) = registry.get(&task.method) else {
        error!(method = %task.method, "Method is not registered");
        return TaskResult::failed(format!("method {} is not registered", task.method));
    };

    let ctx = JobContext {
        task_key: task.key.clone(),
        worker: slot + 1,
        params: task.params.clone().unwrap_or_default(),
        timeout: Duration::from_secs(task.effective_timeout()),
    };

    info!(method = %task.method, "Running job");
    match AssertUnwindSafe(job.run(ctx)).catch_unwind().await {
        Ok(Ok(content)) => {
            info!("Job finished");
            TaskResult::done(content)
        }
        Ok(Err(err)) => {
            error!(error = %err, "Job failed");
            TaskResult::failed(format!("{err:#}"))
        }
        Err(panic) => {
            let message = panic_message(panic);
            error!(panic = %message, "Job panicked");
            TaskResult::failed(format!("panic: {message}"))
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use anyhow::Context;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::task::ResultStatus;

    struct EchoJob;

    #[async_trait]
    impl crate::registry::Job for EchoJob {
        fn name(&self) -> &str {
            "jobs.echo"
        }

        async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>> {
            let what = ctx
                .params
                .get("what")
                .and_then(|v| v.as_str())
                .unwrap_or("nothing");
            Ok(Some(format!("worker {} echoed {}", ctx.worker, what)))
        }
    }

    struct FailJob;

    #[async_trait]
    impl crate::registry::Job for FailJob {
        fn name(&self) -> &str {
            "jobs.fail"
        }

        async fn run(&self, _ctx: JobContext) -> anyhow::Result<Option<String>> {
            Err(anyhow::anyhow!("disk on fire")).context("copying backups")
        }
    }

    struct PanicJob;

    #[async_trait]
    impl crate::registry::Job for PanicJob {
        fn name(&self) -> &str {
            "jobs.panic"
        }

        async fn run(&self, _ctx: JobContext) -> anyhow::Result<Option<String>> {
            panic!("index out of bounds somewhere");
        }
    }

    fn registry() -> Arc<JobRegistry> {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(EchoJob));
        registry.register(Arc::new(FailJob));
        registry.register(Arc::new(PanicJob));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn reports_success_with_content() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut params = crate::task::Params::new();
        params.insert("what".into(), serde_json::json!("hello"));
        let task = Task::new("wm_task_1_a", "jobs.echo").with_params(params);

        run(0, task, registry(), tx).await;

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.task_key, "wm_task_1_a");
        assert_eq!(completion.slot, 0);
        assert_eq!(completion.result.status, ResultStatus::Done);
        assert_eq!(
            completion.result.content.as_deref(),
            Some("worker 1 echoed hello")
        );
    }

    #[tokio::test]
    async fn reports_failure_with_the_error_chain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("wm_task_1_b", "jobs.fail");

        run(2, task, registry(), tx).await;

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.result.status, ResultStatus::Failed);
        let error = completion.result.error.unwrap();
        assert!(error.contains("copying backups"), "got: {error}");
        assert!(error.contains("disk on fire"), "got: {error}");
    }

    #[tokio::test]
    async fn a_panicking_job_still_reports_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("wm_task_1_c", "jobs.panic");

        run(1, task, registry(), tx).await;

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.result.status, ResultStatus::Failed);
        let error = completion.result.error.unwrap();
        assert!(error.starts_with("panic:"), "got: {error}");
        assert!(error.contains("index out of bounds"), "got: {error}");
        assert!(rx.try_recv().is_err(), "only one completion per task");
    }

    #[tokio::test]
    async fn an_unknown_method_reports_a_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("wm_task_1_d", "jobs.vanished");

        run(0, task, registry(), tx).await;

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.result.status, ResultStatus::Failed);
        assert!(
            completion
                .result
                .error
                .unwrap()
                .contains("jobs.vanished is not registered")
        );
    }

    #[tokio::test]
    async fn delay_postpones_execution() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("wm_task_1_e", "jobs.echo").with_delay(0.2);

        let started = Instant::now();
        run(0, task, registry(), tx).await;
        assert!(started.elapsed() >= Duration::from_millis(190));
        assert_eq!(rx.try_recv().unwrap().result.status, ResultStatus::Done);
    }

    #[tokio::test]
    async fn an_unusable_delay_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("wm_task_1_f", "jobs.echo").with_delay(f64::INFINITY);

        let started = Instant::now();
        run(0, task, registry(), tx).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(rx.try_recv().unwrap().result.status, ResultStatus::Done);
    }
}
