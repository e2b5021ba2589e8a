use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use workmill::config::{DispatcherConfig, StoreConfig};
use workmill::coordinator::Coordinator;
use workmill::pool::SlotPool;
use workmill::registry::{Job, JobContext, JobRegistry};
use workmill::schedule::{PeriodicEvaluator, Schedule};
use workmill::store::{KvTaskStore, RedisKv, TaskStore};

/// Logs a line and returns the current time. Useful as a schedule smoke test.
struct HeartbeatJob;

#[async_trait]
impl Job for HeartbeatJob {
    fn name(&self) -> &str {
        "builtin.heartbeat"
    }

    async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>> {
        tracing::info!(task_key = %ctx.task_key, "Heartbeat");
        Ok(Some(chrono::Utc::now().to_rfc3339()))
    }
}

/// Sleeps for `params.seconds` (default 1), capped at the task timeout.
struct SleepJob;

#[async_trait]
impl Job for SleepJob {
    fn name(&self) -> &str {
        "builtin.sleep"
    }

    async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>> {
        let seconds = ctx
            .params
            .get("seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        let nap = Duration::try_from_secs_f64(seconds)
            .unwrap_or(Duration::from_secs(1))
            .min(ctx.timeout);
        tokio::time::sleep(nap).await;
        Ok(Some(format!("slept {:.3}s", nap.as_secs_f64())))
    }
}

/// Stderr logging always; rolling daily file output when `WORKMILL_LOG_DIR`
/// is set. The returned guard must stay alive for the file writer to flush.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    match std::env::var("WORKMILL_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "workmill.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            registry.init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = init_tracing();

    let dispatcher_config = DispatcherConfig::from_env();
    let store_config = StoreConfig::from_env();
    let schedule_path = std::env::var("WORKMILL_SCHEDULE").ok();

    eprintln!("workmill v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Redis: {}", store_config.url);
    eprintln!("   Key prefix: {}", store_config.key_prefix);
    eprintln!("   Workers: {}", dispatcher_config.worker_count);
    eprintln!("   Step delay: {:?}", dispatcher_config.step_delay);

    // ── Store ────────────────────────────────────────────────────────────
    let backend = RedisKv::connect(&store_config.url)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: cannot reach redis at {}: {}", store_config.url, e);
            std::process::exit(1);
        });
    let store: Arc<dyn TaskStore> = Arc::new(KvTaskStore::new(
        backend,
        store_config.key_prefix.clone(),
        store_config.default_timeout,
    ));

    // ── Jobs ─────────────────────────────────────────────────────────────
    // The allow-list: only names registered here are runnable. Task records
    // carry names, never code.
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(HeartbeatJob));
    registry.register(Arc::new(SleepJob));
    let registry = Arc::new(registry);
    eprintln!("   Jobs: {}", registry.names().join(", "));

    // ── Schedule ─────────────────────────────────────────────────────────
    let schedule = match &schedule_path {
        Some(path) => {
            eprintln!("   Schedule: {path}");
            Schedule::from_file(path)?
        }
        None => {
            eprintln!("   Schedule: none");
            Schedule::new()
        }
    };
    let evaluator = PeriodicEvaluator::new(
        &schedule,
        &registry,
        Arc::clone(&store),
        dispatcher_config.periodic_priority,
    );

    // ── Coordinator ──────────────────────────────────────────────────────
    let pool = SlotPool::new(dispatcher_config.worker_count);
    let coordinator = Coordinator::new(
        dispatcher_config,
        Arc::clone(&store),
        evaluator,
        pool,
        registry,
    );

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
        }
        stop.stop();
    });

    coordinator.run().await?;
    Ok(())
}
