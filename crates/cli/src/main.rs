//! `crm-flow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the API server (plus in-process workers).
//! - `worker`   start workers and the reconciliation sweeper.
//! - `migrate`  run pending database migrations.
//! - `validate` compile a workflow graph JSON file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use engine::audit::AuditRecorder;
use engine::postgres::{PgAuditRecorder, PgInstanceStore, PgPlanStore, PgScheduler};
use engine::{
    DelayUnit, EngineConfig, Graph, InstanceStore, MemoryAuditRecorder, MemoryInstanceStore,
    MemoryPlanStore, PlanStore, Sweeper, Worker, WorkerConfig, WorkflowExecutor,
};
use nodes::dry_run::DryRunInvoker;
use nodes::HandlerRegistry;
use queue::{MemoryScheduler, Scheduler};

#[derive(Parser)]
#[command(
    name = "crm-flow",
    about = "Durable CRM automation workflow engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server with in-process workers.
    Serve {
        #[arg(long, env = "CRM_FLOW_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Keep all state in memory instead of Postgres. State is lost on exit.
        #[arg(long)]
        in_memory: bool,
        #[arg(long, env = "DATABASE_URL", required_unless_present = "in_memory")]
        database_url: Option<String>,
        #[arg(long, env = "CRM_FLOW_DB_MAX_CONNECTIONS", default_value_t = 10)]
        max_connections: u32,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        workers: WorkerArgs,
    },
    /// Start background workers that run ready instances.
    Worker {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(long, env = "CRM_FLOW_DB_MAX_CONNECTIONS", default_value_t = 10)]
        max_connections: u32,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        workers: WorkerArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Compile a workflow graph JSON file and print its execution order.
    Validate {
        /// Path to the graph JSON file.
        path: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Clone)]
struct EngineArgs {
    /// Attempts per action before an instance fails.
    #[arg(long, env = "CRM_FLOW_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
    #[arg(long, env = "CRM_FLOW_BACKOFF_BASE_SECONDS", default_value_t = 30)]
    backoff_base_seconds: u64,
    #[arg(long, env = "CRM_FLOW_BACKOFF_CAP_SECONDS", default_value_t = 3600)]
    backoff_cap_seconds: u64,
    /// Unit for delay nodes authored without one (minutes, hours, days).
    #[arg(long, env = "CRM_FLOW_DEFAULT_DELAY_UNIT", default_value = "minutes")]
    default_delay_unit: DelayUnit,
}

impl EngineArgs {
    fn config(&self) -> anyhow::Result<EngineConfig> {
        let config = EngineConfig {
            max_attempts: self.max_attempts,
            backoff_base_seconds: self.backoff_base_seconds,
            backoff_cap_seconds: self.backoff_cap_seconds,
            default_delay_unit: self.default_delay_unit,
        };
        config.validate().context("invalid engine configuration")?;
        Ok(config)
    }
}

#[derive(Args, Clone)]
struct WorkerArgs {
    /// Number of concurrent polling workers.
    #[arg(long, env = "CRM_FLOW_WORKERS", default_value_t = 4)]
    workers: usize,
    #[arg(long, env = "CRM_FLOW_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,
    #[arg(long, env = "CRM_FLOW_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,
    /// How overdue an instance must be before the sweeper requeues it.
    #[arg(long, env = "CRM_FLOW_GRACE_SECS", default_value_t = 300)]
    grace_secs: u64,
}

impl WorkerArgs {
    fn config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            grace: Duration::from_secs(self.grace_secs),
        }
    }
}

/// The storage seams an executor runs on.
struct Backends {
    store: Arc<dyn InstanceStore>,
    plans: Arc<dyn PlanStore>,
    scheduler: Arc<dyn Scheduler>,
    audit: Arc<dyn AuditRecorder>,
}

impl Backends {
    fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryInstanceStore::new()),
            plans: Arc::new(MemoryPlanStore::new()),
            scheduler: Arc::new(MemoryScheduler::new()),
            audit: Arc::new(MemoryAuditRecorder::new()),
        }
    }

    async fn postgres(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = db::pool::create_pool(database_url, max_connections)
            .await
            .context("failed to connect to database")?;
        Ok(Self {
            store: Arc::new(PgInstanceStore::new(pool.clone())),
            plans: Arc::new(PgPlanStore::new(pool.clone())),
            scheduler: Arc::new(PgScheduler::new(pool.clone())),
            audit: Arc::new(PgAuditRecorder::new(pool)),
        })
    }

    fn into_executor(self, config: EngineConfig) -> Arc<WorkflowExecutor> {
        // No provider integrations are linked into this binary; every kind
        // is logged instead of performed.
        warn!("no action integrations registered; actions run in dry-run mode");
        let invoker = HandlerRegistry::new().with_fallback(Arc::new(DryRunInvoker));
        Arc::new(WorkflowExecutor::new(
            self.store,
            self.plans,
            self.scheduler,
            self.audit,
            Arc::new(invoker),
            config,
        ))
    }
}

fn spawn_workers(
    executor: &Arc<WorkflowExecutor>,
    args: &WorkerArgs,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config = args.config();
    let mut handles: Vec<JoinHandle<()>> = (0..args.workers.max(1))
        .map(|i| {
            let worker = Worker::new(
                format!("worker-{i}"),
                executor.clone(),
                config.clone(),
                cancel.clone(),
            );
            tokio::spawn(async move { worker.run().await })
        })
        .collect();

    let sweeper = Sweeper::new(executor.clone(), config, cancel.clone());
    handles.push(tokio::spawn(async move { sweeper.run().await }));
    handles
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("shutdown requested");
        token.cancel();
    });
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("background task panicked: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            in_memory,
            database_url,
            max_connections,
            engine: engine_args,
            workers,
        } => {
            let backends = match (in_memory, database_url) {
                (true, _) => {
                    info!("using in-memory storage");
                    Backends::in_memory()
                }
                (false, Some(url)) => Backends::postgres(&url, max_connections).await?,
                (false, None) => bail!("--database-url is required unless --in-memory is set"),
            };
            let executor = backends.into_executor(engine_args.config()?);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let handles = spawn_workers(&executor, &workers, &cancel);

            info!("Starting API server on {bind}");
            let served = api::serve(&bind, AppState::new(executor), cancel.clone()).await;
            cancel.cancel();
            join_all(handles).await;
            served.context("API server failed")?;
        }
        Command::Worker {
            database_url,
            max_connections,
            engine: engine_args,
            workers,
        } => {
            let executor = Backends::postgres(&database_url, max_connections)
                .await?
                .into_executor(engine_args.config()?);

            info!(workers = workers.workers, "Starting background workers");
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            join_all(spawn_workers(&executor, &workers, &cancel)).await;
            info!("workers stopped");
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool)
                .await
                .context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate {
            path,
            engine: engine_args,
        } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let graph: Graph = serde_json::from_str(&content).context("invalid graph JSON")?;

            match engine::compile(&graph, &engine_args.config()?) {
                Ok(plan) => {
                    println!(
                        "✅ Graph '{}' v{} is valid. Execution order: {:?}",
                        plan.name(),
                        plan.version().version,
                        plan.order()
                    );
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
