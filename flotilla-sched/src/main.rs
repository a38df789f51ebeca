/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use flotilla_sched::artifact::{self, ArtifactServer};
use flotilla_sched::config::{AgentInventory, ErrorPolicy, FrameworkConfig};
use flotilla_sched::controller::OfferScheduler;
use flotilla_sched::driver::local::LocalCluster;
use flotilla_sched::executor::PayloadExecutor;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Flotilla offer scheduler.
///
/// Example:
///   flotilla-sched --executor target/release/flotilla-exec \
///                  --task-count 8 --agents agents.yaml
#[derive(Debug, Parser)]
#[command(
    name = "flotilla-sched",
    about = "Flotilla offer scheduler – places homogeneous tasks on resource offers",
    long_about = None,
)]
struct Cli {
    /// Address the artifact server binds to and advertises.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port of the artifact server.
    #[arg(long = "artifact-port", default_value_t = 12345)]
    artifact_port: u16,

    /// Path to the executor binary served to agents.
    #[arg(long, default_value = "./flotilla-exec")]
    executor: PathBuf,

    /// Number of tasks to run.
    #[arg(long = "task-count")]
    task_count: Option<u32>,

    /// CPUs reserved per task.
    #[arg(long = "cpus-per-task")]
    cpus_per_task: Option<f64>,

    /// Memory (MB) reserved per task.
    #[arg(long = "mem-per-task")]
    mem_per_task: Option<f64>,

    /// Seconds an agent's unused resources are refused after launch/decline.
    #[arg(long = "refuse-seconds")]
    refuse_seconds: Option<f64>,

    /// Reaction to transport errors.
    #[arg(long = "on-error", value_enum)]
    on_error: Option<ErrorPolicy>,

    /// YAML framework file; CLI flags override its values.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// YAML agent inventory for the local cluster.
    #[arg(short = 'a', long = "agents")]
    agents: Option<PathBuf>,

    /// Milliseconds between offer rounds (>= 1).
    #[arg(
        long = "offer-interval-ms",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    offer_interval_ms: u64,

    /// Directory the executor pipeline publishes task output into
    /// (default: system temp dir).
    #[arg(long = "work-dir")]
    work_dir: Option<PathBuf>,
}

impl Cli {
    fn framework_config(&self) -> anyhow::Result<FrameworkConfig> {
        let mut config = match &self.config {
            Some(path) => FrameworkConfig::load_from_file(path)?,
            None => FrameworkConfig::default(),
        };
        if let Some(n) = self.task_count {
            config.total_tasks = n;
        }
        if let Some(cpus) = self.cpus_per_task {
            config.cpus_per_task = cpus;
        }
        if let Some(mem) = self.mem_per_task {
            config.mem_per_task = mem;
        }
        if let Some(secs) = self.refuse_seconds {
            config.refuse_seconds = secs;
        }
        if let Some(policy) = self.on_error {
            config.on_error = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialise structured logging.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Flotilla scheduler starting up...");

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    let cli = Cli::parse();

    let mut config = match cli.framework_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid framework configuration: {:#}", e);
            process::exit(1);
        }
    };

    info!(
        address       = %cli.address,
        artifact_port = cli.artifact_port,
        executor      = %cli.executor.display(),
        total_tasks   = config.total_tasks,
        cpus_per_task = config.cpus_per_task,
        mem_per_task  = config.mem_per_task,
        on_error      = ?config.on_error,
        "Configuration"
    );

    // ── Load agent inventory ──────────────────────────────────────────────────
    let inventory = match &cli.agents {
        Some(path) => {
            let mut inventory = AgentInventory::new();
            if let Err(e) = inventory.load_from_file(path) {
                error!("Failed to load agent inventory: {:#}", e);
                process::exit(1);
            }
            inventory
        }
        None => {
            warn!("No agent inventory provided, using the default agent");
            AgentInventory::with_default_agent()
        }
    };
    for agent in inventory.agents() {
        info!(
            "  [{node}]  host={host}  resources={res}",
            node = agent.node_id,
            host = agent.hostname,
            res = agent.resources,
        );
    }

    // ── Serve the executor binary ─────────────────────────────────────────────
    let server = match ArtifactServer::launch(&cli.address, cli.artifact_port, &cli.executor).await
    {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start artifact server: {:#}", e);
            process::exit(1);
        }
    };
    let command = artifact::executor_command(&cli.executor.to_string_lossy());
    let executor_info = artifact::executor_info(&server.uri, &command);
    if let Some(configured) = config.use_artifact_server(&server.uri) {
        warn!(
            configured = %configured,
            serving    = %server.uri,
            "artifact_server_address replaced by the address the executor is served on"
        );
    }

    // ── Build the scheduler and run ───────────────────────────────────────────
    let mut scheduler = match OfferScheduler::new(&config, executor_info) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to build scheduler: {}", e);
            process::exit(1);
        }
    };

    let work_dir = cli.work_dir.clone().unwrap_or_else(std::env::temp_dir);
    info!(work_dir = %work_dir.display(), "task output directory");

    let cluster = LocalCluster::new(inventory, PayloadExecutor::new(work_dir))
        .with_framework_name(config.name.clone())
        .with_offer_interval(Duration::from_millis(cli.offer_interval_ms));

    let status = cluster.run(&mut scheduler).await;
    server.shutdown();

    let counters = scheduler.counters();
    info!(
        status   = ?status,
        launched = counters.launched,
        finished = counters.finished,
        total    = counters.total_requested,
        "Flotilla scheduler exiting"
    );

    if !scheduler.is_complete() {
        warn!("Run ended before all tasks finished");
        process::exit(1);
    }
}
