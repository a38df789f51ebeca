/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Standalone executor: runs one work unit through the payload pipeline and
//! prints every status update as a JSON line on stdout.  Logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use flotilla_sched::driver::DriverError;
use flotilla_sched::executor::{ExecutorDriver, PayloadExecutor};
use flotilla_sched::lifecycle::TaskStatus;
use flotilla_sched::matcher::task_name;
use flotilla_sched::offer::{NodeId, OfferId, Resources, TaskId, TaskPlacement};

#[derive(Debug, Parser)]
#[command(
    name = "flotilla-exec",
    about = "Flotilla executor – runs one work unit and reports status updates",
    long_about = None,
)]
struct Cli {
    /// Task id reported in every status update.
    #[arg(long = "task-id")]
    task_id: String,

    /// Work unit: an http(s) URL to fetch, or the unit itself.
    #[arg(long)]
    payload: String,

    /// Directory `<task-id>.out` is published into.
    #[arg(long = "work-dir", default_value = ".")]
    work_dir: PathBuf,

    /// Node id stamped on status updates.
    #[arg(long = "node-id", default_value = "local")]
    node_id: String,
}

/// Writes status updates and framework messages as JSON lines.
struct JsonLineDriver<W: Write + Send> {
    node_id: NodeId,
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineDriver<W> {
    fn new(node_id: NodeId, out: W) -> Self {
        Self {
            node_id,
            out: Mutex::new(out),
        }
    }

    fn write_line(&self, command: &'static str, value: serde_json::Value) -> Result<(), DriverError> {
        let failed = |reason: String| DriverError::CommandFailed { command, reason };
        let mut out = self.out.lock().map_err(|e| failed(e.to_string()))?;
        writeln!(out, "{value}").map_err(|e| failed(e.to_string()))?;
        out.flush().map_err(|e| failed(e.to_string()))
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> ExecutorDriver for JsonLineDriver<W> {
    fn send_status_update(&self, status: TaskStatus) -> Result<(), DriverError> {
        let status = status.with_node(self.node_id.clone());
        let value = serde_json::to_value(&status).map_err(|e| DriverError::CommandFailed {
            command: "send_status_update",
            reason: e.to_string(),
        })?;
        self.write_line("send_status_update", value)
    }

    fn send_framework_message(&self, message: &[u8]) -> Result<(), DriverError> {
        self.write_line(
            "send_framework_message",
            json!({
                "node_id": self.node_id,
                "message": String::from_utf8_lossy(message),
            }),
        )
    }
}

fn placement(cli: &Cli) -> TaskPlacement {
    let name = match cli.task_id.parse::<u64>() {
        Ok(seq) => task_name(seq),
        Err(_) => format!("flotilla-task-{}", cli.task_id),
    };
    TaskPlacement {
        task_id: TaskId::new(cli.task_id.clone()),
        name,
        node_id: NodeId::new(cli.node_id.clone()),
        offer_id: OfferId::new("standalone"),
        resources: Resources::new(),
        payload: cli.payload.as_bytes().to_vec(),
        executor: None,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(task = %cli.task_id, work_dir = %cli.work_dir.display(), "Flotilla executor starting");

    let driver = JsonLineDriver::new(NodeId::new(cli.node_id.clone()), std::io::stdout());
    let executor = PayloadExecutor::new(&cli.work_dir);

    if let Err(e) = executor.launch_task(&driver, &placement(&cli)).await {
        error!("Task {} failed at {} stage: {:#}", cli.task_id, e.stage(), anyhow::Error::new(e));
        process::exit(1);
    }
}
