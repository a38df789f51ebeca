/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! scenario-sim – replays a YAML scenario against the offer scheduler.
//!
//! Every step is delivered to an `OfferScheduler` wired to a
//! `RecordingDriver`; the driver commands each step produced are printed.
//! An optional `expect` block turns the run into a pass/fail check.
//!
//! Usage:
//!   scenario-sim test-tools/scenarios/two_offers.yaml
//!
//! Scenario layout:
//! ```yaml
//! config:                  # framework file fields, all optional
//!   total_tasks: 3
//!   cpus_per_task: 1
//!   mem_per_task: 512
//! steps:
//!   - offers:
//!       - { id: o1, node: n1, cpus: 2, mem: 1024 }
//!   - status: { task: "1", state: finished }
//!   - error: "master unreachable"
//! expect:
//!   launched: 2
//!   finished: 1
//!   stopped: false
//! ```

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use flotilla_sched::artifact::executor_info;
use flotilla_sched::config::FrameworkConfig;
use flotilla_sched::controller::OfferScheduler;
use flotilla_sched::driver::recording::RecordingDriver;
use flotilla_sched::driver::Scheduler;
use flotilla_sched::lifecycle::{TaskState, TaskStatus};
use flotilla_sched::offer::{ExecutorId, NodeId, OfferId, ResourceOffer, Resources, TaskId, CPUS, MEM};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "scenario-sim", about = "Replay a scheduling scenario")]
struct Cli {
    /// Scenario YAML file.
    scenario: PathBuf,
}

// ── Scenario file ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: Option<serde_yaml::Value>,
    steps: Vec<Step>,
    #[serde(default)]
    expect: Option<Expect>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    Offers(Vec<OfferSpec>),
    Status {
        task: String,
        state: TaskState,
        #[serde(default)]
        message: Option<String>,
    },
    Rescind(String),
    SlaveLost(String),
    ExecutorLost {
        node: String,
        #[serde(default)]
        exit_code: i32,
    },
    Disconnected,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct OfferSpec {
    id: String,
    node: String,
    #[serde(default)]
    hostname: String,
    cpus: f64,
    mem: f64,
}

#[derive(Debug, Deserialize)]
struct Expect {
    launched: Option<usize>,
    finished: Option<usize>,
    stopped: Option<bool>,
}

impl OfferSpec {
    fn to_offer(&self) -> ResourceOffer {
        let mut offer = ResourceOffer::new(
            self.id.as_str(),
            self.node.as_str(),
            Resources::new().with(CPUS, self.cpus).with(MEM, self.mem),
        );
        offer.hostname = self.hostname.clone();
        offer
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

fn load(path: &Path) -> Result<(Scenario, FrameworkConfig)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot open scenario: {}", path.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario: {}", path.display()))?;

    let config = match &scenario.config {
        Some(value) => {
            let yaml = serde_yaml::to_string(value).context("Failed to re-encode config block")?;
            FrameworkConfig::from_yaml(&yaml)?
        }
        None => FrameworkConfig::default(),
    };
    Ok((scenario, config))
}

fn apply(scheduler: &mut OfferScheduler, driver: &mut RecordingDriver, step: &Step) {
    match step {
        Step::Offers(specs) => {
            let offers = specs.iter().map(OfferSpec::to_offer).collect();
            scheduler.resource_offers(driver, offers);
        }
        Step::Status {
            task,
            state,
            message,
        } => {
            let mut status = TaskStatus::now(TaskId::new(task.as_str()), *state);
            if let Some(m) = message {
                status = status.with_message(m.as_str());
            }
            scheduler.status_update(driver, status);
        }
        Step::Rescind(id) => scheduler.offer_rescinded(driver, &OfferId::new(id.as_str())),
        Step::SlaveLost(node) => scheduler.slave_lost(driver, &NodeId::new(node.as_str())),
        Step::ExecutorLost { node, exit_code } => scheduler.executor_lost(
            driver,
            &ExecutorId::new("flotilla"),
            &NodeId::new(node.as_str()),
            *exit_code,
        ),
        Step::Disconnected => scheduler.disconnected(driver),
        Step::Error(message) => scheduler.error(driver, message),
    }
}

fn check(expect: &Expect, scheduler: &OfferScheduler) -> Vec<String> {
    let counters = scheduler.counters();
    let mut failures = Vec::new();
    if let Some(n) = expect.launched {
        if counters.launched != n {
            failures.push(format!("launched: expected {n}, got {}", counters.launched));
        }
    }
    if let Some(n) = expect.finished {
        if counters.finished != n {
            failures.push(format!("finished: expected {n}, got {}", counters.finished));
        }
    }
    if let Some(stopped) = expect.stopped {
        if scheduler.stop_requested() != stopped {
            failures.push(format!(
                "stopped: expected {stopped}, got {}",
                scheduler.stop_requested()
            ));
        }
    }
    failures
}

fn run(cli: &Cli) -> Result<bool> {
    let (scenario, config) = load(&cli.scenario)?;
    info!(
        scenario = %cli.scenario.display(),
        steps = scenario.steps.len(),
        total_tasks = config.total_tasks,
        "replaying scenario"
    );

    let info = executor_info("http://127.0.0.1:12345/flotilla-exec", "./flotilla-exec");
    let mut scheduler = OfferScheduler::new(&config, info).context("Invalid task demand")?;
    let mut driver = RecordingDriver::new();

    for (i, step) in scenario.steps.iter().enumerate() {
        apply(&mut scheduler, &mut driver, step);
        println!("step {}: {:?}", i + 1, step);
        for command in driver.take() {
            println!("    → {command}");
        }
    }

    let c = scheduler.counters();
    println!(
        "result: launched={} finished={} total={} stopped={}",
        c.launched,
        c.finished,
        c.total_requested,
        scheduler.stop_requested()
    );

    let Some(expect) = &scenario.expect else {
        return Ok(true);
    };
    let failures = check(expect, &scheduler);
    for f in &failures {
        error!("expectation failed: {f}");
    }
    Ok(failures.is_empty())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("scenario-sim failed: {:#}", e);
            process::exit(2);
        }
    }
}
