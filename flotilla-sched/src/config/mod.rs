//! Framework configuration and local agent inventory.
//!
//! Two YAML files feed the scheduler:
//!
//! * the **framework file** ([`FrameworkConfig`]) sizes the run:
//! ```yaml
//! name: "flotilla"
//! total_tasks: 5
//! cpus_per_task: 1
//! mem_per_task: 128
//! artifact_server_address: "http://127.0.0.1:12345"
//! refuse_seconds: 1
//! on_error: continue
//! ```
//!
//! * the **agent inventory** ([`AgentInventory`]) describes the nodes the
//!   local transport offers:
//! ```yaml
//! agents:
//!   node01:
//!     hostname: "worker-a"
//!     cpus: 4
//!     mem: 8192
//!     attributes:
//!       rack: "r1"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::driver::DEFAULT_REFUSE_SECONDS;
use crate::offer::{NodeId, Resources, CPUS, MEM};

// ── ErrorPolicy ───────────────────────────────────────────────────────────────

/// What the controller does when the transport reports an `error` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log and keep scheduling; the transport's own cadence recovers.
    #[default]
    Continue,
    /// Kill every active task and stop the driver.
    Abort,
}

// ── FrameworkConfig ───────────────────────────────────────────────────────────

/// Framework file layout.  Every field is optional in YAML; absent values
/// fall back to [`FrameworkConfig::default`].
#[derive(Debug, Deserialize)]
struct FrameworkFile {
    name: Option<String>,
    total_tasks: Option<u32>,
    cpus_per_task: Option<f64>,
    mem_per_task: Option<f64>,
    artifact_server_address: Option<String>,
    refuse_seconds: Option<f64>,
    on_error: Option<ErrorPolicy>,
}

/// Everything the controller needs to size and drive one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkConfig {
    /// Framework name logged by the controller and the local transport at
    /// registration.
    pub name: String,
    /// Number of homogeneous work units to run.  Must be `> 0`.
    pub total_tasks: u32,
    /// CPUs reserved per task.  Must be `> 0`.
    pub cpus_per_task: f64,
    /// Memory (MB) reserved per task.  Must be `> 0`.
    pub mem_per_task: f64,
    /// Base URL of the artifact server (`http://host:port`).  Sent to every
    /// task as its payload.  Replaced by the live server address through
    /// [`use_artifact_server`](Self::use_artifact_server) when the scheduler
    /// serves the executor itself.
    pub artifact_server_address: String,
    /// Refusal duration attached to launches and declines.
    pub refuse_seconds: f64,
    pub on_error: ErrorPolicy,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            name: String::from("Flotilla Framework (Rust)"),
            total_tasks: 5,
            cpus_per_task: 1.0,
            mem_per_task: 128.0,
            artifact_server_address: String::from("http://127.0.0.1:12345"),
            refuse_seconds: DEFAULT_REFUSE_SECONDS,
            on_error: ErrorPolicy::Continue,
        }
    }
}

impl FrameworkConfig {
    /// Parse a framework file and validate the result.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is invalid, or
    /// a value fails [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading framework configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid framework configuration: {}", path.display()))
    }

    /// Parse framework YAML from a string and validate the result.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: FrameworkFile =
            serde_yaml::from_str(content).context("Failed to parse framework YAML")?;

        let defaults = Self::default();
        let config = Self {
            name: file.name.unwrap_or(defaults.name),
            total_tasks: file.total_tasks.unwrap_or(defaults.total_tasks),
            cpus_per_task: file.cpus_per_task.unwrap_or(defaults.cpus_per_task),
            mem_per_task: file.mem_per_task.unwrap_or(defaults.mem_per_task),
            artifact_server_address: file
                .artifact_server_address
                .unwrap_or(defaults.artifact_server_address),
            refuse_seconds: file.refuse_seconds.unwrap_or(defaults.refuse_seconds),
            on_error: file.on_error.unwrap_or(defaults.on_error),
        };
        config.validate()?;

        debug!(
            total_tasks = config.total_tasks,
            cpus = config.cpus_per_task,
            mem = config.mem_per_task,
            "framework configuration parsed"
        );
        Ok(config)
    }

    /// Check the value ranges the controller relies on.
    pub fn validate(&self) -> Result<()> {
        if self.total_tasks == 0 {
            bail!("total_tasks must be > 0");
        }
        if !(self.cpus_per_task.is_finite() && self.cpus_per_task > 0.0) {
            bail!("cpus_per_task must be > 0, got {}", self.cpus_per_task);
        }
        if !(self.mem_per_task.is_finite() && self.mem_per_task > 0.0) {
            bail!("mem_per_task must be > 0, got {}", self.mem_per_task);
        }
        if !(self.refuse_seconds.is_finite() && self.refuse_seconds >= 0.0) {
            bail!("refuse_seconds must be >= 0, got {}", self.refuse_seconds);
        }
        Ok(())
    }

    /// Point task payloads at the artifact server actually serving.
    ///
    /// Returns the configured address when it differed from `uri`.
    pub fn use_artifact_server(&mut self, uri: &str) -> Option<String> {
        if self.artifact_server_address == uri {
            return None;
        }
        Some(std::mem::replace(
            &mut self.artifact_server_address,
            uri.to_string(),
        ))
    }

    /// Resources reserved for every task.
    pub fn per_task_resources(&self) -> Resources {
        Resources::new()
            .with(CPUS, self.cpus_per_task)
            .with(MEM, self.mem_per_task)
    }
}

// ── AgentInventory ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentFile {
    #[serde(default)]
    agents: HashMap<String, AgentEntry>,
}

#[derive(Debug, Deserialize)]
struct AgentEntry {
    hostname: Option<String>,
    cpus: f64,
    mem: f64,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// One simulated worker node of the local transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub node_id: NodeId,
    pub hostname: String,
    /// Total capacity; the local transport offers whatever is not reserved.
    pub resources: Resources,
    pub attributes: BTreeMap<String, String>,
}

impl AgentConfig {
    /// The agent used when no inventory file is supplied, or the file lists
    /// no agents.
    pub fn default_agent() -> Self {
        Self {
            node_id: NodeId::new("default_agent"),
            hostname: String::from("localhost"),
            resources: Resources::new().with(CPUS, 2.0).with(MEM, 1024.0),
            attributes: BTreeMap::new(),
        }
    }
}

/// Loads and holds the agents the local transport simulates.
#[derive(Debug, Default)]
pub struct AgentInventory {
    agents: BTreeMap<NodeId, AgentConfig>,
    loaded: bool,
}

impl AgentInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory holding only [`AgentConfig::default_agent`].
    pub fn with_default_agent() -> Self {
        let mut inventory = Self::new();
        inventory.insert(AgentConfig::default_agent());
        inventory
    }

    pub fn insert(&mut self, agent: AgentConfig) {
        self.agents.insert(agent.node_id.clone(), agent);
    }

    /// Parse `path` and replace all previously loaded agents.
    ///
    /// An empty `agents` section yields the single default agent.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is invalid, or
    /// an agent declares negative capacity.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading agent inventory from: {}", path.display());

        self.agents.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open agent inventory: {}", path.display()))?;

        let file: AgentFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        for (name, entry) in file.agents {
            if entry.cpus < 0.0 || entry.mem < 0.0 {
                bail!(
                    "agent '{}' declares negative capacity (cpus={}, mem={})",
                    name,
                    entry.cpus,
                    entry.mem
                );
            }
            let agent = AgentConfig {
                node_id: NodeId::new(name.clone()),
                hostname: entry.hostname.unwrap_or_else(|| name.clone()),
                resources: Resources::new().with(CPUS, entry.cpus).with(MEM, entry.mem),
                attributes: entry.attributes,
            };
            debug!(
                "  Agent: {} | Host: {} | Resources: {}",
                agent.node_id, agent.hostname, agent.resources
            );
            self.insert(agent);
        }

        if self.agents.is_empty() {
            warn!("No agents found in inventory file, using default agent");
            self.insert(AgentConfig::default_agent());
        }

        self.loaded = true;
        info!("Successfully loaded {} agent(s)", self.agents.len());
        Ok(())
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&AgentConfig> {
        self.agents.get(node_id)
    }

    /// Agents in node-id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// `true` after a successful [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── FrameworkConfig ───────────────────────────────────────────────────────

    #[test]
    fn full_framework_file_parses() {
        let yaml = r#"
name: "batch"
total_tasks: 3
cpus_per_task: 1
mem_per_task: 512
artifact_server_address: "http://10.0.0.1:8080"
refuse_seconds: 5
on_error: abort
"#;
        let cfg = FrameworkConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.name, "batch");
        assert_eq!(cfg.total_tasks, 3);
        assert_eq!(cfg.cpus_per_task, 1.0);
        assert_eq!(cfg.mem_per_task, 512.0);
        assert_eq!(cfg.artifact_server_address, "http://10.0.0.1:8080");
        assert_eq!(cfg.refuse_seconds, 5.0);
        assert_eq!(cfg.on_error, ErrorPolicy::Abort);
    }

    #[test]
    fn use_artifact_server_reports_replaced_address() {
        let mut cfg = FrameworkConfig {
            artifact_server_address: "http://10.0.0.1:8080".into(),
            ..Default::default()
        };
        assert_eq!(
            cfg.use_artifact_server("http://127.0.0.1:12345"),
            Some("http://10.0.0.1:8080".to_string())
        );
        assert_eq!(cfg.artifact_server_address, "http://127.0.0.1:12345");
        assert_eq!(cfg.use_artifact_server("http://127.0.0.1:12345"), None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = FrameworkConfig::from_yaml("total_tasks: 2\n").unwrap();
        let defaults = FrameworkConfig::default();
        assert_eq!(cfg.total_tasks, 2);
        assert_eq!(cfg.cpus_per_task, defaults.cpus_per_task);
        assert_eq!(cfg.refuse_seconds, 1.0);
        assert_eq!(cfg.on_error, ErrorPolicy::Continue);
    }

    #[test]
    fn zero_tasks_is_rejected() {
        assert!(FrameworkConfig::from_yaml("total_tasks: 0\n").is_err());
    }

    #[test]
    fn non_positive_resources_are_rejected() {
        assert!(FrameworkConfig::from_yaml("cpus_per_task: 0\n").is_err());
        assert!(FrameworkConfig::from_yaml("mem_per_task: -5\n").is_err());
        assert!(FrameworkConfig::from_yaml("refuse_seconds: -1\n").is_err());
    }

    #[test]
    fn unknown_error_policy_is_rejected() {
        assert!(FrameworkConfig::from_yaml("on_error: explode\n").is_err());
    }

    #[test]
    fn load_from_file_reads_yaml() {
        let f = yaml_tempfile("total_tasks: 7\nmem_per_task: 64\n");
        let cfg = FrameworkConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.total_tasks, 7);
        assert_eq!(cfg.per_task_resources().get(MEM), 64.0);
    }

    #[test]
    fn missing_framework_file_returns_error() {
        assert!(FrameworkConfig::load_from_file(Path::new("/nonexistent/flotilla.yaml")).is_err());
    }

    // ── AgentInventory ────────────────────────────────────────────────────────

    #[test]
    fn load_agent_inventory() {
        let yaml = r#"
agents:
  node01:
    hostname: "worker-a"
    cpus: 4
    mem: 8192
    attributes:
      rack: "r1"
  node02:
    cpus: 1.5
    mem: 512
"#;
        let f = yaml_tempfile(yaml);
        let mut inv = AgentInventory::new();
        inv.load_from_file(f.path()).unwrap();

        assert!(inv.is_loaded());
        assert_eq!(inv.len(), 2);

        let a = inv.get(&NodeId::new("node01")).unwrap();
        assert_eq!(a.hostname, "worker-a");
        assert_eq!(a.resources.get(CPUS), 4.0);
        assert_eq!(a.attributes.get("rack").map(String::as_str), Some("r1"));

        let b = inv.get(&NodeId::new("node02")).unwrap();
        assert_eq!(b.hostname, "node02", "hostname defaults to the node name");
        assert_eq!(b.resources.get(MEM), 512.0);
    }

    #[test]
    fn agents_iterate_in_node_order() {
        let yaml = "agents:\n  b:\n    cpus: 1\n    mem: 1\n  a:\n    cpus: 1\n    mem: 1\n";
        let f = yaml_tempfile(yaml);
        let mut inv = AgentInventory::new();
        inv.load_from_file(f.path()).unwrap();
        let ids: Vec<&str> = inv.agents().map(|a| a.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_inventory_inserts_default_agent() {
        let f = yaml_tempfile("agents: {}\n");
        let mut inv = AgentInventory::new();
        inv.load_from_file(f.path()).unwrap();
        assert!(inv.get(&NodeId::new("default_agent")).is_some());
    }

    #[test]
    fn negative_capacity_is_rejected() {
        let f = yaml_tempfile("agents:\n  n:\n    cpus: -1\n    mem: 10\n");
        let mut inv = AgentInventory::new();
        assert!(inv.load_from_file(f.path()).is_err());
        assert!(!inv.is_loaded());
    }

    #[test]
    fn reload_replaces_previous_agents() {
        let f1 = yaml_tempfile("agents:\n  n1:\n    cpus: 1\n    mem: 1\n");
        let f2 = yaml_tempfile("agents:\n  n2:\n    cpus: 1\n    mem: 1\n");
        let mut inv = AgentInventory::new();
        inv.load_from_file(f1.path()).unwrap();
        inv.load_from_file(f2.path()).unwrap();
        assert!(inv.get(&NodeId::new("n1")).is_none(), "old agent must be gone");
        assert!(inv.get(&NodeId::new("n2")).is_some());
    }
}
