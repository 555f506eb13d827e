//! Configuration loading and types for vip-switch.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Command-line overrides are applied by the binary
//! before [`Config::validate`] runs.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::hooks::executor::validate_command_path;
use crate::hooks::system::{FailurePolicy, HookEvent};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This node's identity and consensus endpoint.
    pub node: NodeConfig,

    /// Cluster membership.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Hook commands per role event.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Role state machine timing.
    #[serde(default)]
    pub state: StateConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Status endpoint and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Node identity.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    /// Unique node identifier.
    #[serde(default)]
    pub id: String,

    /// Consensus (Raft) address of this node, `host:port`.
    #[serde(default)]
    pub raft_addr: String,

    /// Directory for consensus state.
    #[serde(default)]
    pub data_dir: String,
}

/// Cluster membership.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterConfig {
    /// Every voter, including this node.
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

/// A single cluster member.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterNode {
    pub id: String,
    pub addr: String,
}

/// Hook settings.
///
/// Per-event blocks use the event names as YAML keys (`ToMaster`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct HooksConfig {
    /// Master switch; when false every hook is a no-op.
    #[serde(default)]
    pub enabled: bool,

    /// Default hook timeout in seconds.
    #[serde(default = "default_hook_timeout")]
    pub timeout: u64,

    /// Default failure policy: `abort`, `continue` or `retry`.
    #[serde(default = "default_on_failure")]
    pub on_failure: String,

    /// Require configured commands to live in a system binary directory.
    #[serde(default = "default_true")]
    pub strict_paths: bool,

    #[serde(default, rename = "ToMaster")]
    pub to_master: HookDefinition,

    #[serde(default, rename = "ToSlave")]
    pub to_slave: HookDefinition,

    #[serde(default, rename = "ToReady")]
    pub to_ready: HookDefinition,

    #[serde(default, rename = "ToDestroy")]
    pub to_destroy: HookDefinition,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: default_hook_timeout(),
            on_failure: default_on_failure(),
            strict_paths: true,
            to_master: HookDefinition::default(),
            to_slave: HookDefinition::default(),
            to_ready: HookDefinition::default(),
            to_destroy: HookDefinition::default(),
        }
    }
}

/// A single hook as written in the configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HookDefinition {
    /// Command name or path; empty means no hook.
    #[serde(default)]
    pub command: String,

    /// Arguments; may contain template actions.
    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout in seconds, overriding `hooks.timeout`.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Failure policy, overriding `hooks.on_failure`.
    #[serde(default)]
    pub on_failure: Option<String>,

    /// Extra environment; values may contain template actions.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// A hook definition with global defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHook {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub on_failure: String,
    pub environment: BTreeMap<String, String>,
}

impl HooksConfig {
    /// Raw definition for `event`.
    pub fn definition(&self, event: HookEvent) -> &HookDefinition {
        match event {
            HookEvent::ToMaster => &self.to_master,
            HookEvent::ToSlave => &self.to_slave,
            HookEvent::ToReady => &self.to_ready,
            HookEvent::ToDestroy => &self.to_destroy,
        }
    }

    /// Global hook timeout; zero means the built-in default.
    pub fn effective_timeout(&self) -> u64 {
        if self.timeout == 0 {
            default_hook_timeout()
        } else {
            self.timeout
        }
    }

    /// Global failure policy; empty means `abort`.
    pub fn effective_on_failure(&self) -> String {
        if self.on_failure.is_empty() {
            default_on_failure()
        } else {
            self.on_failure.clone()
        }
    }

    /// Definition for `event` with the global timeout and policy applied.
    pub fn hook_for(&self, event: HookEvent) -> ResolvedHook {
        let def = self.definition(event);
        ResolvedHook {
            command: def.command.clone(),
            args: def.args.clone(),
            timeout: Duration::from_secs(
                def.timeout
                    .filter(|t| *t > 0)
                    .unwrap_or_else(|| self.effective_timeout()),
            ),
            on_failure: def
                .on_failure
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| self.effective_on_failure()),
            environment: def.environment.clone(),
        }
    }
}

/// Role state machine timing.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Minimum time between committed transitions, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Leadership poll interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StateConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path; empty logs to stdout.
    #[serde(default)]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: String::new(),
        }
    }
}

/// Observability settings.
///
/// The status endpoint is off by default; metrics are recorded whenever
/// it is on and `metrics` is true.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Serve `/health`, `/status` and `/metrics`.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address for the status endpoint.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Install the Prometheus recorder and serve `/metrics`.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_listen(),
            metrics: true,
        }
    }
}

impl Config {
    /// Check required fields and hook settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.id.is_empty() {
            anyhow::bail!("node.id is required");
        }
        if self.node.raft_addr.is_empty() {
            anyhow::bail!("node.raft_addr is required");
        }
        if self.node.data_dir.is_empty() {
            anyhow::bail!("node.data_dir is required");
        }
        if self.cluster.nodes.is_empty() {
            anyhow::bail!("cluster.nodes must have at least one entry");
        }

        let level = self.logging.level.to_lowercase();
        if !matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
            anyhow::bail!(
                "invalid log level: {} (must be debug, info, warn, or error)",
                self.logging.level
            );
        }
        let format = self.logging.format.to_lowercase();
        if !matches!(format.as_str(), "json" | "text") {
            anyhow::bail!(
                "invalid log format: {} (must be json or text)",
                self.logging.format
            );
        }

        for event in HookEvent::ALL {
            let hook = self.hooks.hook_for(event);
            if FailurePolicy::from_name(&hook.on_failure).is_none() {
                anyhow::bail!(
                    "hooks.{event}.on_failure: unknown strategy '{}' (must be abort, continue, or retry)",
                    hook.on_failure
                );
            }
            if self.hooks.strict_paths && !hook.command.is_empty() {
                validate_command_path(&hook.command)
                    .map_err(|e| anyhow::anyhow!("hooks.{event}.command: {e}"))?;
            }
        }

        Ok(())
    }

    /// Addresses of every cluster member except this node.
    pub fn cluster_peers(&self) -> Vec<String> {
        self.cluster
            .nodes
            .iter()
            .filter(|n| n.id != self.node.id)
            .map(|n| n.addr.clone())
            .collect()
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_hook_timeout() -> u64 {
    60
}

fn default_on_failure() -> String {
    "abort".to_string()
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:9380".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
///
/// Validation is left to the caller so command-line overrides can be
/// applied first.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
node:
  id: node1
  raft_addr: 127.0.0.1:10001
  data_dir: /var/lib/vip-switch
cluster:
  nodes:
    - id: node1
      addr: 127.0.0.1:10001
    - id: node2
      addr: 127.0.0.1:10002
hooks:
  enabled: true
  timeout: 30
  on_failure: continue
  ToMaster:
    command: /usr/local/bin/vip-up
    args: ["--owner", "{{.NodeID}}"]
    timeout: 10
    on_failure: retry
    environment:
      VIP_ADDRESS: 192.168.1.100
      INTERFACE: eth0
  ToSlave:
    command: /usr/local/bin/vip-down
logging:
  level: debug
  format: json
"#;

    fn sample() -> Config {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.node.id, "node1");
        assert_eq!(config.cluster.nodes.len(), 2);
        assert!(config.hooks.enabled);
        assert_eq!(config.hooks.to_master.args, vec!["--owner", "{{.NodeID}}"]);
        assert_eq!(
            config.hooks.to_master.environment["VIP_ADDRESS"],
            "192.168.1.100"
        );
        assert_eq!(config.state.debounce(), Duration::from_secs(2));
        assert_eq!(config.state.poll_interval(), Duration::from_secs(1));
        config.validate().unwrap();
    }

    #[test]
    fn test_hook_for_applies_global_defaults() {
        let config = sample();

        let master = config.hooks.hook_for(HookEvent::ToMaster);
        assert_eq!(master.timeout, Duration::from_secs(10));
        assert_eq!(master.on_failure, "retry");

        let slave = config.hooks.hook_for(HookEvent::ToSlave);
        assert_eq!(slave.timeout, Duration::from_secs(30));
        assert_eq!(slave.on_failure, "continue");

        let ready = config.hooks.hook_for(HookEvent::ToReady);
        assert!(ready.command.is_empty());
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let config: Config = serde_yaml::from_str(
            "node: {id: n1, raft_addr: '127.0.0.1:1', data_dir: /tmp/x}\n\
             cluster: {nodes: [{id: n1, addr: '127.0.0.1:1'}]}\n\
             hooks: {enabled: true, timeout: 0, ToMaster: {command: /bin/true, timeout: 0}}\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.hooks.hook_for(HookEvent::ToMaster).timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_empty_policy_falls_back_to_abort() {
        let config: Config = serde_yaml::from_str(
            "node: {id: n1, raft_addr: '127.0.0.1:1', data_dir: /tmp/x}\n\
             cluster: {nodes: [{id: n1, addr: '127.0.0.1:1'}]}\n\
             hooks: {enabled: true, on_failure: '', ToSlave: {command: /bin/true}}\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.hooks.hook_for(HookEvent::ToSlave).on_failure, "abort");
    }

    #[test]
    fn test_defaults_when_hooks_missing() {
        let config: Config = serde_yaml::from_str(
            "node: {id: n1, raft_addr: '127.0.0.1:1', data_dir: /tmp/x}\ncluster: {nodes: [{id: n1, addr: '127.0.0.1:1'}]}\n",
        )
        .unwrap();
        assert!(!config.hooks.enabled);
        assert_eq!(config.hooks.timeout, 60);
        assert_eq!(config.hooks.on_failure, "abort");
        assert!(config.hooks.strict_paths);
        assert_eq!(config.logging.level, "info");
        assert!(!config.observability.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_required_fields() {
        let mut config = sample();
        config.node.id.clear();
        assert!(config.validate().unwrap_err().to_string().contains("node.id"));

        let mut config = sample();
        config.cluster.nodes.clear();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cluster.nodes"));
    }

    #[test]
    fn test_validate_log_settings() {
        let mut config = sample();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_policy() {
        let mut config = sample();
        config.hooks.to_slave.on_failure = Some("ignore".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ToSlave"), "{err}");
        assert!(err.contains("ignore"), "{err}");
    }

    #[test]
    fn test_validate_strict_paths() {
        let mut config = sample();
        config.hooks.to_master.command = "/tmp/vip-up".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("not in a safe directory"), "{err}");

        config.hooks.strict_paths = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_cluster_peers_excludes_self() {
        assert_eq!(sample().cluster_peers(), vec!["127.0.0.1:10002"]);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            serde_yaml::from_str(include_str!("../vip-switch.example.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster_peers().len(), 2);
        assert_eq!(
            config.hooks.hook_for(HookEvent::ToReady).on_failure,
            "continue"
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.node.raft_addr, "127.0.0.1:10001");
    }
}
