//! ChainPilot configuration: chains, endpoint addresses and component
//! timing, loaded from YAML or JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastConfig;
use crate::error::PilotError;
use crate::liveness::LivenessConfig;
use crate::poller::PollerConfig;
use crate::policy::RetryConfig;
use crate::types::TxOptions;

/// Supplies the static list of chains and their endpoint addresses.
pub trait ConfigProvider {
    fn chains(&self) -> Vec<(String, ChainConfig)>;
}

/// One logical chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// On-chain id signed into requests, e.g. "osmosis-1".
    pub chain_id: String,
    /// HTTP JSON-RPC endpoints, one per replica.
    pub rpc_addrs: Vec<String>,
    /// WebSocket endpoints for streaming heights (optional)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ws_addrs: Vec<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,
    /// e.g. "0.01uosmo"
    #[serde(default)]
    pub gas_prices: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,
}

fn default_timeout_ms() -> u64 { 20_000 }
fn default_gas_adjustment() -> f64 { 1.2 }

impl ChainConfig {
    pub fn new(chain_id: impl Into<String>, rpc_addrs: Vec<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            rpc_addrs,
            ws_addrs: vec![],
            timeout_ms: default_timeout_ms(),
            gas_adjustment: default_gas_adjustment(),
            gas_prices: String::new(),
            memo: String::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn tx_options(&self) -> TxOptions {
        TxOptions {
            memo: self.memo.clone(),
            gas_limit: None,
            gas_adjustment: self.gas_adjustment,
            gas_prices: self.gas_prices.clone(),
        }
    }
}

/// Liveness monitor timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    pub tick_interval_ms: u64,
    pub stale_after_ms: u64,
    pub probe_timeout_ms: u64,
    /// Stop monitoring a chain after this long without an active endpoint
    /// (null = never)
    pub idle_shutdown_ms: Option<u64>,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            stale_after_ms: 9_000,
            probe_timeout_ms: 5_000,
            idle_shutdown_ms: Some(600_000),
        }
    }
}

impl From<&LivenessSettings> for LivenessConfig {
    fn from(s: &LivenessSettings) -> Self {
        Self {
            tick_interval: Duration::from_millis(s.tick_interval_ms),
            stale_after: Duration::from_millis(s.stale_after_ms),
            probe_timeout: Duration::from_millis(s.probe_timeout_ms),
            idle_shutdown: s.idle_shutdown_ms.map(Duration::from_millis),
        }
    }
}

/// Block poller timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub driver_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub select_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            driver_interval_ms: 1_000,
            poll_interval_ms: 1_000,
            select_backoff_ms: 9_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl From<&PollerSettings> for PollerConfig {
    fn from(s: &PollerSettings) -> Self {
        Self {
            driver_interval: Duration::from_millis(s.driver_interval_ms),
            poll_interval: Duration::from_millis(s.poll_interval_ms),
            select_backoff: Duration::from_millis(s.select_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
        }
    }
}

/// Confirmation budgets of the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub ack_attempts: u32,
    pub ack_interval_ms: u64,
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            ack_attempts: 5,
            ack_interval_ms: 400,
            confirm_attempts: 12,
            confirm_interval_ms: 5_000,
            deadline_ms: None,
        }
    }
}

/// Log level per component, applied by the CLI's tracing subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Chain used when a command names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_chain: Option<String>,
    /// chain name → chain config
    pub chains: BTreeMap<String, ChainConfig>,
    #[serde(default)]
    pub liveness: LivenessSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl PilotConfig {
    /// Sample configuration with public Cosmos Hub and Osmosis endpoints.
    pub fn default_config() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(
            "cosmoshub".to_string(),
            ChainConfig {
                gas_prices: "0.01uatom".into(),
                ..ChainConfig::new(
                    "cosmoshub-4",
                    vec!["https://cosmoshub-4.technofractal.com:443".into()],
                )
            },
        );
        chains.insert(
            "osmosis".to_string(),
            ChainConfig {
                gas_prices: "0.01uosmo".into(),
                ..ChainConfig::new(
                    "osmosis-1",
                    vec!["https://osmosis-1.technofractal.com:443".into()],
                )
            },
        );
        Self {
            default_chain: Some("cosmoshub".into()),
            chains,
            liveness: LivenessSettings::default(),
            poller: PollerSettings::default(),
            broadcast: BroadcastSettings::default(),
            log: LogConfig::default(),
        }
    }

    /// Load and validate a config file. `.json` files are read as JSON,
    /// anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PilotError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PilotError::Config(format!("cannot read {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_yaml_str(&raw)?
        };
        tracing::debug!(path = %path.display(), chains = config.chains.len(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PilotError> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| PilotError::Config(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PilotError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| PilotError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, PilotError> {
        serde_yaml::to_string(self).map_err(|e| PilotError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), PilotError> {
        if self.chains.is_empty() {
            return Err(PilotError::Config("no chains configured".into()));
        }
        for (name, chain) in &self.chains {
            if chain.rpc_addrs.is_empty() {
                return Err(PilotError::Config(format!("chain {name} has no rpc_addrs")));
            }
            if chain.chain_id.is_empty() {
                return Err(PilotError::Config(format!("chain {name} has an empty chain_id")));
            }
            if chain.timeout_ms == 0 {
                return Err(PilotError::Config(format!("chain {name} has a zero timeout_ms")));
            }
        }
        if let Some(default) = &self.default_chain {
            if !self.chains.contains_key(default) {
                return Err(PilotError::Config(format!("default chain {default} is not configured")));
            }
        }

        let l = &self.liveness;
        if l.tick_interval_ms == 0 || l.probe_timeout_ms == 0 {
            return Err(PilotError::Config("liveness intervals must be non-zero".into()));
        }
        if l.stale_after_ms >= l.tick_interval_ms {
            return Err(PilotError::Config(
                "liveness.stale_after_ms must be shorter than tick_interval_ms".into(),
            ));
        }
        if self.poller.driver_interval_ms == 0 || self.poller.poll_interval_ms == 0 {
            return Err(PilotError::Config("poller intervals must be non-zero".into()));
        }
        if self.broadcast.ack_attempts == 0 || self.broadcast.confirm_attempts == 0 {
            return Err(PilotError::Config("broadcast attempts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn chain(&self, name: &str) -> Result<&ChainConfig, PilotError> {
        self.chains
            .get(name)
            .ok_or_else(|| PilotError::UnknownChain(name.to_string()))
    }

    /// The configured default chain, or the first one.
    pub fn default_chain_name(&self) -> Option<&str> {
        self.default_chain
            .as_deref()
            .or_else(|| self.chains.keys().next().map(String::as_str))
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig::from(&self.liveness)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::from(&self.poller)
    }

    /// Broadcaster settings for `chain`, with its chain id and fee options.
    pub fn broadcast_config(&self, chain: &str) -> Result<BroadcastConfig, PilotError> {
        let chain = self.chain(chain)?;
        let b = &self.broadcast;
        Ok(BroadcastConfig {
            chain_id: chain.chain_id.clone(),
            ack_retry: RetryConfig::fixed(b.ack_attempts, Duration::from_millis(b.ack_interval_ms)),
            confirm_retry: RetryConfig::fixed(
                b.confirm_attempts,
                Duration::from_millis(b.confirm_interval_ms),
            ),
            deadline: b.deadline_ms.map(Duration::from_millis),
            tx_options: chain.tx_options(),
        })
    }
}

impl ConfigProvider for PilotConfig {
    fn chains(&self) -> Vec<(String, ChainConfig)> {
        self.chains
            .iter()
            .map(|(name, chain)| (name.clone(), chain.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_chain: osmosis
chains:
  osmosis:
    chain_id: osmosis-1
    rpc_addrs:
      - https://rpc-a.osmosis.example:443
      - https://rpc-b.osmosis.example:443
    ws_addrs:
      - wss://rpc-a.osmosis.example:443/websocket
    gas_prices: 0.025uosmo
liveness:
  tick_interval_ms: 5000
  stale_after_ms: 4000
log:
  level: debug
  components:
    chainpilot-core: trace
"#;

    #[test]
    fn default_config_is_valid() {
        let config = PilotConfig::default_config();
        config.validate().unwrap();
        assert_eq!(config.default_chain_name(), Some("cosmoshub"));
        assert_eq!(config.chain("osmosis").unwrap().chain_id, "osmosis-1");
    }

    #[test]
    fn yaml_with_defaults() {
        let config = PilotConfig::from_yaml_str(SAMPLE).unwrap();
        let osmo = config.chain("osmosis").unwrap();
        assert_eq!(osmo.rpc_addrs.len(), 2);
        assert_eq!(osmo.timeout(), Duration::from_secs(20));
        assert_eq!(osmo.gas_adjustment, 1.2);

        let liveness = config.liveness_config();
        assert_eq!(liveness.tick_interval, Duration::from_secs(5));
        assert_eq!(liveness.probe_timeout, Duration::from_secs(5));
        assert_eq!(liveness.idle_shutdown, Some(Duration::from_secs(600)));
        assert_eq!(config.poller_config(), PollerConfig::default());
        assert_eq!(config.log.components["chainpilot-core"], "trace");
    }

    #[test]
    fn yaml_output_reloads() {
        let config = PilotConfig::default_config();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(PilotConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn json_config() {
        let raw = r#"{"chains":{"juno":{"chain_id":"juno-1","rpc_addrs":["https://rpc.juno.example"]}}}"#;
        let config = PilotConfig::from_json_str(raw).unwrap();
        assert_eq!(config.default_chain_name(), Some("juno"));
    }

    #[test]
    fn validation_errors() {
        let mut config = PilotConfig::default_config();
        config.liveness.stale_after_ms = config.liveness.tick_interval_ms;
        assert!(matches!(config.validate(), Err(PilotError::Config(_))));

        let mut config = PilotConfig::default_config();
        config.default_chain = Some("juno".into());
        assert!(config.validate().is_err());

        let mut config = PilotConfig::default_config();
        config.chains.get_mut("osmosis").unwrap().rpc_addrs.clear();
        assert!(config.validate().is_err());

        let mut config = PilotConfig::default_config();
        config.chains.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn broadcast_config_per_chain() {
        let config = PilotConfig::default_config();
        let b = config.broadcast_config("osmosis").unwrap();
        assert_eq!(b.chain_id, "osmosis-1");
        assert_eq!(b.tx_options.gas_prices, "0.01uosmo");
        assert_eq!(b.ack_retry.max_attempts, 5);
        assert_eq!(b.confirm_retry.total_delay(), Duration::from_secs(55));
        assert!(matches!(config.broadcast_config("juno"), Err(PilotError::UnknownChain(_))));
    }

    #[test]
    fn provider_lists_every_chain() {
        let config = PilotConfig::default_config();
        let names: Vec<String> = ConfigProvider::chains(&config).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["cosmoshub", "osmosis"]);
    }
}
