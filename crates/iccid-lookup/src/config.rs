//! Layered configuration: defaults, then an optional YAML file, then environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::HostSelectors;
use crate::duration_parser::parse_duration;
use crate::engine::EngineConfig;
use crate::errors::LookupError;
use crate::extension_bridge::DEFAULT_WS_ADDR;
use crate::normalizer::DEFAULT_ICCID_PREFIX;
use crate::poller::PollerConfig;

pub const ENV_PREFIX: &str = "ICCID_LOOKUP_PREFIX";
pub const ENV_BRIDGE_ADDR: &str = "ICCID_LOOKUP_BRIDGE_ADDR";
pub const ENV_TIMEOUT: &str = "ICCID_LOOKUP_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub addr: String,
    /// How long to wait for the browser extension to attach.
    #[serde(with = "crate::duration_parser")]
    pub connect_timeout: Duration,
    /// Per-script evaluation timeout.
    #[serde(with = "crate::duration_parser")]
    pub eval_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_WS_ADDR.to_string(),
            connect_timeout: Duration::from_secs(30),
            eval_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub prefix: String,
    pub bridge: BridgeConfig,
    pub engine: EngineConfig,
    pub poller: PollerConfig,
    pub selectors: HostSelectors,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_ICCID_PREFIX.to_string(),
            bridge: BridgeConfig::default(),
            engine: EngineConfig::default(),
            poller: PollerConfig::default(),
            selectors: HostSelectors::default(),
        }
    }
}

impl LookupConfig {
    /// Build the effective configuration from defaults, `path` (if any), and
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, LookupError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, LookupError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LookupError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loaded configuration file");
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, LookupError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| LookupError::InvalidConfig(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, LookupError> {
        serde_yaml::to_string(self).map_err(|e| LookupError::InvalidConfig(e.to_string()))
    }

    /// Apply overrides read through `lookup`, which stands in for the environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), LookupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup(ENV_PREFIX) {
            debug!(%prefix, "Prefix overridden from environment");
            self.prefix = prefix.trim().to_string();
        }
        if let Some(addr) = lookup(ENV_BRIDGE_ADDR) {
            debug!(%addr, "Bridge address overridden from environment");
            self.bridge.addr = addr.trim().to_string();
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            self.poller.timeout = parse_duration(&timeout)?;
            debug!(timeout = ?self.poller.timeout, "Poll timeout overridden from environment");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LookupError> {
        if self.prefix.trim().is_empty() {
            return Err(LookupError::InvalidConfig(
                "prefix must not be empty".to_string(),
            ));
        }
        if !self.prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(LookupError::InvalidConfig(format!(
                "prefix must be digits only, got {:?}",
                self.prefix
            )));
        }
        if self.bridge.addr.trim().is_empty() {
            return Err(LookupError::InvalidConfig(
                "bridge address must not be empty".to_string(),
            ));
        }
        self.engine.validate()?;
        self.poller.validate()?;
        Ok(())
    }
}
