//! fabricmap.toml configuration parser.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::ranges::{parse_ranges, IdRange, ISID_BOUNDS, VLAN_BOUNDS};
use crate::topology::{StaticHostConfig, StaticMappings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub isid: IsidConfig,
    #[serde(default)]
    pub vlan: VlanConfig,
    #[serde(default)]
    pub binding: BindingConfig,
    pub sdn: Option<SdnConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub static_mappings: BTreeMap<String, StaticHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsidConfig {
    /// `"min:max"` entries available for tenant ISID networks.
    #[serde(default)]
    pub ranges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanConfig {
    /// Range used for dynamic VLAN segments on every physnet.
    #[serde(default = "default_vlan_range")]
    pub dynamic_range: String,
    /// Physnets with statically configured VLAN ranges. Never used for
    /// dynamic segments.
    #[serde(default)]
    pub static_physnets: Vec<String>,
    #[serde(default)]
    pub physnet_mtus: HashMap<String, u32>,
    #[serde(default = "default_mtu")]
    pub default_mtu: u32,
}

impl Default for VlanConfig {
    fn default() -> Self {
        Self {
            dynamic_range: default_vlan_range(),
            static_physnets: Vec::new(),
            physnet_mtus: HashMap::new(),
            default_mtu: default_mtu(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Seconds after which a discovered switch port is considered stale.
    #[serde(default = "default_entry_age")]
    pub dynamic_entry_age: u64,
    #[serde(default = "default_true")]
    pub fallback_to_static: bool,
    /// Seconds without a report after which a host agent counts as down.
    #[serde(default = "default_agent_down_time")]
    pub agent_down_time: u64,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            dynamic_entry_age: default_entry_age(),
            fallback_to_static: true,
            agent_down_time: default_agent_down_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdnConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_sdn_timeout")]
    pub timeout_secs: u64,
    /// Seconds between transaction status polls.
    #[serde(default = "default_tx_check_interval")]
    pub tx_check_interval: u64,
    /// CA bundle for `https` URLs. An empty string disables certificate
    /// verification; absent uses the Mozilla root store.
    #[serde(default)]
    pub cert_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/fabricmap/fabricmap.redb")
}

fn default_vlan_range() -> String {
    "1:4094".to_string()
}

fn default_mtu() -> u32 {
    1500
}

fn default_entry_age() -> u64 {
    30
}

fn default_agent_down_time() -> u64 {
    75
}

fn default_true() -> bool {
    true
}

fn default_sdn_timeout() -> u64 {
    10
}

fn default_tx_check_interval() -> u64 {
    30
}

fn default_listen() -> String {
    "0.0.0.0:9697".to_string()
}

impl FabricConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: FabricConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every derived value so a bad file fails at load time.
    pub fn validate(&self) -> ConfigResult<()> {
        self.isid_ranges()?;
        self.vlan_range()?;
        StaticMappings::from_config(&self.static_mappings)?;
        Ok(())
    }

    pub fn isid_ranges(&self) -> ConfigResult<Vec<IdRange>> {
        parse_ranges(&self.isid.ranges, ISID_BOUNDS)
    }

    pub fn vlan_range(&self) -> ConfigResult<IdRange> {
        IdRange::parse(&self.vlan.dynamic_range, VLAN_BOUNDS)
    }

    /// Static topology, or an empty set when static fallback is disabled.
    pub fn static_mappings(&self) -> ConfigResult<StaticMappings> {
        if !self.binding.fallback_to_static {
            return Ok(StaticMappings::default());
        }
        StaticMappings::from_config(&self.static_mappings)
    }

    pub fn mtu_for(&self, physnet: &str) -> u32 {
        self.vlan
            .physnet_mtus
            .get(physnet)
            .copied()
            .unwrap_or(self.vlan.default_mtu)
    }
}
