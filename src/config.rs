use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::error::{ShareError, ShareResult};

// ─── Embedded Default ────────────────────────────────────────────────────
/// Baked into the binary at compile time so the connector never depends on a
/// config file being present.
const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

const STATE_FILE_NAME: &str = "rm01_connection_state";

// ─── TOML Structs ───────────────────────────────────────────────────────

/// Root configuration: parsed from TOML, then overridden by CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Empty string = `<temp dir>/rm01_connection_state`
    pub state_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(deserialize_with = "deserialize_ipv4_net")]
    pub static_address: Ipv4Net,
    pub dns: Ipv4Addr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub vendor_id: String,
    pub product_ids: Vec<String>,
    pub name_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub query_secs: u64,
    pub script_secs: u64,
    pub prompt_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    pub stop_grace_ms: u64,
}

// ─── Defaults ───────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".into(),
            state_file: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            static_address: Ipv4Net::new(Ipv4Addr::new(10, 10, 99, 100), 24)
                .expect("BUG: /24 is a valid IPv4 prefix"),
            dns: Ipv4Addr::new(8, 8, 8, 8),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            vendor_id: "0b95".into(),
            product_ids: vec!["1790".into(), "178a".into()],
            name_patterns: vec!["ax88179".into()],
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            query_secs: 5,
            script_secs: 30,
            prompt_secs: 120,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            stop_grace_ms: 2000,
        }
    }
}

fn deserialize_ipv4_net<'de, D>(deserializer: D) -> Result<Ipv4Net, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.trim()
        .parse::<Ipv4Net>()
        .map_err(|_| serde::de::Error::custom(format!("invalid CIDR address: \"{s}\"")))
}

// ─── Accessors ──────────────────────────────────────────────────────────

impl Config {
    /// Standard config file path: ~/.config/rm01/config.toml
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rm01")
            .join("config.toml")
    }

    /// Resolved location of the CLI's last-known-interfaces file.
    pub fn state_file(&self) -> PathBuf {
        let configured = self.general.state_file.trim();
        if configured.is_empty() {
            std::env::temp_dir().join(STATE_FILE_NAME)
        } else {
            PathBuf::from(configured)
        }
    }

    /// Address assigned to the adapter, e.g. 10.10.99.100
    pub fn static_ip(&self) -> Ipv4Addr {
        self.network.static_address.addr()
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.query_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.script_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.prompt_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sampler.interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.sampler.stop_grace_ms)
    }
}

// ─── Loading ────────────────────────────────────────────────────────────

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, the standard path is
/// used when present and the embedded defaults otherwise. Unlike the state
/// file, nothing is ever written here.
pub fn load(explicit: Option<&Path>) -> ShareResult<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Config::config_path();
            if !p.exists() {
                debug!("No config at {}, using embedded defaults", p.display());
                return parse(DEFAULT_CONFIG_TOML);
            }
            p
        }
    };

    let toml_str = std::fs::read_to_string(&path).map_err(|e| {
        ShareError::Config(format!("Failed to read config from {}: {}", path.display(), e))
    })?;
    let config = parse(&toml_str).map_err(|e| {
        ShareError::Config(format!(
            "{} ({}). Run `rm01 --print-default-config` for a template.",
            e,
            path.display()
        ))
    })?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse a TOML document into a Config, filling gaps with defaults.
pub fn parse(toml_str: &str) -> ShareResult<Config> {
    toml::from_str(toml_str).map_err(|e| ShareError::Config(e.to_string()))
}

/// Returns the embedded default config TOML string.
pub fn default_config_toml() -> &'static str {
    DEFAULT_CONFIG_TOML
}
