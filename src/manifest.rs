//! Configuration file parsing for Switchyard
//!
//! Parses `switchyard.toml` using serde. Every section is optional so a
//! bare appliance runs with the built-in defaults.

use crate::error::{Error, Result};
use crate::network::link::validate_interface_name;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load configuration from a file
///
/// A missing file yields the defaults; an unreadable or invalid one is an error.
pub fn load(path: &Path) -> Result<SwitchyardConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = SwitchyardConfig::default();
        config.validate()?;
        return Ok(config);
    }

    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: SwitchyardConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchyardConfig {
    /// Global settings
    #[serde(default)]
    pub config: GlobalConfig,

    /// Paths of the privileged binaries
    #[serde(default)]
    pub binaries: Binaries,

    /// Command time budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Background DHCP verification
    #[serde(default)]
    pub dhcp: DhcpConfig,
}

impl SwitchyardConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_interface_name(&self.config.bridge).map_err(|e| {
            Error::ConfigValidation(format!("invalid bridge name '{}': {}", self.config.bridge, e))
        })?;

        if self.timeouts.command_secs == 0 || self.timeouts.probe_secs == 0 {
            return Err(Error::ConfigValidation(
                "command timeouts must be greater than zero".into(),
            ));
        }

        if self.dhcp.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation(
                "dhcp.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.dhcp.poll_interval() >= self.dhcp.max_wait() {
            return Err(Error::ConfigValidation(format!(
                "dhcp.poll_interval_ms ({}) must be shorter than dhcp.max_wait_secs ({}s)",
                self.dhcp.poll_interval_ms, self.dhcp.max_wait_secs
            )));
        }

        if let Some(wrapper) = &self.config.privilege_wrapper {
            if wrapper.trim().is_empty() {
                return Err(Error::ConfigValidation(
                    "privilege_wrapper must not be empty when set".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Root directory of the per-module JSON documents
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Bridge device the tagging module attaches interfaces to
    #[serde(default = "default_bridge")]
    pub bridge: String,

    /// Optional command prefix (e.g. "sudo") for privileged binaries
    pub privilege_wrapper: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            bridge: default_bridge(),
            privilege_wrapper: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/switchyard")
}

fn default_bridge() -> String {
    "br0".into()
}

/// Locations of the binaries that make up the privileged command surface
#[derive(Debug, Clone, Deserialize)]
pub struct Binaries {
    #[serde(default = "default_ip")]
    pub ip: PathBuf,

    #[serde(default = "default_bridge_bin")]
    pub bridge: PathBuf,

    #[serde(default = "default_dhcp_client")]
    pub dhcp_client: PathBuf,

    #[serde(default = "default_resolver")]
    pub resolver: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            bridge: default_bridge_bin(),
            dhcp_client: default_dhcp_client(),
            resolver: default_resolver(),
        }
    }
}

fn default_ip() -> PathBuf {
    PathBuf::from("/usr/sbin/ip")
}

fn default_bridge_bin() -> PathBuf {
    PathBuf::from("/usr/sbin/bridge")
}

fn default_dhcp_client() -> PathBuf {
    PathBuf::from("/usr/sbin/dhcpcd")
}

fn default_resolver() -> PathBuf {
    PathBuf::from("/usr/bin/resolvectl")
}

fn default_command_secs() -> u64 {
    10
}

fn default_probe_secs() -> u64 {
    5
}

/// Time budgets for privileged commands
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for commands that change state
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Budget for commands that only inspect live state
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
}

impl TimeoutConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            probe_secs: default_probe_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_wait_secs() -> u64 {
    30
}

/// DHCP lease verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct DhcpConfig {
    /// Delay between live-state polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total budget before the lease is declared failed
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl DhcpConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}
