use std::{
    collections::HashSet,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use busmux::{
    config::{ArbiterConfig, CacheConfig},
    dsa::{PortType, PvlanListing},
};
use log::warn;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::{fs::read_to_string, io};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_loglevel", deserialize_with = "deserialize_loglevel")]
    pub loglevel: log::LevelFilter,
    #[serde(default)]
    pub arbiter: ArbiterSection,
    pub sensor: Option<SensorConfig>,
    pub switch: SwitchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_loglevel() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn deserialize_loglevel<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<log::LevelFilter, D::Error> {
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    log::LevelFilter::from_str(&raw).map_err(|_| D::Error::custom(format!("invalid loglevel {raw:?}")))
}

/// Settle timings, in microseconds
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ArbiterSection {
    #[serde(default = "default_jitter_min")]
    pub settle_jitter_min: u64,
    #[serde(default = "default_jitter_max")]
    pub settle_jitter_max: u64,
    #[serde(default = "default_settle_fixed")]
    pub settle_fixed: u64,
}

fn default_jitter_min() -> u64 {
    100
}

fn default_jitter_max() -> u64 {
    200
}

fn default_settle_fixed() -> u64 {
    1000
}

impl Default for ArbiterSection {
    fn default() -> Self {
        Self {
            settle_jitter_min: default_jitter_min(),
            settle_jitter_max: default_jitter_max(),
            settle_fixed: default_settle_fixed(),
        }
    }
}

impl From<ArbiterSection> for ArbiterConfig {
    fn from(section: ArbiterSection) -> Self {
        ArbiterConfig {
            settle_jitter_min: Duration::from_micros(section.settle_jitter_min),
            settle_jitter_max: Duration::from_micros(section.settle_jitter_max),
            settle_fixed: Duration::from_micros(section.settle_fixed),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SensorConfig {
    /// Character device of the i2c adapter, e.g. `/dev/i2c-0`
    pub bus: PathBuf,
    #[serde(default = "default_sensor_address")]
    pub address: u16,
    /// Maximum age of cached readings, in milliseconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_read_bursts")]
    pub read_bursts: u32,
}

fn default_sensor_address() -> u16 {
    0x4c
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_read_bursts() -> u32 {
    20
}

impl SensorConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            refresh_interval: Duration::from_millis(self.refresh_interval),
            read_bursts: self.read_bursts,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PortKind {
    Unused,
    Cpu,
    Dsa,
    User,
}

impl From<PortKind> for PortType {
    fn from(kind: PortKind) -> Self {
        match kind {
            PortKind::Unused => PortType::Unused,
            PortKind::Cpu => PortType::Cpu,
            PortKind::Dsa => PortType::Dsa,
            PortKind::User => PortType::User,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortConfig {
    pub index: u8,
    pub kind: PortKind,
    #[serde(default)]
    pub hwtstamp: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PvlanListingConfig {
    AllPorts,
    #[default]
    SkipUnused,
}

impl From<PvlanListingConfig> for PvlanListing {
    fn from(listing: PvlanListingConfig) -> Self {
        match listing {
            PvlanListingConfig::AllPorts => PvlanListing::AllPorts,
            PvlanListingConfig::SkipUnused => PvlanListing::SkipUnused,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SwitchConfig {
    /// Name of the master network device
    pub master: String,
    #[serde(default = "default_tag_protocol")]
    pub tag_protocol: String,
    /// Tag protocols that are known but cannot be loaded
    #[serde(default)]
    pub unavailable_protocols: Vec<String>,
    #[serde(default)]
    pub pvlan_listing: PvlanListingConfig,
    pub ports: Vec<PortConfig>,
}

fn default_tag_protocol() -> String {
    "brcm".to_owned()
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_control_path")]
    pub control_path: Option<PathBuf>,
    #[serde(default = "default_control_permissions")]
    pub control_permissions: u32,
}

fn default_control_path() -> Option<PathBuf> {
    Some(PathBuf::from("/run/busmux/control.sock"))
}

fn default_control_permissions() -> u32 {
    0o660
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            control_path: default_control_path(),
            control_permissions: default_control_permissions(),
        }
    }
}

impl Config {
    /// Parse config from file
    pub async fn from_file(file: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(&file)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).await?;
        Ok(toml::de::from_str(&contents)?)
    }

    /// Check that the config is reasonable
    pub fn check(&self) -> bool {
        let mut ok = true;
        let ports = &self.switch.ports;

        if ports.iter().all(|p| p.kind != PortKind::Cpu) {
            warn!("No cpu port configured.");
            ok = false;
        }

        if ports.len() > 16 {
            warn!("Too many ports are configured.");
            ok = false;
        }

        let mut seen = HashSet::new();
        for port in ports {
            if !seen.insert(port.index) {
                warn!("Port {} is configured more than once.", port.index);
                ok = false;
            }
        }

        let arbiter = &self.arbiter;
        if arbiter.settle_jitter_min > arbiter.settle_jitter_max {
            warn!("settle-jitter-min exceeds settle-jitter-max.");
            ok = false;
        }

        if let Some(sensor) = &self.sensor {
            if sensor.address > 0x7f {
                warn!("Sensor address {:#x} is not a 7 bit address.", sensor.address);
                ok = false;
            }
        }

        ok
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error while reading config: {0}")]
    Io(#[from] io::Error),
    #[error("config toml parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}
