//! partd.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver name used when the config does not set one.
pub const DEFAULT_DRIVER: &str = "gpu.partgrid.io";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub node: NodeConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseConfig {
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    /// Overall deadline for one round of hardware queries.
    #[serde(default = "default_backend_deadline")]
    pub backend_deadline_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            backend_deadline_secs: default_backend_deadline(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// JSON list of GPU capability descriptors.
    pub capabilities_file: Option<PathBuf>,
    /// JSON map: address → profile id → placements.
    pub topology_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Version reported by the static version source (e.g. "v1.34.1").
    pub version: Option<String>,
    pub thresholds: Option<ThresholdsConfig>,
}

/// Minimum control-plane versions per feature, overriding the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub partitionable_devices: Option<String>,
    pub consumable_capacity: Option<String>,
    pub separated_counters: Option<String>,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

fn default_resync_interval() -> u64 {
    60
}

fn default_backend_deadline() -> u64 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/var/lib/partd/slices")
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node.name.trim().is_empty() {
            return Err(ConfigError::Invalid("node.name must not be empty".into()));
        }
        if self.node.driver.trim().is_empty() {
            return Err(ConfigError::Invalid("node.driver must not be empty".into()));
        }
        if self.advertise.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "advertise.resync_interval_secs must be positive".into(),
            ));
        }
        if self.advertise.backend_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "advertise.backend_deadline_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config for the given node name.
    pub fn scaffold(node_name: &str) -> Self {
        AgentConfig {
            node: NodeConfig {
                name: node_name.to_string(),
                driver: default_driver(),
            },
            advertise: AdvertiseConfig::default(),
            hardware: HardwareConfig {
                capabilities_file: Some(PathBuf::from("/etc/partd/capabilities.json")),
                topology_file: Some(PathBuf::from("/etc/partd/topology.json")),
            },
            control_plane: ControlPlaneConfig {
                version: Some("v1.34.0".to_string()),
                thresholds: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_round_trips() {
        let config = AgentConfig::scaffold("gpu-node-1");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("gpu-node-1"));
        let parsed = AgentConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.node.driver, DEFAULT_DRIVER);
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[node]
name = "n1"
"#;
        let config = AgentConfig::parse(toml_str).unwrap();
        assert_eq!(config.node.name, "n1");
        assert_eq!(config.node.driver, DEFAULT_DRIVER);
        assert_eq!(config.advertise.resync_interval_secs, 60);
        assert_eq!(config.advertise.backend_deadline_secs, 30);
        assert!(config.control_plane.version.is_none());
    }

    #[test]
    fn test_parse_threshold_overrides() {
        let toml_str = r#"
[node]
name = "n1"

[control_plane]
version = "v1.33.4"

[control_plane.thresholds]
consumable_capacity = "1.36.0"
"#;
        let config = AgentConfig::parse(toml_str).unwrap();
        let thresholds = config.control_plane.thresholds.unwrap();
        assert_eq!(thresholds.consumable_capacity.as_deref(), Some("1.36.0"));
        assert!(thresholds.partitionable_devices.is_none());
    }

    #[test]
    fn test_rejects_empty_node_name() {
        let toml_str = r#"
[node]
name = "  "
"#;
        assert!(matches!(
            AgentConfig::parse(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_file_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partd.toml");
        std::fs::write(&path, "[node]\nname = \"n2\"\ndriver = \"mig.example.com\"\n").unwrap();
        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.node.driver, "mig.example.com");
    }
}
