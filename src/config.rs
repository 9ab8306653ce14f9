use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// App version every eligible gateway is moved to.
pub const TARGET_VERSION: &str = "kubesphere-nginx-ingress-4.12.1";

/// Namespace assumed for selector entries without a namespace component.
pub const CONTROL_NAMESPACE: &str = "kubesphere-controls-system";

pub const OVERRIDE_NAMESPACE: &str = "extension-gateway";
pub const OVERRIDE_CONFIGMAP: &str = "gateway-agent-backend-config";
pub const OVERRIDE_KEY: &str = "config.yaml";

#[derive(Debug, Default)]
pub enum ConfigLoadOption {
    #[default]
    Default,

    Path(PathBuf),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpgradeConfig {
    pub target_version: String,
    pub control_namespace: String,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            target_version: TARGET_VERSION.to_string(),
            control_namespace: CONTROL_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("/mnt/backup"),
        }
    }
}

/// Where the cluster-wide values override document lives. The object is
/// required; resolving a gateway against a cluster without it fails the
/// gateway's upgrade.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OverrideSource {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl Default for OverrideSource {
    fn default() -> Self {
        Self {
            namespace: OVERRIDE_NAMESPACE.to_string(),
            name: OVERRIDE_CONFIGMAP.to_string(),
            key: OVERRIDE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitConfig {
    pub settle_secs: u64,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            settle_secs: 5,
            timeout_secs: 300,
            interval_secs: 5,
        }
    }
}

impl WaitConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub upgrade: UpgradeConfig,
    pub backup: BackupConfig,
    pub override_source: OverrideSource,
    pub wait: WaitConfig,
}

impl Config {
    pub fn load(option: ConfigLoadOption) -> Result<Self> {
        let figment = Figment::new();

        let config = match option {
            ConfigLoadOption::Default => figment.merge(Serialized::defaults(Self::default())),
            ConfigLoadOption::Path(path) => figment
                .merge(Serialized::defaults(Self::default()))
                .merge(Yaml::file(path)),
        }
        .merge(Env::prefixed("GATEWAY_UPGRADER_").split("__"))
        .extract_lossy()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = Config::default();

        assert_eq!(config.upgrade.target_version, TARGET_VERSION);
        assert_eq!(config.upgrade.control_namespace, CONTROL_NAMESPACE);
        assert!(!config.backup.enabled);
        assert_eq!(config.backup.dir, PathBuf::from("/mnt/backup"));
        assert_eq!(config.override_source.namespace, OVERRIDE_NAMESPACE);
        assert_eq!(config.wait.settle(), Duration::from_secs(5));
        assert_eq!(config.wait.timeout(), Duration::from_secs(300));
    }
}
