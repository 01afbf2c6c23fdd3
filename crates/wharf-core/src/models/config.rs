use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::service::RestartPolicy;
use crate::error::{Result, WharfError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WharfConfig {
    /// Root for the registry file and per-project working trees.
    pub data_dir: PathBuf,
    pub port_range: PortRange,
    pub reconcile_interval_secs: u64,
    pub timeouts: Timeouts,
    pub container: ContainerSettings,
    pub logging: LoggingConfig,
}

impl Default for WharfConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wharf"),
            port_range: PortRange::default(),
            reconcile_interval_secs: 30,
            timeouts: Timeouts::default(),
            container: ContainerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WharfConfig {
    pub fn validate(&self) -> Result<()> {
        self.port_range
            .validate()
            .map_err(|e| WharfError::InvalidConfig(e.to_string()))?;
        if self.reconcile_interval_secs == 0 {
            return Err(WharfError::InvalidConfig(
                "reconcileIntervalSecs must be greater than zero".into(),
            ));
        }
        self.timeouts.validate()?;
        if self.container.docker_binary.trim().is_empty() {
            return Err(WharfError::InvalidConfig(
                "container.dockerBinary is required".into(),
            ));
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }
}

/// Inclusive range of host ports handed out to projects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 3000,
            end: 3999,
        }
    }
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start == 0 {
            return Err(WharfError::Validation(
                "port range must start at 1 or above".into(),
            ));
        }
        if self.start > self.end {
            return Err(WharfError::Validation(format!(
                "port range start {} is above end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        usize::from(self.end - self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Operation-level timeouts for collaborator calls, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeouts {
    pub fetch_secs: u64,
    pub build_secs: u64,
    pub start_secs: u64,
    pub stop_secs: u64,
    /// Status and log queries.
    pub query_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fetch_secs: 300,
            build_secs: 1800,
            start_secs: 600,
            stop_secs: 120,
            query_secs: 30,
        }
    }
}

impl Timeouts {
    /// A zero timeout would fail every step before it starts.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("fetchSecs", self.fetch_secs),
            ("buildSecs", self.build_secs),
            ("startSecs", self.start_secs),
            ("stopSecs", self.stop_secs),
            ("querySecs", self.query_secs),
        ];
        for (name, secs) in fields {
            if secs == 0 {
                return Err(WharfError::InvalidConfig(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerSettings {
    pub docker_binary: String,
    /// Image used for build commands and for repositories without a Dockerfile.
    pub base_image: String,
    pub restart_policy: RestartPolicy,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            docker_binary: "docker".into(),
            base_image: "node:20-alpine".into(),
            restart_policy: RestartPolicy::UnlessStopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            file: None,
        }
    }
}
