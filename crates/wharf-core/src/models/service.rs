use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        };
        f.write_str(label)
    }
}

/// Host-to-container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Declarative description of a project's container group, handed to the
/// container runtime to materialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Name of the container group; unique per project.
    pub project_name: String,
    pub service_name: String,
    /// Directory owned by the project; the compose file lives here.
    pub workdir: PathBuf,
    /// Image build context (the working tree).
    pub context: PathBuf,
    pub ports: PortMapping,
    pub environment: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Point-in-time state of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub service: String,
    pub state: String,
    #[serde(default)]
    pub status: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub running: bool,
    pub containers: Vec<ContainerInfo>,
}

impl ContainerStatus {
    pub fn from_containers(containers: Vec<ContainerInfo>) -> Self {
        Self {
            running: containers.iter().any(ContainerInfo::is_running),
            containers,
        }
    }
}
