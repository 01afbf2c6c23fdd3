use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectStatus;

/// Phases of a deployment, reported as progress events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentStep {
    Fetching,
    Building,
    Starting,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeploymentEvent {
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        project_id: String,
        from: ProjectStatus,
        to: ProjectStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        project_id: String,
        step: DeploymentStep,
        message: String,
        at: DateTime<Utc>,
    },
    /// Declared status drifted from the runtime and was corrected.
    #[serde(rename_all = "camelCase")]
    ReconciliationCorrected {
        project_id: String,
        declared: ProjectStatus,
        observed_running: bool,
        corrected_to: ProjectStatus,
        /// Set when the drift points at an out-of-band intervention.
        anomaly: bool,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    TeardownFailed {
        project_id: String,
        error: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Deleted {
        project_id: String,
        at: DateTime<Utc>,
    },
}

impl DeploymentEvent {
    pub fn project_id(&self) -> &str {
        match self {
            DeploymentEvent::StatusChanged { project_id, .. }
            | DeploymentEvent::Progress { project_id, .. }
            | DeploymentEvent::ReconciliationCorrected { project_id, .. }
            | DeploymentEvent::TeardownFailed { project_id, .. }
            | DeploymentEvent::Deleted { project_id, .. } => project_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeploymentEvent::StatusChanged { .. } => "statusChanged",
            DeploymentEvent::Progress { .. } => "progress",
            DeploymentEvent::ReconciliationCorrected { .. } => "reconciliationCorrected",
            DeploymentEvent::TeardownFailed { .. } => "teardownFailed",
            DeploymentEvent::Deleted { .. } => "deleted",
        }
    }

    pub fn progress(project_id: &str, step: DeploymentStep, message: impl Into<String>) -> Self {
        DeploymentEvent::Progress {
            project_id: project_id.to_string(),
            step,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
