use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectStatus;
use super::service::ContainerStatus;

/// A port claimed by a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub port: u16,
    pub project_id: String,
    pub project_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortStatistics {
    pub range_start: u16,
    pub range_end: u16,
    pub total: usize,
    /// Ports in the range held by projects or in-flight reservations.
    pub in_use: usize,
    pub available: usize,
    /// Every port held by a project, including those outside the range.
    pub allocations: Vec<PortAllocation>,
}

/// Declared versus live state for one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusReport {
    pub project_id: String,
    pub declared: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<ContainerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_error: Option<String>,
    pub in_sync: bool,
}

impl ProjectStatusReport {
    /// `deploying` is in flux and never counted as drift.
    pub fn is_in_sync(declared: ProjectStatus, live_running: bool) -> bool {
        match declared {
            ProjectStatus::Deploying => true,
            ProjectStatus::Running => live_running,
            ProjectStatus::Stopped | ProjectStatus::Error => !live_running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCorrection {
    pub project_id: String,
    pub from: ProjectStatus,
    pub to: ProjectStatus,
    pub anomaly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationFailure {
    pub project_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checked: usize,
    pub corrections: Vec<StatusCorrection>,
    /// Projects with an operation in flight or still deploying.
    pub skipped: Vec<String>,
    pub failures: Vec<ReconciliationFailure>,
}

impl ReconciliationReport {
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            checked: 0,
            corrections: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &StatusCorrection> {
        self.corrections.iter().filter(|c| c.anomaly)
    }
}
