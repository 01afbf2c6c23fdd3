use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WharfError};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").unwrap());

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)*[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$")
        .unwrap()
});

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProjectStatus {
    Deploying,
    Running,
    Stopped,
    Error,
}

/// Who is asking for a status change. The orchestrator drives deployments;
/// the synchronizer only aligns declared status with what the runtime reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    Orchestrator,
    Reconciliation,
}

impl ProjectStatus {
    /// Whether a project in this status holds its port. A project in `error`
    /// has given its port back and keeps the number only as a preference.
    pub fn holds_port(self) -> bool {
        !matches!(self, ProjectStatus::Error)
    }

    pub fn can_transition_to(self, next: ProjectStatus, origin: TransitionOrigin) -> bool {
        use ProjectStatus::*;
        match origin {
            TransitionOrigin::Orchestrator => matches!(
                (self, next),
                (Deploying, Running)
                    | (Running, Stopped)
                    | (Stopped, Deploying)
                    | (Running, Deploying)
                    | (Error, Deploying)
                    | (_, Error)
            ),
            TransitionOrigin::Reconciliation => matches!(
                (self, next),
                (Running, Error) | (Stopped, Running) | (Error, Running)
            ),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub repository: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub port: u16,
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
}

impl Project {
    /// Build a fresh record in `deploying` from an accepted request.
    pub fn new(id: String, request: DeploymentRequest, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: request.name,
            domain: request.domain.to_ascii_lowercase(),
            repository: request.repository,
            branch: request.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            build_command: request.build_command,
            start_command: request.start_command,
            environment: request.environment,
            port,
            status: ProjectStatus::Deploying,
            last_error: None,
            created_at: now,
            updated_at: now,
            last_deployed: now,
        }
    }

    /// Generate an id from the project name and a creation timestamp.
    pub fn generate_id(name: &str, created_at: DateTime<Utc>) -> String {
        format!("{}-{}", name.to_ascii_lowercase(), created_at.timestamp_millis())
    }

    pub fn holds_port(&self) -> bool {
        self.status.holds_port()
    }

    /// Apply a status change, rejecting anything the state machine forbids.
    pub fn transition(&mut self, next: ProjectStatus, origin: TransitionOrigin) -> Result<()> {
        if !self.status.can_transition_to(next, origin) {
            return Err(WharfError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A validated-by-the-caller request to deploy a new project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub name: String,
    pub domain: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Preferred host port. Falls back to a range scan when taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl DeploymentRequest {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_domain(&self.domain)?;
        validate_repository(&self.repository)?;
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        if let Some(port) = self.port {
            validate_port(port)?;
        }
        Ok(())
    }
}

/// Partial update of a project's user-editable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub build_command: Option<Option<String>>,
    pub start_command: Option<Option<String>>,
    pub environment: Option<BTreeMap<String, String>>,
    pub port: Option<u16>,
}

impl ProjectPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(domain) = &self.domain {
            validate_domain(domain)?;
        }
        if let Some(repository) = &self.repository {
            validate_repository(repository)?;
        }
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        if let Some(port) = self.port {
            validate_port(port)?;
        }
        Ok(())
    }

    /// Merge into `project`. Does not touch status or timestamps other than
    /// `updated_at`.
    pub fn apply(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(domain) = self.domain {
            project.domain = domain.to_ascii_lowercase();
        }
        if let Some(repository) = self.repository {
            project.repository = repository;
        }
        if let Some(branch) = self.branch {
            project.branch = branch;
        }
        if let Some(build_command) = self.build_command {
            project.build_command = build_command;
        }
        if let Some(start_command) = self.start_command {
            project.start_command = start_command;
        }
        if let Some(environment) = self.environment {
            project.environment = environment;
        }
        if let Some(port) = self.port {
            project.port = port;
        }
        project.updated_at = Utc::now();
    }
}

/// Registry query. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub statuses: Option<Vec<ProjectStatus>>,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub port: Option<u16>,
}

impl ProjectFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(statuses: &[ProjectStatus]) -> Self {
        Self {
            statuses: Some(statuses.to_vec()),
            ..Self::default()
        }
    }

    /// Projects currently holding a port.
    pub fn port_holders() -> Self {
        Self::with_status(&[
            ProjectStatus::Deploying,
            ProjectStatus::Running,
            ProjectStatus::Stopped,
        ])
    }

    pub fn matches(&self, project: &Project) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&project.status) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &project.name != name {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if !project.domain.eq_ignore_ascii_case(domain) {
                return false;
            }
        }
        if let Some(port) = self.port {
            if project.port != port {
                return false;
            }
        }
        true
    }
}

fn validate_name(name: &str) -> Result<()> {
    if !NAME_RE.is_match(name) {
        return Err(WharfError::Validation(format!(
            "project name '{name}' must be 1-63 characters of letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.len() > 253 || !DOMAIN_RE.is_match(&domain.to_ascii_lowercase()) {
        return Err(WharfError::Validation(format!(
            "'{domain}' is not a valid hostname"
        )));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<()> {
    let trimmed = repository.trim();
    if trimmed.is_empty() {
        return Err(WharfError::Validation("repository is required".into()));
    }
    // Would be parsed as an option by git.
    if trimmed.starts_with('-') {
        return Err(WharfError::Validation(format!(
            "repository '{repository}' may not start with '-'"
        )));
    }
    Ok(())
}

fn validate_branch(branch: &str) -> Result<()> {
    if branch.trim().is_empty() || branch.starts_with('-') || branch.contains("..") {
        return Err(WharfError::Validation(format!(
            "'{branch}' is not a valid branch name"
        )));
    }
    Ok(())
}

pub(crate) fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(WharfError::Validation("port must be between 1 and 65535".into()));
    }
    Ok(())
}
