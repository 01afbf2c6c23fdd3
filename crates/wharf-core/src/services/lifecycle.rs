use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::{Result, WharfError};
use crate::models::{
    DeploymentEvent, DeploymentStep, PortMapping, Project, ProjectStatus, ServiceSpec,
    TransitionOrigin, WharfConfig,
};
use crate::services::fetcher::RepositoryFetcher;
use crate::services::locks::ProjectLocks;
use crate::services::notifier::EventNotifier;
use crate::services::ports::PortAllocator;
use crate::services::registry::ProjectRegistry;
use crate::services::runtime::ContainerRuntime;

pub(crate) const ANY_STATUS: &[ProjectStatus] = &[
    ProjectStatus::Deploying,
    ProjectStatus::Running,
    ProjectStatus::Stopped,
    ProjectStatus::Error,
];

/// Collaborators and bookkeeping shared by the orchestrator and the
/// synchronizer.
pub(crate) struct Lifecycle {
    pub config: WharfConfig,
    pub registry: Arc<dyn ProjectRegistry>,
    pub fetcher: Arc<dyn RepositoryFetcher>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub notifier: Arc<dyn EventNotifier>,
    pub ports: PortAllocator,
    pub locks: ProjectLocks,
}

impl Lifecycle {
    pub fn new(
        config: WharfConfig,
        registry: Arc<dyn ProjectRegistry>,
        fetcher: Arc<dyn RepositoryFetcher>,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            ports: PortAllocator::new(registry.clone()),
            locks: ProjectLocks::new(),
            config,
            registry,
            fetcher,
            runtime,
            notifier,
        }
    }

    /// `<dataDir>/workspaces/<id>`: everything on disk that belongs to a project.
    pub fn workdir(&self, id: &str) -> PathBuf {
        self.config.workspaces_dir().join(id)
    }

    /// The project's working tree.
    pub fn source_dir(&self, id: &str) -> PathBuf {
        self.workdir(id).join("source")
    }

    pub fn service_spec(&self, project: &Project) -> ServiceSpec {
        let mut environment = project.environment.clone();
        let container_port = environment
            .get("PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(project.port);
        environment
            .entry("PORT".to_string())
            .or_insert_with(|| container_port.to_string());

        let mut labels = BTreeMap::new();
        labels.insert("wharf.project".to_string(), project.id.clone());
        labels.insert("wharf.domain".to_string(), project.domain.clone());

        ServiceSpec {
            project_name: format!("wharf-{}", project.id),
            service_name: project.name.to_ascii_lowercase(),
            workdir: self.workdir(&project.id),
            context: self.source_dir(&project.id),
            ports: PortMapping {
                host: project.port,
                container: container_port,
            },
            environment,
            restart_policy: self.config.container.restart_policy,
            build_command: project.build_command.clone(),
            start_command: project.start_command.clone(),
            labels,
        }
    }

    /// The only place declared status is written. Re-reads the record and
    /// checks it is still in one of the `expected` states before committing.
    /// Callers hold the project's lock.
    pub async fn commit_transition<F>(
        &self,
        id: &str,
        expected: &[ProjectStatus],
        next: ProjectStatus,
        origin: TransitionOrigin,
        reason: Option<String>,
        mutate: F,
    ) -> Result<Project>
    where
        F: FnOnce(&mut Project) + Send,
    {
        let mut project = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| WharfError::NotFound(id.to_string()))?;
        if !expected.contains(&project.status) {
            return Err(WharfError::Conflict(format!(
                "project '{id}' is {}, expected one of {}",
                project.status,
                expected
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let from = project.status;
        project.transition(next, origin)?;
        project.last_error = match next {
            ProjectStatus::Error => reason.clone(),
            _ => None,
        };
        mutate(&mut project);
        self.registry.put(&project).await?;

        tracing::info!(project_id = id, %from, to = %next, "status changed");
        self.notifier.emit(DeploymentEvent::StatusChanged {
            project_id: id.to_string(),
            from,
            to: next,
            reason,
            at: Utc::now(),
        });
        Ok(project)
    }

    pub fn progress(&self, id: &str, step: DeploymentStep, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(project_id = id, ?step, %message, "deployment progress");
        self.notifier
            .emit(DeploymentEvent::progress(id, step, message));
    }

    /// Best-effort teardown used while unwinding a failure.
    pub async fn teardown_quietly(&self, spec: &ServiceSpec) -> Option<WharfError> {
        let result = with_timeout(
            self.config.timeouts.stop(),
            "stop",
            WharfError::Runtime,
            self.runtime.stop(spec),
        )
        .await;
        match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(project = %spec.project_name, error = %e, "teardown failed");
                Some(e)
            }
        }
    }
}

/// Run a collaborator call with an operation timeout. Expiry counts as a
/// failure of that step.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    step: &str,
    on_timeout: fn(String) -> WharfError,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "{step} timed out after {}s",
            limit.as_secs()
        ))),
    }
}
