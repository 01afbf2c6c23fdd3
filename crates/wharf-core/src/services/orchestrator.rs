use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::error::{Result, WharfError};
use crate::models::project::validate_port;
use crate::models::{
    DeploymentEvent, DeploymentRequest, DeploymentStep, PortStatistics, Project, ProjectFilter,
    ProjectPatch, ProjectStatus, ProjectStatusReport, ServiceSpec, TransitionOrigin, WharfConfig,
};
use crate::services::fetcher::RepositoryFetcher;
use crate::services::lifecycle::{with_timeout, Lifecycle, ANY_STATUS};
use crate::services::locks::ProjectGuard;
use crate::services::notifier::EventNotifier;
use crate::services::registry::ProjectRegistry;
use crate::services::runtime::ContainerRuntime;
use crate::services::synchronizer::StatusSynchronizer;

const ORCHESTRATOR: TransitionOrigin = TransitionOrigin::Orchestrator;

/// Drives projects from intake through build to running, stopped or error.
///
/// Every mutating operation holds the project's lock for its whole duration,
/// so operations on one id are serialized while different ids proceed
/// concurrently. Reads go straight to the registry and never wait on a lock.
pub struct DeploymentOrchestrator {
    lifecycle: Arc<Lifecycle>,
    /// Serializes uniqueness checks, port reservation and record creation.
    intake: Mutex<()>,
}

impl DeploymentOrchestrator {
    pub fn new(
        config: WharfConfig,
        registry: Arc<dyn ProjectRegistry>,
        fetcher: Arc<dyn RepositoryFetcher>,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(
                config, registry, fetcher, runtime, notifier,
            )),
            intake: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WharfConfig {
        &self.lifecycle.config
    }

    /// A synchronizer sharing this orchestrator's registry and locks.
    pub fn synchronizer(&self) -> StatusSynchronizer {
        StatusSynchronizer::new(self.lifecycle.clone())
    }

    /// Move records left in `deploying` by a previous process into `error`.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let stuck = self
            .lifecycle
            .registry
            .list(&ProjectFilter::with_status(&[ProjectStatus::Deploying]))
            .await?;
        let mut recovered = Vec::new();
        for project in stuck {
            let _guard = self.lifecycle.locks.lock(&project.id).await;
            let result = self
                .lifecycle
                .commit_transition(
                    &project.id,
                    &[ProjectStatus::Deploying],
                    ProjectStatus::Error,
                    ORCHESTRATOR,
                    Some("deployment interrupted".into()),
                    |_| {},
                )
                .await;
            match result {
                Ok(_) => {
                    tracing::warn!(project_id = %project.id, "recovered interrupted deployment");
                    recovered.push(project.id);
                }
                Err(WharfError::NotFound(_)) | Err(WharfError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    /// Accept a deployment request and run it to `running` or `error`.
    ///
    /// Validation, conflict and port exhaustion errors are returned before
    /// anything is written. A failure after the record exists leaves it in
    /// `error` with the reason recorded, releases the port and returns the
    /// failure.
    pub async fn deploy_project(&self, request: DeploymentRequest) -> Result<Project> {
        request.validate()?;
        let (project, _guard) = self.intake(request).await?;
        tracing::info!(
            project_id = %project.id,
            port = project.port,
            repository = %project.repository,
            "deployment accepted"
        );
        self.run_deployment(project).await
    }

    /// Wipe the working tree, fetch, build and start again. This is the
    /// retry path out of `error`.
    pub async fn redeploy_project(&self, id: &str) -> Result<Option<Project>> {
        let _guard = self.lifecycle.locks.lock(id).await;
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(None);
        };
        if project.status == ProjectStatus::Running {
            let spec = self.lifecycle.service_spec(&project);
            self.lifecycle
                .progress(id, DeploymentStep::Stopping, "stopping previous deployment");
            if let Err(e) = self.stop_containers(&spec).await {
                return Err(self.fail(&project, e).await);
            }
        }
        let project = self.begin(project).await?;
        self.run_deployment(project).await.map(Some)
    }

    pub async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>> {
        self.lifecycle.registry.get(id).await
    }

    pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        self.lifecycle.registry.list(filter).await
    }

    /// Merge `patch` into the record. Name, domain and port changes are
    /// checked for uniqueness the same way as at intake. A port change on a
    /// running project restarts it on the new port.
    pub async fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Option<Project>> {
        patch.validate()?;
        let _guard = self.lifecycle.locks.lock(id).await;
        let Some(mut project) = self.lifecycle.registry.get(id).await? else {
            return Ok(None);
        };

        let new_name = patch.name.clone().filter(|n| *n != project.name);
        let new_domain = patch
            .domain
            .clone()
            .filter(|d| !d.eq_ignore_ascii_case(&project.domain));
        let new_port = patch.port.filter(|p| *p != project.port);

        {
            let _intake = self.intake.lock().await;
            self.ensure_unique(new_name.as_deref(), new_domain.as_deref(), Some(id))
                .await?;
            if let Some(port) = new_port {
                if project.holds_port() {
                    self.lifecycle.ports.claim(port).await?;
                } else if self.lifecycle.ports.is_in_use(port).await? {
                    return Err(WharfError::Conflict(format!(
                        "port {port} is already in use"
                    )));
                }
            }

            patch.apply(&mut project);
            let written = self.lifecycle.registry.put(&project).await;
            if let Some(port) = new_port {
                if written.is_ok() {
                    self.lifecycle.ports.commit(port).await;
                } else {
                    self.lifecycle.ports.release(port).await;
                }
            }
            written?;
        }
        tracing::info!(project_id = id, "project updated");

        if new_port.is_some() && project.status == ProjectStatus::Running {
            return self.bring_up(project, true).await.map(Some);
        }
        Ok(Some(project))
    }

    pub async fn update_project_port(&self, id: &str, port: u16) -> Result<Option<Project>> {
        self.update_project(
            id,
            ProjectPatch {
                port: Some(port),
                ..Default::default()
            },
        )
        .await
    }

    /// Tear down and remove a project. Waits for any in-flight operation on
    /// it. Container teardown is best effort: a failure is reported as a
    /// diagnostic event and the record is still removed.
    pub async fn delete_project(&self, id: &str) -> Result<bool> {
        let guard = self.lifecycle.locks.lock(id).await;
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            drop(guard);
            self.lifecycle.locks.forget(id);
            return Ok(false);
        };

        let spec = self.lifecycle.service_spec(&project);
        self.lifecycle
            .progress(id, DeploymentStep::Stopping, "tearing down containers");
        if let Some(e) = self.lifecycle.teardown_quietly(&spec).await {
            self.lifecycle.notifier.emit(DeploymentEvent::TeardownFailed {
                project_id: id.to_string(),
                error: e.to_string(),
                at: Utc::now(),
            });
        }

        match project.status {
            ProjectStatus::Running => {
                self.lifecycle
                    .commit_transition(id, &[ProjectStatus::Running], ProjectStatus::Stopped, ORCHESTRATOR, None, |_| {})
                    .await?;
            }
            ProjectStatus::Deploying => {
                self.lifecycle
                    .commit_transition(
                        id,
                        &[ProjectStatus::Deploying],
                        ProjectStatus::Error,
                        ORCHESTRATOR,
                        Some("deleted while deploying".into()),
                        |_| {},
                    )
                    .await?;
            }
            ProjectStatus::Stopped | ProjectStatus::Error => {}
        }

        let workdir = self.lifecycle.workdir(id);
        if workdir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                tracing::warn!(project_id = id, error = %e, "failed to remove working tree");
            }
        }

        self.lifecycle.registry.delete(id).await?;
        self.lifecycle.ports.release(project.port).await;
        tracing::info!(project_id = id, "project deleted");
        self.lifecycle.notifier.emit(DeploymentEvent::Deleted {
            project_id: id.to_string(),
            at: Utc::now(),
        });

        drop(guard);
        self.lifecycle.locks.forget(id);
        Ok(true)
    }

    /// Stop then start the container group. On failure the project is left
    /// in `error`.
    pub async fn restart_project(&self, id: &str) -> Result<bool> {
        let _guard = self.lifecycle.locks.lock(id).await;
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(false);
        };
        self.bring_up(project, true).await?;
        Ok(true)
    }

    /// Start a stopped or failed project. Starting a running one is a no-op.
    pub async fn start_project(&self, id: &str) -> Result<bool> {
        let _guard = self.lifecycle.locks.lock(id).await;
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(false);
        };
        match project.status {
            ProjectStatus::Running => Ok(true),
            ProjectStatus::Deploying => Err(WharfError::Conflict(format!(
                "project '{id}' is still deploying"
            ))),
            ProjectStatus::Stopped | ProjectStatus::Error => {
                self.bring_up(project, false).await?;
                Ok(true)
            }
        }
    }

    /// Stop a running project. Stopping a stopped one is a no-op.
    pub async fn stop_project(&self, id: &str) -> Result<bool> {
        let _guard = self.lifecycle.locks.lock(id).await;
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(false);
        };
        match project.status {
            ProjectStatus::Stopped => Ok(true),
            ProjectStatus::Running => {
                let spec = self.lifecycle.service_spec(&project);
                self.lifecycle
                    .progress(id, DeploymentStep::Stopping, "stopping containers");
                if let Err(e) = self.stop_containers(&spec).await {
                    return Err(self.fail(&project, e).await);
                }
                self.lifecycle
                    .commit_transition(id, &[ProjectStatus::Running], ProjectStatus::Stopped, ORCHESTRATOR, None, |_| {})
                    .await?;
                Ok(true)
            }
            from @ (ProjectStatus::Deploying | ProjectStatus::Error) => {
                Err(WharfError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: ProjectStatus::Stopped,
                })
            }
        }
    }

    /// Declared status next to what the runtime reports right now.
    pub async fn get_project_status(&self, id: &str) -> Result<Option<ProjectStatusReport>> {
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(None);
        };
        let spec = self.lifecycle.service_spec(&project);
        let live = with_timeout(
            self.lifecycle.config.timeouts.query(),
            "status",
            WharfError::Runtime,
            self.lifecycle.runtime.status(&spec),
        )
        .await;
        let report = match live {
            Ok(live) => ProjectStatusReport {
                project_id: project.id,
                declared: project.status,
                in_sync: ProjectStatusReport::is_in_sync(project.status, live.running),
                live: Some(live),
                live_error: None,
            },
            Err(e) => {
                tracing::warn!(project_id = id, error = %e, "live status unavailable");
                ProjectStatusReport {
                    project_id: project.id,
                    declared: project.status,
                    live: None,
                    live_error: Some(e.to_string()),
                    in_sync: false,
                }
            }
        };
        Ok(Some(report))
    }

    /// The last `lines` lines of container output.
    pub async fn get_project_logs(&self, id: &str, lines: usize) -> Result<Option<Vec<String>>> {
        if lines == 0 {
            return Err(WharfError::Validation("lines must be at least 1".into()));
        }
        let Some(project) = self.lifecycle.registry.get(id).await? else {
            return Ok(None);
        };
        let spec = self.lifecycle.service_spec(&project);
        let logs = with_timeout(
            self.lifecycle.config.timeouts.query(),
            "logs",
            WharfError::Runtime,
            self.lifecycle.runtime.logs(&spec, lines),
        )
        .await?;
        Ok(Some(logs))
    }

    pub async fn get_port_statistics(&self) -> Result<PortStatistics> {
        self.lifecycle
            .ports
            .statistics(self.lifecycle.config.port_range)
            .await
    }

    pub async fn check_port_availability(&self, port: u16) -> Result<bool> {
        validate_port(port)?;
        Ok(!self.lifecycle.ports.is_in_use(port).await?)
    }

    pub async fn find_available_ports(&self, min: u16, max: u16, count: usize) -> Result<Vec<u16>> {
        self.lifecycle.ports.find_available(min, max, count).await
    }

    /// Uniqueness check, port reservation and record creation as one unit.
    /// Returns the new record with its lock held.
    async fn intake(&self, request: DeploymentRequest) -> Result<(Project, ProjectGuard)> {
        let _intake = self.intake.lock().await;
        self.ensure_unique(Some(&request.name), Some(&request.domain), None)
            .await?;

        let mut created_at = Utc::now();
        let mut id = Project::generate_id(&request.name, created_at);
        while self.lifecycle.registry.get(&id).await?.is_some() {
            created_at += ChronoDuration::milliseconds(1);
            id = Project::generate_id(&request.name, created_at);
        }

        let port = self
            .lifecycle
            .ports
            .reserve(request.port, self.lifecycle.config.port_range)
            .await?;
        let guard = self.lifecycle.locks.lock(&id).await;
        let project = Project::new(id, request, port);
        if let Err(e) = self.lifecycle.registry.put(&project).await {
            self.lifecycle.ports.release(port).await;
            return Err(e);
        }
        self.lifecycle.ports.commit(port).await;
        Ok((project, guard))
    }

    async fn ensure_unique(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
        exclude_id: Option<&str>,
    ) -> Result<()> {
        if name.is_none() && domain.is_none() {
            return Ok(());
        }
        let projects = self.lifecycle.registry.list(&ProjectFilter::all()).await?;
        for existing in projects
            .iter()
            .filter(|p| Some(p.id.as_str()) != exclude_id)
        {
            if name == Some(existing.name.as_str()) {
                return Err(WharfError::Conflict(format!(
                    "project name '{}' is already in use",
                    existing.name
                )));
            }
            if domain.is_some_and(|d| existing.domain.eq_ignore_ascii_case(d)) {
                return Err(WharfError::Conflict(format!(
                    "domain '{}' is already used by project '{}'",
                    existing.domain, existing.name
                )));
            }
        }
        Ok(())
    }

    /// Move a settled project into `deploying`, taking its port back first
    /// if it gave it up on an earlier failure.
    async fn begin(&self, project: Project) -> Result<Project> {
        if project.holds_port() {
            return self
                .lifecycle
                .commit_transition(&project.id, &[project.status], ProjectStatus::Deploying, ORCHESTRATOR, None, |_| {})
                .await;
        }

        let port = self
            .lifecycle
            .ports
            .reserve(Some(project.port), self.lifecycle.config.port_range)
            .await?;
        let result = self
            .lifecycle
            .commit_transition(
                &project.id,
                &[project.status],
                ProjectStatus::Deploying,
                ORCHESTRATOR,
                None,
                |p| p.port = port,
            )
            .await;
        match result {
            Ok(project) => {
                self.lifecycle.ports.commit(port).await;
                Ok(project)
            }
            Err(e) => {
                self.lifecycle.ports.release(port).await;
                Err(e)
            }
        }
    }

    /// Fetch, build and start a project already in `deploying`. The caller
    /// holds its lock.
    async fn run_deployment(&self, project: Project) -> Result<Project> {
        let id = project.id.clone();
        let timeouts = self.lifecycle.config.timeouts.clone();
        let source = self.lifecycle.source_dir(&id);
        let spec = self.lifecycle.service_spec(&project);

        self.lifecycle.progress(
            &id,
            DeploymentStep::Fetching,
            format!("fetching {} ({})", project.repository, project.branch),
        );
        let fetched = with_timeout(
            timeouts.fetch(),
            "fetch",
            WharfError::Fetch,
            self.lifecycle
                .fetcher
                .fetch(&project.repository, &project.branch, &source),
        )
        .await;
        if let Err(e) = fetched {
            return Err(self.fail(&project, e).await);
        }

        if project.build_command.is_some() {
            self.lifecycle
                .progress(&id, DeploymentStep::Building, "running build command");
            let built = with_timeout(
                timeouts.build(),
                "build",
                WharfError::Build,
                self.lifecycle.runtime.build(&source, &spec),
            )
            .await;
            if let Err(e) = built {
                return Err(self.fail(&project, e).await);
            }
        }

        self.start_and_commit(project, &spec, true).await
    }

    /// Bring a settled project back up through `deploying` without fetching.
    /// `stop_first` restarts a group that may still be running.
    async fn bring_up(&self, project: Project, stop_first: bool) -> Result<Project> {
        let project = self.begin(project).await?;
        let spec = self.lifecycle.service_spec(&project);
        if stop_first {
            self.lifecycle
                .progress(&project.id, DeploymentStep::Stopping, "stopping containers");
            if let Err(e) = self.stop_containers(&spec).await {
                return Err(self.fail(&project, e).await);
            }
        }
        self.start_and_commit(project, &spec, false).await
    }

    async fn start_and_commit(
        &self,
        project: Project,
        spec: &ServiceSpec,
        fresh_deploy: bool,
    ) -> Result<Project> {
        self.lifecycle.progress(
            &project.id,
            DeploymentStep::Starting,
            format!("starting on port {}", project.port),
        );
        let started = with_timeout(
            self.lifecycle.config.timeouts.start(),
            "start",
            WharfError::Runtime,
            self.lifecycle.runtime.start(spec),
        )
        .await;
        if let Err(e) = started {
            self.lifecycle.teardown_quietly(spec).await;
            return Err(self.fail(&project, e).await);
        }

        let committed = self
            .lifecycle
            .commit_transition(
                &project.id,
                &[ProjectStatus::Deploying],
                ProjectStatus::Running,
                ORCHESTRATOR,
                None,
                |p| {
                    if fresh_deploy {
                        p.last_deployed = Utc::now();
                    }
                },
            )
            .await;
        match committed {
            Ok(project) => {
                tracing::info!(project_id = %project.id, port = project.port, "project running");
                Ok(project)
            }
            Err(e) => {
                self.lifecycle.teardown_quietly(spec).await;
                Err(self.fail(&project, e).await)
            }
        }
    }

    async fn stop_containers(&self, spec: &ServiceSpec) -> Result<()> {
        with_timeout(
            self.lifecycle.config.timeouts.stop(),
            "stop",
            WharfError::Runtime,
            self.lifecycle.runtime.stop(spec),
        )
        .await
    }

    /// Record a failed step: status `error` with the reason, port released.
    /// Hands the original error back for the caller to return.
    async fn fail(&self, project: &Project, error: WharfError) -> WharfError {
        tracing::error!(project_id = %project.id, error = %error, "deployment step failed");
        let recorded = self
            .lifecycle
            .commit_transition(
                &project.id,
                ANY_STATUS,
                ProjectStatus::Error,
                ORCHESTRATOR,
                Some(error.to_string()),
                |_| {},
            )
            .await;
        if let Err(e) = recorded {
            tracing::error!(project_id = %project.id, error = %e, "failed to record error status");
        }
        self.lifecycle.ports.release(project.port).await;
        error
    }
}
