use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, WharfError};
use crate::models::{
    DeploymentEvent, Project, ProjectFilter, ProjectStatus, ReconciliationFailure,
    ReconciliationReport, StatusCorrection, TransitionOrigin,
};
use crate::services::lifecycle::{with_timeout, Lifecycle};

/// Aligns declared project status with the live state the container runtime
/// reports. Never deploys anything; it only corrects records.
#[derive(Clone)]
pub struct StatusSynchronizer {
    lifecycle: Arc<Lifecycle>,
}

impl StatusSynchronizer {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Reconcile one project, or every project when `project_id` is `None`.
    pub async fn reconcile(&self, project_id: Option<&str>) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::begin();
        let projects = match project_id {
            Some(id) => vec![self
                .lifecycle
                .registry
                .get(id)
                .await?
                .ok_or_else(|| WharfError::NotFound(id.to_string()))?],
            None => self.lifecycle.registry.list(&ProjectFilter::all()).await?,
        };

        for project in projects {
            self.reconcile_one(project, &mut report).await;
        }
        report.finished_at = Utc::now();

        if report.corrections.is_empty() && report.failures.is_empty() {
            tracing::debug!(checked = report.checked, "reconciliation found no drift");
        } else {
            tracing::info!(
                checked = report.checked,
                corrections = report.corrections.len(),
                failures = report.failures.len(),
                skipped = report.skipped.len(),
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    async fn reconcile_one(&self, listed: Project, report: &mut ReconciliationReport) {
        let id = listed.id;
        // Another operation owns the project right now; it decides the status.
        let Some(guard) = self.lifecycle.locks.try_lock(&id) else {
            report.skipped.push(id);
            return;
        };
        let project = match self.lifecycle.registry.get(&id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                // Deleted since it was listed; drop the entry try_lock made.
                drop(guard);
                self.lifecycle.locks.forget(&id);
                return;
            }
            Err(e) => {
                report.failures.push(failure(&id, &e));
                return;
            }
        };
        if project.status == ProjectStatus::Deploying {
            report.skipped.push(id);
            return;
        }
        report.checked += 1;

        let spec = self.lifecycle.service_spec(&project);
        let live = with_timeout(
            self.lifecycle.config.timeouts.query(),
            "status",
            WharfError::Runtime,
            self.lifecycle.runtime.status(&spec),
        )
        .await;
        let live = match live {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!(project_id = %id, error = %e, "could not query live state");
                report.failures.push(failure(&id, &e));
                return;
            }
        };

        let (target, anomaly, reason) = match (project.status, live.running) {
            (ProjectStatus::Running, false) => (
                ProjectStatus::Error,
                false,
                Some("container is no longer running".to_string()),
            ),
            (ProjectStatus::Stopped, true) | (ProjectStatus::Error, true) => {
                (ProjectStatus::Running, true, None)
            }
            _ => return,
        };

        // A failed project gave its port up; take it back only if free.
        let reclaim = !project.holds_port() && target.holds_port();
        if reclaim {
            if let Err(e) = self.lifecycle.ports.claim(project.port).await {
                tracing::warn!(
                    project_id = %id,
                    port = project.port,
                    error = %e,
                    "container is running but its port now belongs elsewhere"
                );
                report.failures.push(failure(&id, &e));
                return;
            }
        }

        let committed = self
            .lifecycle
            .commit_transition(
                &id,
                &[project.status],
                target,
                TransitionOrigin::Reconciliation,
                reason,
                |_| {},
            )
            .await;
        if reclaim {
            if committed.is_ok() {
                self.lifecycle.ports.commit(project.port).await;
            } else {
                self.lifecycle.ports.release(project.port).await;
            }
        }
        if let Err(e) = committed {
            report.failures.push(failure(&id, &e));
            return;
        }

        if anomaly {
            tracing::warn!(
                project_id = %id,
                declared = %project.status,
                "container running without the platform starting it"
            );
        } else {
            tracing::info!(project_id = %id, declared = %project.status, to = %target, "corrected drift");
        }
        self.lifecycle
            .notifier
            .emit(DeploymentEvent::ReconciliationCorrected {
                project_id: id.clone(),
                declared: project.status,
                observed_running: live.running,
                corrected_to: target,
                anomaly,
                at: Utc::now(),
            });
        report.corrections.push(StatusCorrection {
            project_id: id,
            from: project.status,
            to: target,
            anomaly,
        });
    }

    /// Reconcile every project on a fixed interval until the handle is
    /// aborted.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = self.reconcile(None).await {
                    tracing::error!(error = %e, "reconciliation pass failed");
                }
            }
        })
    }
}

fn failure(id: &str, error: &WharfError) -> ReconciliationFailure {
    ReconciliationFailure {
        project_id: id.to_string(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentRequest, WharfConfig};
    use crate::services::fetcher::GitFetcher;
    use crate::services::registry::FileRegistry;
    use crate::services::runtime::DockerComposeRuntime;

    async fn lifecycle(dir: &std::path::Path) -> Arc<Lifecycle> {
        let config = WharfConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let registry = Arc::new(FileRegistry::open(&config.registry_path()).await.unwrap());
        let runtime = Arc::new(DockerComposeRuntime::new(config.container.clone()));
        Arc::new(Lifecycle::new(
            config,
            registry,
            Arc::new(GitFetcher::new()),
            runtime,
            Arc::new(()),
        ))
    }

    #[tokio::test]
    async fn vanished_project_leaves_no_lock_behind() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path()).await;
        let synchronizer = StatusSynchronizer::new(lifecycle.clone());

        // Listed, then deleted before the pass reached it.
        let request = DeploymentRequest {
            name: "gone".into(),
            domain: "gone.test".into(),
            repository: "https://git.example.com/gone.git".into(),
            ..Default::default()
        };
        let listed = Project::new("gone-1".into(), request, 3000);
        let mut report = ReconciliationReport::begin();
        synchronizer.reconcile_one(listed, &mut report).await;

        assert_eq!(report.checked, 0);
        assert!(report.corrections.is_empty());
        assert!(report.failures.is_empty());
        assert!(lifecycle.locks.is_empty());
    }
}
