// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wharf_core::models::{
    ContainerInfo, ContainerStatus, DeploymentEvent, DeploymentRequest, PortRange, ServiceSpec,
    WharfConfig,
};
use wharf_core::services::fetcher::RepositoryFetcher;
use wharf_core::services::notifier::EventNotifier;
use wharf_core::services::orchestrator::DeploymentOrchestrator;
use wharf_core::services::registry::FileRegistry;
use wharf_core::services::runtime::ContainerRuntime;
use wharf_core::{Result, WharfError};

/// Fetcher that writes a marker file instead of cloning.
#[derive(Default)]
pub struct FakeFetcher {
    failing_urls: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<(String, String, PathBuf)>>,
}

impl FakeFetcher {
    pub fn fail_for(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RepositoryFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), branch.to_string(), dest.to_path_buf()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(WharfError::Fetch(format!("repository '{url}' not found")));
        }
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("package.json"), "{}").await?;
        Ok(())
    }
}

/// In-memory container runtime keyed by compose project name.
#[derive(Default)]
pub struct FakeRuntime {
    running: Mutex<HashMap<String, bool>>,
    specs: Mutex<HashMap<String, ServiceSpec>>,
    pub fail_build: Mutex<bool>,
    pub fail_start: Mutex<bool>,
    pub fail_stop: Mutex<bool>,
    pub fail_status: Mutex<bool>,
    pub builds: Mutex<Vec<String>>,
    pub starts: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
    /// Start and stop calls in the order they happened.
    history: Mutex<Vec<(&'static str, String)>>,
}

pub fn group_name(project_id: &str) -> String {
    format!("wharf-{project_id}")
}

impl FakeRuntime {
    /// Simulate a container dying outside the platform's control.
    pub fn kill(&self, project_id: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(group_name(project_id), false);
    }

    /// Simulate someone starting the container by hand.
    pub fn start_out_of_band(&self, project_id: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(group_name(project_id), true);
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.running
            .lock()
            .unwrap()
            .get(&group_name(project_id))
            .copied()
            .unwrap_or(false)
    }

    pub fn last_spec(&self, project_id: &str) -> Option<ServiceSpec> {
        self.specs
            .lock()
            .unwrap()
            .get(&group_name(project_id))
            .cloned()
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().unwrap().len()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    /// `"start"`/`"stop"` calls made for one project, oldest first.
    pub fn history_for(&self, project_id: &str) -> Vec<&'static str> {
        let group = group_name(project_id);
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, g)| *g == group)
            .map(|(op, _)| *op)
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build(&self, _context: &Path, spec: &ServiceSpec) -> Result<()> {
        self.builds.lock().unwrap().push(spec.project_name.clone());
        if *self.fail_build.lock().unwrap() {
            return Err(WharfError::Build("npm run build exited with 1".into()));
        }
        Ok(())
    }

    async fn start(&self, spec: &ServiceSpec) -> Result<()> {
        self.starts.lock().unwrap().push(spec.project_name.clone());
        self.history
            .lock()
            .unwrap()
            .push(("start", spec.project_name.clone()));
        if *self.fail_start.lock().unwrap() {
            return Err(WharfError::Runtime("port is already allocated".into()));
        }
        self.specs
            .lock()
            .unwrap()
            .insert(spec.project_name.clone(), spec.clone());
        self.running
            .lock()
            .unwrap()
            .insert(spec.project_name.clone(), true);
        Ok(())
    }

    async fn stop(&self, spec: &ServiceSpec) -> Result<()> {
        self.stops.lock().unwrap().push(spec.project_name.clone());
        self.history
            .lock()
            .unwrap()
            .push(("stop", spec.project_name.clone()));
        if *self.fail_stop.lock().unwrap() {
            return Err(WharfError::Runtime("docker daemon unreachable".into()));
        }
        self.running
            .lock()
            .unwrap()
            .insert(spec.project_name.clone(), false);
        Ok(())
    }

    async fn status(&self, spec: &ServiceSpec) -> Result<ContainerStatus> {
        if *self.fail_status.lock().unwrap() {
            return Err(WharfError::Runtime("docker daemon unreachable".into()));
        }
        let running = self
            .running
            .lock()
            .unwrap()
            .get(&spec.project_name)
            .copied();
        let containers = match running {
            Some(running) => vec![ContainerInfo {
                name: format!("{}-{}-1", spec.project_name, spec.service_name),
                service: spec.service_name.clone(),
                state: if running { "running" } else { "exited" }.into(),
                status: String::new(),
            }],
            None => Vec::new(),
        };
        Ok(ContainerStatus::from_containers(containers))
    }

    async fn logs(&self, spec: &ServiceSpec, lines: usize) -> Result<Vec<String>> {
        Ok((1..=lines.min(3))
            .map(|i| format!("{} | line {i}", spec.service_name))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<DeploymentEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds_for(&self, project_id: &str) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter(|e| e.project_id() == project_id)
            .map(|e| e.kind())
            .collect()
    }
}

impl EventNotifier for RecordingNotifier {
    fn emit(&self, event: DeploymentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub registry: Arc<FileRegistry>,
    pub fetcher: Arc<FakeFetcher>,
    pub runtime: Arc<FakeRuntime>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_range(3000, 3010).await
    }

    pub async fn with_range(start: u16, end: u16) -> Self {
        Self::with_config(|config| config.port_range = PortRange { start, end }).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut WharfConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WharfConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut config);

        let registry = Arc::new(FileRegistry::open(&config.registry_path()).await.unwrap());
        let fetcher = Arc::new(FakeFetcher::default());
        let runtime = Arc::new(FakeRuntime::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            config,
            registry.clone(),
            fetcher.clone(),
            runtime.clone(),
            notifier.clone(),
        ));
        Self {
            dir,
            orchestrator,
            registry,
            fetcher,
            runtime,
            notifier,
        }
    }
}

pub fn request(name: &str) -> DeploymentRequest {
    DeploymentRequest {
        name: name.to_string(),
        domain: format!("{name}.test"),
        repository: format!("https://git.example.com/{name}.git"),
        ..Default::default()
    }
}

pub fn request_on_port(name: &str, port: u16) -> DeploymentRequest {
    DeploymentRequest {
        port: Some(port),
        ..request(name)
    }
}
