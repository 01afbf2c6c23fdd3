use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Result, WharfError};
use crate::models::{ContainerInfo, ContainerSettings, ContainerStatus, ServiceSpec};

const COMPOSE_FILENAME: &str = "compose.yaml";
const GENERATED_DOCKERFILE: &str = "Dockerfile.wharf";
const APP_DIR: &str = "/app";

/// Builds, runs and inspects a project's container group.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run the project's build command against the working tree at `context`.
    async fn build(&self, context: &Path, spec: &ServiceSpec) -> Result<()>;

    /// Materialize `spec` and bring the group up. Replaces a running group.
    async fn start(&self, spec: &ServiceSpec) -> Result<()>;

    /// Tear the group down. Stopping a group that does not exist succeeds.
    async fn stop(&self, spec: &ServiceSpec) -> Result<()>;

    async fn status(&self, spec: &ServiceSpec) -> Result<ContainerStatus>;

    async fn logs(&self, spec: &ServiceSpec, lines: usize) -> Result<Vec<String>>;
}

/// Runtime driving `docker compose` with a generated compose file.
pub struct DockerComposeRuntime {
    settings: ContainerSettings,
}

impl DockerComposeRuntime {
    pub fn new(settings: ContainerSettings) -> Self {
        Self { settings }
    }

    async fn run_docker(&self, args: &[&str], working_directory: &Path) -> Result<String> {
        let output = Command::new(&self.settings.docker_binary)
            .args(args)
            .current_dir(working_directory)
            .output()
            .await
            .map_err(|e| WharfError::Runtime(format!("failed to run docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WharfError::Runtime(format!(
                "docker {} failed (exit {}): {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Arguments selecting the compose project, with the file when it exists.
    fn compose_args(spec: &ServiceSpec) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            spec.project_name.clone(),
        ];
        let file = compose_path(spec);
        if file.exists() {
            args.push("--file".into());
            args.push(file.to_string_lossy().to_string());
        }
        args
    }

    async fn run_compose(&self, spec: &ServiceSpec, extra: &[&str]) -> Result<String> {
        let mut args = Self::compose_args(spec);
        args.extend(extra.iter().map(|a| a.to_string()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let workdir = if spec.workdir.exists() {
            spec.workdir.as_path()
        } else {
            Path::new(".")
        };
        self.run_docker(&args, workdir).await
    }

    async fn write_files(&self, spec: &ServiceSpec) -> Result<()> {
        tokio::fs::create_dir_all(&spec.workdir).await?;
        let dockerfile = if spec.context.join("Dockerfile").exists() {
            None
        } else {
            let contents = generated_dockerfile(&self.settings.base_image, spec);
            tokio::fs::write(spec.context.join(GENERATED_DOCKERFILE), contents).await?;
            Some(GENERATED_DOCKERFILE.to_string())
        };
        let compose = ComposeFile::render(spec, dockerfile);
        let yaml = serde_yaml::to_string(&compose)?;
        tokio::fs::write(compose_path(spec), yaml).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerComposeRuntime {
    async fn build(&self, context: &Path, spec: &ServiceSpec) -> Result<()> {
        let Some(command) = spec.build_command.as_deref() else {
            return Ok(());
        };
        let context = std::path::absolute(context)?;
        let mount = format!("{}:{APP_DIR}", context.to_string_lossy());
        let mut args = vec!["run", "--rm", "--volume", mount.as_str(), "--workdir", APP_DIR];
        let env_pairs: Vec<String> = spec
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for pair in &env_pairs {
            args.push("--env");
            args.push(pair);
        }
        args.extend([self.settings.base_image.as_str(), "sh", "-c", command]);

        tracing::info!(project = %spec.project_name, "running build command");
        self.run_docker(&args, &context)
            .await
            .map_err(|e| WharfError::Build(e.to_string()))?;
        Ok(())
    }

    async fn start(&self, spec: &ServiceSpec) -> Result<()> {
        let spec = &absolute_spec(spec)?;
        self.write_files(spec).await?;
        self.run_compose(spec, &["up", "--detach", "--build", "--remove-orphans"])
            .await?;
        tracing::info!(
            project = %spec.project_name,
            port = spec.ports.host,
            "container group started"
        );
        Ok(())
    }

    async fn stop(&self, spec: &ServiceSpec) -> Result<()> {
        let spec = &absolute_spec(spec)?;
        self.run_compose(spec, &["down", "--remove-orphans"]).await?;
        tracing::info!(project = %spec.project_name, "container group stopped");
        Ok(())
    }

    async fn status(&self, spec: &ServiceSpec) -> Result<ContainerStatus> {
        let spec = &absolute_spec(spec)?;
        let output = self
            .run_compose(spec, &["ps", "--all", "--format", "json"])
            .await?;
        let containers = parse_ps_output(&output)?;
        Ok(ContainerStatus::from_containers(containers))
    }

    async fn logs(&self, spec: &ServiceSpec, lines: usize) -> Result<Vec<String>> {
        let spec = &absolute_spec(spec)?;
        let tail = lines.to_string();
        let output = self
            .run_compose(spec, &["logs", "--no-color", "--tail", &tail])
            .await?;
        Ok(output.lines().map(str::to_string).collect())
    }
}

/// Docker runs inside the workdir and compose resolves the build context
/// against the compose file, so neither may see a relative path.
fn absolute_spec(spec: &ServiceSpec) -> Result<ServiceSpec> {
    let mut spec = spec.clone();
    spec.workdir = std::path::absolute(&spec.workdir)?;
    spec.context = std::path::absolute(&spec.context)?;
    Ok(spec)
}

pub fn compose_path(spec: &ServiceSpec) -> PathBuf {
    spec.workdir.join(COMPOSE_FILENAME)
}

#[derive(Debug, Serialize)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
pub struct ComposeService {
    pub build: ComposeBuild,
    pub image: String,
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    pub restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ComposeBuild {
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

impl ComposeFile {
    pub fn render(spec: &ServiceSpec, dockerfile: Option<String>) -> Self {
        let service = ComposeService {
            build: ComposeBuild {
                context: spec.context.to_string_lossy().to_string(),
                dockerfile,
            },
            image: format!("{}:latest", spec.project_name),
            ports: vec![format!("{}:{}", spec.ports.host, spec.ports.container)],
            environment: spec.environment.clone(),
            restart: spec.restart_policy.to_string(),
            command: spec
                .start_command
                .as_ref()
                .map(|c| vec!["sh".into(), "-c".into(), c.clone()]),
            labels: spec.labels.clone(),
        };
        let mut services = BTreeMap::new();
        services.insert(spec.service_name.clone(), service);
        Self { services }
    }
}

/// Dockerfile for repositories that do not ship their own.
pub fn generated_dockerfile(base_image: &str, spec: &ServiceSpec) -> String {
    let command = spec.start_command.as_deref().unwrap_or("npm start");
    let command_json = serde_json::to_string(command).unwrap_or_else(|_| "\"npm start\"".into());
    format!(
        "FROM {base_image}\n\
         WORKDIR {APP_DIR}\n\
         COPY . .\n\
         EXPOSE {port}\n\
         CMD [\"sh\", \"-c\", {command_json}]\n",
        port = spec.ports.container,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    name: String,
    #[serde(default)]
    service: String,
    state: String,
    #[serde(default)]
    status: String,
}

impl From<PsEntry> for ContainerInfo {
    fn from(entry: PsEntry) -> Self {
        ContainerInfo {
            name: entry.name,
            service: entry.service,
            state: entry.state,
            status: entry.status,
        }
    }
}

/// Parse `docker compose ps --format json`, which is a JSON array on older
/// releases and one object per line on newer ones.
pub fn parse_ps_output(output: &str) -> Result<Vec<ContainerInfo>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?
    };
    Ok(entries.into_iter().map(ContainerInfo::from).collect())
}
