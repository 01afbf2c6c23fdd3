use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, WharfError};
use crate::models::{Project, ProjectFilter};

/// Durable store of project records keyed by id. The single source of truth
/// for declared project state.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Project>>;

    /// Matching projects, ordered by id.
    async fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>>;

    async fn put(&self, project: &Project) -> Result<()>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Registry persisted as a single JSON document. Records are cached in memory
/// and every write replaces the file atomically before it becomes visible.
pub struct FileRegistry {
    state_file_path: PathBuf,
    projects: RwLock<BTreeMap<String, Project>>,
}

impl FileRegistry {
    pub async fn open(state_file_path: &Path) -> Result<Self> {
        let projects = load(state_file_path).await?;
        tracing::debug!(
            path = %state_file_path.display(),
            count = projects.len(),
            "registry loaded"
        );
        Ok(Self {
            state_file_path: state_file_path.to_path_buf(),
            projects: RwLock::new(projects),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file_path
    }

    async fn save(&self, projects: &BTreeMap<String, Project>) -> Result<()> {
        if let Some(parent) = self.state_file_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WharfError::Registry(format!("failed to create registry dir: {e}"))
            })?;
        }
        let records: Vec<&Project> = projects.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        let tmp_path = self.state_file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| WharfError::Registry(format!("failed to write registry file: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.state_file_path)
            .await
            .map_err(|e| WharfError::Registry(format!("failed to replace registry file: {e}")))?;
        Ok(())
    }
}

async fn load(path: &Path) -> Result<BTreeMap<String, Project>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WharfError::Registry(format!("failed to read registry file: {e}")))?;
    let records: Vec<Project> = serde_json::from_str(&json)?;
    Ok(records.into_iter().map(|p| (p.id.clone(), p)).collect())
}

#[async_trait]
impl ProjectRegistry for FileRegistry {
    async fn get(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn put(&self, project: &Project) -> Result<()> {
        // The file is replaced before readers can observe the new record.
        let mut projects = self.projects.write().await;
        let mut next = projects.clone();
        next.insert(project.id.clone(), project.clone());
        self.save(&next).await?;
        *projects = next;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut projects = self.projects.write().await;
        if !projects.contains_key(id) {
            return Ok(false);
        }
        let mut next = projects.clone();
        next.remove(id);
        self.save(&next).await?;
        *projects = next;
        Ok(true)
    }
}
