use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, WharfError};

/// Materializes a repository branch into a private working tree.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Replace whatever is at `dest` with a fresh checkout of `branch`.
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<()>;
}

/// Fetcher backed by the `git` binary. Clones are shallow and single-branch.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_binary: String,
}

impl GitFetcher {
    pub fn new() -> Self {
        Self {
            git_binary: "git".into(),
        }
    }

    pub fn with_binary(git_binary: impl Into<String>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }

    async fn run_git(&self, args: &[&str], working_directory: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new(&self.git_binary);
        cmd.args(args);
        // Never block on a credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| WharfError::Fetch(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WharfError::Fetch(format!(
                "git {} failed (exit {}): {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn head_commit(&self, repo_path: &Path) -> Result<String> {
        self.run_git(&["rev-parse", "HEAD"], Some(repo_path)).await
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepositoryFetcher for GitFetcher {
    async fn fetch(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        wipe(dest).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WharfError::Fetch(format!("failed to create {}: {e}", parent.display())))?;
        }

        let target = dest.to_string_lossy();
        self.run_git(
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                branch,
                "--",
                url,
                &target,
            ],
            None,
        )
        .await?;

        if let Ok(commit) = self.head_commit(dest).await {
            tracing::info!(url, branch, commit = %commit, "repository fetched");
        }
        Ok(())
    }
}

/// Remove a previous working tree so every fetch starts clean.
pub async fn wipe(dest: &Path) -> Result<()> {
    if dest.exists() {
        tokio::fs::remove_dir_all(dest)
            .await
            .map_err(|e| WharfError::Fetch(format!("failed to clear {}: {e}", dest.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_repository_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source");
        let fetcher = GitFetcher::new();
        let err = fetcher.fetch("bad-url", "main", &dest).await.unwrap_err();
        assert!(matches!(err, WharfError::Fetch(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitFetcher::with_binary("definitely-not-git-binary");
        let err = fetcher
            .fetch("https://example.com/x.git", "main", &dir.path().join("src"))
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::Fetch(_)));
    }

    #[tokio::test]
    async fn stale_tree_is_wiped_before_clone() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();

        let _ = GitFetcher::new().fetch("bad-url", "main", &dest).await;
        assert!(!dest.join("stale.txt").exists());
    }
}
