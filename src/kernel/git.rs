//! Native git management using the `git2` crate.
//!
//! Clones kernel sources, toolchains and the flashable-zip template at a
//! pinned branch without shelling out to git.

use git2::{build::RepoBuilder, Repository};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Clone error: {0}")]
    Clone(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// Manages a local working copy using native git bindings
pub struct GitManager {
    repo_path: PathBuf,
}

impl GitManager {
    /// Opens an existing repository
    pub fn open(repo_path: impl AsRef<Path>) -> GitResult<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        Repository::open(&repo_path).map_err(|e| {
            GitError::Repository(format!("Failed to open repository at {:?}: {}", repo_path, e))
        })?;
        Ok(GitManager { repo_path })
    }

    /// Clones `branch` of `url` into `target_path`, replacing whatever is there.
    ///
    /// Attempts a shallow (depth=1) clone first and falls back to a full
    /// clone of the same branch for remotes that refuse shallow fetches.
    pub fn clone_branch(url: &str, branch: &str, target_path: impl AsRef<Path>) -> GitResult<Self> {
        let target_path = target_path.as_ref();

        if target_path.exists() {
            log::info!("[Git] [CLONE] Removing stale checkout at {:?}", target_path);
            std::fs::remove_dir_all(target_path)?;
        }

        log::info!("[Git] [CLONE] Cloning {} ({}) into {:?}", url, branch, target_path);

        Self::shallow_clone(url, branch, target_path).or_else(|shallow_err| {
            log::warn!("[Git] [CLONE] Shallow clone failed: {}", shallow_err);
            log::warn!("[Git] [CLONE] Falling back to full clone");

            if target_path.exists() {
                std::fs::remove_dir_all(target_path)?;
            }
            RepoBuilder::new()
                .branch(branch)
                .clone(url, target_path)
                .map(|_| ())
                .map_err(|e| {
                    GitError::Clone(format!(
                        "Failed to clone {} ({}) to {:?}: {}",
                        url, branch, target_path, e
                    ))
                })
        })?;

        log::info!("[Git] [CLONE] Clone completed");
        GitManager::open(target_path)
    }

    fn shallow_clone(url: &str, branch: &str, target_path: &Path) -> GitResult<()> {
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.depth(1);

        let mut callbacks = git2::RemoteCallbacks::new();
        let mut last_percent = 0_u32;
        callbacks.transfer_progress(move |progress| {
            let total = progress.total_objects();
            if total > 0 {
                let percent = (progress.received_objects() as f32 / total as f32 * 100.0) as u32;
                if percent >= last_percent + 25 || percent == 100 && last_percent != 100 {
                    last_percent = percent;
                    log::debug!(
                        "[Git] [PROGRESS] {}/{} objects - {}%",
                        progress.received_objects(),
                        total,
                        percent
                    );
                }
            }
            true
        });
        fetch_options.remote_callbacks(callbacks);

        RepoBuilder::new()
            .branch(branch)
            .fetch_options(fetch_options)
            .clone(url, target_path)
            .map_err(|e| GitError::Clone(format!("Shallow clone failed for {}: {}", url, e)))?;

        Ok(())
    }

    /// Gets the current HEAD commit hash
    pub fn get_head_commit(&self) -> GitResult<String> {
        let repo = Repository::open(&self.repo_path)
            .map_err(|e| GitError::Repository(format!("Failed to open repository: {}", e)))?;

        let head = repo
            .head()
            .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;

        let commit_id = head
            .target()
            .ok_or_else(|| GitError::Repository("HEAD is not a direct reference".to_string()))?;

        Ok(commit_id.to_string())
    }

    /// Returns the path to the repository
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_repository_fails() {
        let result = GitManager::open("/tmp/nonexistent_kbuild_repo");
        assert!(matches!(result, Err(GitError::Repository(_))));
    }

    #[test]
    fn test_git_error_display() {
        let err = GitError::Clone("boom".to_string());
        assert_eq!(err.to_string(), "Clone error: boom");
    }
}
