//! Source acquisition: kernel tree and toolchains.

use crate::error::BuildError;
use crate::kernel::git::GitManager;
use crate::kernel::toolchain;
use crate::models::{BuildJob, SourceTree, ToolchainSet, ToolchainSpec};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

/// Produces the inputs of a build.
pub trait SourceProvider: Send + Sync {
    /// Fresh working copy of `job.source_url` at `job.branch` in `dest`.
    fn fetch_kernel<'a>(&'a self, job: &'a BuildJob, dest: &'a Path) -> BoxFuture<'a, Result<SourceTree, BuildError>>;

    /// Clone the pinned toolchains under `root`.
    fn fetch_toolchains<'a>(
        &'a self,
        spec: &'a ToolchainSpec,
        root: &'a Path,
    ) -> BoxFuture<'a, Result<ToolchainSet, BuildError>>;
}

/// Clones everything with git2 on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitSourceProvider;

fn clone_kernel(url: &str, branch: &str, dest: &Path) -> Result<SourceTree, BuildError> {
    let repo = GitManager::clone_branch(url, branch, dest)
        .map_err(|e| BuildError::AcquisitionFailed(format!("Kernel clone failed: {}", e)))?;
    let commit = repo
        .get_head_commit()
        .map_err(|e| BuildError::AcquisitionFailed(format!("Cannot read kernel HEAD: {}", e)))?;
    Ok(SourceTree {
        path: repo.repo_path().to_path_buf(),
        commit,
    })
}

async fn blocking<T, F>(task: F) -> Result<T, BuildError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BuildError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| BuildError::AcquisitionFailed(format!("Acquisition task failed: {}", e)))?
}

impl SourceProvider for GitSourceProvider {
    fn fetch_kernel<'a>(&'a self, job: &'a BuildJob, dest: &'a Path) -> BoxFuture<'a, Result<SourceTree, BuildError>> {
        let url = job.source_url.clone();
        let branch = job.branch.clone();
        let dest: PathBuf = dest.to_path_buf();
        Box::pin(async move {
            let tree = blocking(move || clone_kernel(&url, &branch, &dest)).await?;
            log::info!("[Source] Kernel at {} ({})", tree.path.display(), tree.short_sha());
            Ok(tree)
        })
    }

    fn fetch_toolchains<'a>(
        &'a self,
        spec: &'a ToolchainSpec,
        root: &'a Path,
    ) -> BoxFuture<'a, Result<ToolchainSet, BuildError>> {
        let spec = spec.clone();
        let root = root.to_path_buf();
        Box::pin(blocking(move || toolchain::fetch_toolchains(&spec, &root)))
    }
}
