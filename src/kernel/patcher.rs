//! Source patching for root and container integrations.
//!
//! Runs between acquisition and configuration, on the freshly cloned tree:
//! - KernelSU: semantic patches driven by `spatch`
//! - Re:Kernel: driver drop-in plus semantic patches and build-file edits
//! - LXC: in-place rewrites of the cgroup and qtaguid sources

pub mod kernelsu;
pub mod lxc;
pub mod rekernel;

use crate::error::PatchError;
use crate::models::{Arch, RootIntegration};
use futures::future::BoxFuture;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Result type for patching operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

pub const KERNELSU_BASE: &str = "https://github.com/dabao1955/kernel_build_action/raw/main/kernelsu";
pub const REKERNEL_BASE: &str = "https://github.com/dabao1955/kernel_build_action/raw/main/rekernel";
pub const REKERNEL_PATCHES_BASE: &str =
    "https://raw.githubusercontent.com/dabao1955/kernel_build_action/main/rekernel/patches";

/// Where integration assets are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSources {
    pub kernelsu_base: String,
    pub rekernel_base: String,
    pub rekernel_patches_base: String,
}

impl Default for PatchSources {
    fn default() -> Self {
        PatchSources {
            kernelsu_base: KERNELSU_BASE.to_string(),
            rekernel_base: REKERNEL_BASE.to_string(),
            rekernel_patches_base: REKERNEL_PATCHES_BASE.to_string(),
        }
    }
}

impl PatchSources {
    /// All three bases rooted at one mirror, laid out like the upstream repo.
    pub fn mirrored(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        PatchSources {
            kernelsu_base: format!("{}/kernelsu", base),
            rekernel_base: format!("{}/rekernel", base),
            rekernel_patches_base: format!("{}/rekernel/patches", base),
        }
    }
}

/// Applies a root or container integration to a source tree.
pub trait RootPatcher: Send + Sync {
    fn apply<'a>(
        &'a self,
        integration: RootIntegration,
        tree: &'a Path,
        arch: Arch,
        defconfig: &'a str,
    ) -> BoxFuture<'a, PatchResult<()>>;
}

/// Production patcher that downloads integration assets over HTTPS.
pub struct SourcePatcher {
    client: reqwest::Client,
    sources: PatchSources,
}

impl SourcePatcher {
    pub fn new() -> Self {
        Self::with_sources(PatchSources::default())
    }

    pub fn with_sources(sources: PatchSources) -> Self {
        SourcePatcher {
            client: reqwest::Client::new(),
            sources,
        }
    }

    pub async fn apply_integration(
        &self,
        integration: RootIntegration,
        tree: &Path,
        arch: Arch,
        defconfig: &str,
    ) -> PatchResult<()> {
        if !tree.is_dir() {
            return Err(PatchError::FileNotFound(format!(
                "Kernel source not found at {}",
                tree.display()
            )));
        }

        log::info!("[Patcher] Applying {} integration to {}", integration, tree.display());
        match integration {
            RootIntegration::None => Ok(()),
            RootIntegration::KernelSu => {
                let applied = kernelsu::apply(&self.client, &self.sources.kernelsu_base, tree).await?;
                log::info!("[Patcher] [KernelSU] Patched {} file(s)", applied);
                Ok(())
            }
            RootIntegration::ReKernel => {
                let defconfig_path = tree.join("arch").join(arch.as_str()).join("configs").join(defconfig);
                rekernel::apply(&self.client, &self.sources, tree, &defconfig_path).await
            }
            RootIntegration::Lxc => {
                let tree = tree.to_path_buf();
                let patched = tokio::task::spawn_blocking(move || lxc::apply(&tree))
                    .await
                    .map_err(|e| PatchError::PatchFailed(format!("LXC patch task failed: {}", e)))??;
                log::info!("[Patcher] [LXC] Patched {} file(s)", patched.len());
                Ok(())
            }
        }
    }
}

impl Default for SourcePatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RootPatcher for SourcePatcher {
    fn apply<'a>(
        &'a self,
        integration: RootIntegration,
        tree: &'a Path,
        arch: Arch,
        defconfig: &'a str,
    ) -> BoxFuture<'a, PatchResult<()>> {
        Box::pin(self.apply_integration(integration, tree, arch, defconfig))
    }
}

/// Download `url` into `dir`, keeping the last path segment as file name.
pub async fn download(client: &reqwest::Client, url: &str, dir: &Path) -> PatchResult<PathBuf> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PatchError::DownloadFailed(format!("No file name in {}", url)))?;

    log::debug!("[Patcher] [DOWNLOAD] {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PatchError::DownloadFailed(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(PatchError::DownloadFailed(format!(
            "{}: HTTP {}",
            url,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PatchError::DownloadFailed(format!("{}: {}", url, e)))?;

    let dest = dir.join(file_name);
    tokio::fs::write(&dest, &bytes).await?;
    Ok(dest)
}

/// Run `spatch` in `cwd`. Failures are logged and reported as `false`.
pub async fn run_spatch(cwd: &Path, args: Vec<OsString>) -> bool {
    match Command::new("spatch").args(&args).current_dir(cwd).output().await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            log::warn!(
                "[Patcher] [SPATCH] exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            log::warn!("[Patcher] [SPATCH] could not run spatch: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mirrored_sources() {
        let sources = PatchSources::mirrored("http://127.0.0.1:1234/");
        assert_eq!(sources.kernelsu_base, "http://127.0.0.1:1234/kernelsu");
        assert_eq!(sources.rekernel_patches_base, "http://127.0.0.1:1234/rekernel/patches");
    }

    #[tokio::test]
    async fn test_missing_tree_rejected() {
        let patcher = SourcePatcher::new();
        let result = patcher
            .apply_integration(RootIntegration::Lxc, Path::new("/nonexistent/kernel"), Arch::Arm64, "defconfig")
            .await;
        assert!(matches!(result, Err(PatchError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_none_integration_is_noop() {
        let temp = TempDir::new().unwrap();
        let patcher = SourcePatcher::new();
        patcher
            .apply_integration(RootIntegration::None, temp.path(), Arch::Arm64, "defconfig")
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/kernelsu/minimal.cocci")
            .with_status(200)
            .with_body("@@\n@@\n")
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let url = format!("{}/kernelsu/minimal.cocci", server.url());
        let path = download(&reqwest::Client::new(), &url, temp.path()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(path, temp.path().join("minimal.cocci"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "@@\n@@\n");
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/missing.cocci").with_status(404).create_async().await;

        let temp = TempDir::new().unwrap();
        let url = format!("{}/missing.cocci", server.url());
        let result = download(&reqwest::Client::new(), &url, temp.path()).await;
        assert!(matches!(result, Err(PatchError::DownloadFailed(_))));
    }
}
