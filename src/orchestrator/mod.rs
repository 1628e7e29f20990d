//! Build Orchestration: one linear kernel build pipeline
//! (Acquire -> [Patch] -> Configure -> Build -> Package -> Deliver).
//!
//! Every side effect goes through a collaborator trait so the control flow
//! can be driven by test doubles.

pub mod executor;
pub mod packager;
pub mod state;

pub use executor::{collect_artifact, BuildEnvironment, KernelBuilder, MakeBuilder};
pub use packager::{AnyKernelPackager, ArtifactPackager};
pub use state::{PipelineStage, PipelineState};

use crate::config::{kconfig, BuildRequest, DeviceTable, PipelineConfig};
use crate::error::{BuildError, PipelineError};
use crate::kernel::diagnostics;
use crate::kernel::patcher::{RootPatcher, SourcePatcher};
use crate::kernel::source::{GitSourceProvider, SourceProvider};
use crate::models::{ArchiveName, BuildJob, DeviceProfile, PackagedZip, RootIntegration};
use crate::notify::{self, Notifier};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Side-effecting parts of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub sources: Arc<dyn SourceProvider>,
    pub patcher: Arc<dyn RootPatcher>,
    pub builder: Arc<dyn KernelBuilder>,
    pub packager: Arc<dyn ArtifactPackager>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// git2 clones, `make`, AnyKernel3 and the configured notifier.
    pub fn production(config: &PipelineConfig) -> Self {
        Collaborators {
            sources: Arc::new(GitSourceProvider),
            patcher: Arc::new(SourcePatcher::new()),
            builder: Arc::new(MakeBuilder::new()),
            packager: Arc::new(AnyKernelPackager::new(config.anykernel.clone(), config.workdir.clone())),
            notifier: Arc::from(notify::notifier_for(config.telegram.as_ref())),
        }
    }
}

/// Drives a single build from device selection to delivery.
pub struct BuildPipeline {
    config: PipelineConfig,
    devices: DeviceTable,
    collaborators: Collaborators,
    state: Arc<RwLock<PipelineState>>,
}

impl BuildPipeline {
    pub fn new(config: PipelineConfig, devices: DeviceTable, collaborators: Collaborators) -> Self {
        BuildPipeline {
            config,
            devices,
            collaborators,
            state: Arc::new(RwLock::new(PipelineState::new())),
        }
    }

    pub async fn current_stage(&self) -> PipelineStage {
        self.state.read().await.stage
    }

    pub async fn state_snapshot(&self) -> PipelineState {
        self.state.read().await.clone()
    }

    async fn transition(&self, next: PipelineStage) -> Result<(), BuildError> {
        self.state
            .write()
            .await
            .transition_to(next)
            .map_err(BuildError::ConfigurationFailed)?;
        log::info!("[Pipeline] Stage: {}", next.as_str());
        Ok(())
    }

    async fn notify_text(&self, text: &str) {
        if let Err(e) = self.collaborators.notifier.send_text(text).await {
            log::warn!("[Pipeline] Notification failed: {}", e);
        }
    }

    async fn notify_document(&self, path: &Path, caption: &str) {
        if let Err(e) = self.collaborators.notifier.send_document(path, caption).await {
            log::warn!("[Pipeline] Upload of {} failed: {}", path.display(), e);
        }
    }

    /// Run the whole pipeline for one request.
    ///
    /// Unsupported devices are rejected before anything is fetched. Any
    /// later failure posts a failure notice with the build log attached.
    pub async fn run(&self, request: &BuildRequest) -> Result<PackagedZip, PipelineError> {
        let profile = match self.devices.resolve(&request.device) {
            Ok(profile) => profile,
            Err(unsupported) => {
                log::error!("[Pipeline] {}", unsupported);
                self.notify_text(&notify::unsupported_message(&unsupported.0)).await;
                self.state.write().await.record_error(unsupported.to_string());
                return Err(unsupported.into());
            }
        };

        let job = BuildJob::new(
            &profile,
            &request.source_url,
            &request.branch,
            self.config.out_dir(),
        );

        match self.run_stages(&profile, &job).await {
            Ok(zip) => Ok(zip),
            Err(err) => {
                self.handle_failure(&job, &err).await;
                Err(err.into())
            }
        }
    }

    async fn run_stages(&self, profile: &DeviceProfile, job: &BuildJob) -> Result<PackagedZip, BuildError> {
        let c = &self.collaborators;

        self.transition(PipelineStage::Acquire).await?;
        let tree = c.sources.fetch_kernel(job, &self.config.kernel_dir()).await?;
        let toolchains = c
            .sources
            .fetch_toolchains(&profile.toolchain, &self.config.toolchain_root)
            .await?;

        self.notify_text(&notify::start_message(
            profile,
            &job.branch,
            &tree,
            &toolchains,
            chrono::Local::now(),
        ))
        .await;

        if self.config.integration != RootIntegration::None {
            self.transition(PipelineStage::Patch).await?;
            c.patcher
                .apply(self.config.integration, &tree.path, job.arch, &job.defconfig)
                .await
                .map_err(|e| BuildError::PatchingFailed(e.to_string()))?;
        }

        self.transition(PipelineStage::Configure).await?;
        if let Some(preset) = self.config.config_preset {
            let defconfig = tree
                .path
                .join("arch")
                .join(job.arch.as_str())
                .join("configs")
                .join(&job.defconfig);
            let report = kconfig::check_config_file_within(&defconfig, &tree.path, preset, true)
                .map_err(|e| BuildError::ConfigurationFailed(e.to_string()))?;
            log::info!("[Pipeline] {} preset: {}", preset, report.summary());
        }
        let env = BuildEnvironment::new(job.clone(), tree.path.clone(), toolchains, &self.config);

        self.transition(PipelineStage::Build).await?;
        c.builder.build(&env).await?;
        let artifact = collect_artifact(job, profile.expected_image, profile.ship_dtbo, profile.ship_dtb)?;

        self.transition(PipelineStage::Package).await?;
        let name = ArchiveName {
            name: self.config.kernel_name.clone(),
            device: job.device.clone(),
            date: ArchiveName::date_token(chrono::Local::now()),
            short_sha: tree.short_sha().to_string(),
        };
        let zip = c.packager.package(job, &artifact, &name).await?;

        self.transition(PipelineStage::Deliver).await?;
        let elapsed = self.state.read().await.elapsed();
        let caption = notify::success_caption(elapsed, &job.device, tree.short_sha());
        self.notify_document(&zip.path, &caption).await;

        self.transition(PipelineStage::Completed).await?;
        log::info!("[Pipeline] Delivered {}", zip.file_name);
        Ok(zip)
    }

    async fn handle_failure(&self, job: &BuildJob, err: &BuildError) {
        log::error!("[Pipeline] Build failed: {}", err);
        self.state.write().await.record_error(err.to_string());

        let log_path = job.build_log_path();
        let analysis = if log_path.is_file() {
            match diagnostics::analyze_file(&log_path, &job.out_dir) {
                Ok((analysis, _)) => Some(analysis),
                Err(e) => {
                    log::warn!("[Pipeline] Could not analyze {}: {}", log_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let diagnosis = analysis.as_ref().and_then(|a| a.first_diagnosis());
        self.notify_text(&notify::failure_message(&job.device, &err.to_string(), diagnosis))
            .await;

        if log_path.is_file() {
            match notify::gzip_file(&log_path) {
                Ok(compressed) => self.notify_document(&compressed, "Build log").await,
                Err(e) => log::warn!("[Pipeline] Could not compress {}: {}", log_path.display(), e),
            }
        }
    }
}
