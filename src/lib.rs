//! kbuild: Android kernel build pipeline for CI runners
//!
//! One run turns a device codename plus a kernel source location into a
//! flashable AnyKernel3 archive delivered to a chat.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures (device profiles, jobs, artifacts)
//! - **config**: Device table, run configuration, defconfig presets
//! - **kernel**: Source acquisition, toolchains, patching, log diagnostics
//! - **orchestrator**: Stage state machine, build execution, packaging
//! - **notify**: Chat notifications (Telegram Bot API)
//! - **system**: Workspace housekeeping
//! - **log_collector**: `log` backend writing to stderr and a run log file

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;

pub mod kernel;

pub mod orchestrator;

pub mod notify;

pub mod system;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::LogCollector;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{BuildError, ConfigError, NotifyError, PatchError, PipelineError, Result, UnsupportedDevice};

pub use models::{
    ArchiveName, Arch, BuildArtifact, BuildJob, DeviceProfile, ImageKind, PackagedZip, RootIntegration, SourceTree,
    ToolchainSet, ToolchainSpec,
};

pub use config::{BuildRequest, DeviceTable, PipelineConfig, TelegramConfig};

pub use orchestrator::{BuildPipeline, Collaborators, PipelineStage};

pub use notify::{Notifier, TelegramNotifier};

/// Crate version reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
