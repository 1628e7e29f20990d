//! Configuration module for kernel build pipelines.
//!
//! # Module Structure
//!
//! - `devices`: device lookup table (codename → defconfig, arch, toolchains)
//! - `loader`: JSON overrides for the device table
//! - `kconfig`: defconfig preset checker (LXC, NetHunter)
//!
//! `PipelineConfig` is built once at startup and handed by reference to every
//! stage; nothing is communicated between stages through the process
//! environment.

pub mod devices;
pub mod kconfig;
pub mod loader;

pub use devices::DeviceTable;
pub use kconfig::ConfigPreset;

use crate::models::{Remote, RootIntegration};
use std::path::PathBuf;

/// Default flashable-zip template.
pub const ANYKERNEL3_URL: &str = "https://github.com/osm0sis/AnyKernel3";
pub const ANYKERNEL3_BRANCH: &str = "master";

/// Default Telegram Bot API endpoint.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Invocation parameters naming what to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub device: String,
    pub source_url: String,
    pub branch: String,
}

/// Bot credentials and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub api_base: String,
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for the kernel checkout, template and archives
    pub workdir: PathBuf,
    /// Where toolchains are cloned
    pub toolchain_root: PathBuf,
    /// Prefix of the archive name
    pub kernel_name: String,
    pub integration: RootIntegration,
    pub config_preset: Option<ConfigPreset>,
    /// Parallel make jobs
    pub jobs: usize,
    pub build_user: String,
    pub build_host: String,
    pub ccache: bool,
    pub anykernel: Remote,
    pub telegram: Option<TelegramConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workdir: PathBuf::from("."),
            toolchain_root: default_toolchain_root(),
            kernel_name: "Kernel".to_string(),
            integration: RootIntegration::None,
            config_preset: None,
            jobs: num_cpus::get(),
            build_user: "kbuild".to_string(),
            build_host: "ci".to_string(),
            ccache: false,
            anykernel: Remote::new(ANYKERNEL3_URL, ANYKERNEL3_BRANCH),
            telegram: None,
        }
    }
}

impl PipelineConfig {
    pub fn kernel_dir(&self) -> PathBuf {
        self.workdir.join("kernel")
    }

    /// `make O=out` output directory.
    pub fn out_dir(&self) -> PathBuf {
        self.kernel_dir().join("out")
    }

    pub fn anykernel_dir(&self) -> PathBuf {
        self.workdir.join("AnyKernel3")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workdir.join("logs")
    }
}

/// Toolchains live in the home directory unless told otherwise.
pub fn default_toolchain_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = PipelineConfig {
            workdir: PathBuf::from("/work"),
            ..PipelineConfig::default()
        };
        assert_eq!(config.kernel_dir(), PathBuf::from("/work/kernel"));
        assert_eq!(config.out_dir(), PathBuf::from("/work/kernel/out"));
        assert_eq!(config.anykernel_dir(), PathBuf::from("/work/AnyKernel3"));
    }

    #[test]
    fn test_default_jobs_match_cores() {
        assert_eq!(PipelineConfig::default().jobs, num_cpus::get());
        assert!(PipelineConfig::default().telegram.is_none());
    }
}
