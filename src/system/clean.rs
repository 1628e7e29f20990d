//! Workspace cleanup between runs on reused runners.

use crate::config::PipelineConfig;
use crate::kernel::toolchain::TOOLCHAIN_DIRS;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Leftovers of manual boot image repacking.
const TEMP_FILES: [&str; 3] = ["boot.img", "magiskboot", "nohup.out"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    pub toolchains: bool,
    pub ccache: bool,
}

impl CleanOptions {
    pub fn all() -> Self {
        CleanOptions {
            toolchains: true,
            ccache: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub ccache_cleared: bool,
}

fn remove_path(path: &Path, report: &mut CleanReport) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    log::info!("[Clean] Removed {}", path.display());
    report.removed.push(path.to_path_buf());
    Ok(())
}

/// Remove sources, outputs and temporary files; optionally toolchains and ccache.
pub fn clean(config: &PipelineConfig, options: CleanOptions) -> io::Result<CleanReport> {
    let mut report = CleanReport::default();

    let mut targets = vec![
        config.kernel_dir(),
        config.workdir.join("build"),
        config.anykernel_dir(),
    ];
    targets.extend(TEMP_FILES.iter().map(|name| config.workdir.join(name)));
    if options.toolchains {
        targets.extend(TOOLCHAIN_DIRS.iter().map(|dir| config.toolchain_root.join(dir)));
    }

    for target in &targets {
        remove_path(target, &mut report)?;
    }

    if options.ccache {
        report.ccache_cleared = match Command::new("ccache").arg("-C").output() {
            Ok(output) if output.status.success() => {
                log::info!("[Clean] Ccache cleared");
                true
            }
            Ok(output) => {
                log::warn!("[Clean] ccache -C exited with {}", output.status);
                false
            }
            Err(e) => {
                log::warn!("[Clean] Could not run ccache: {}", e);
                false
            }
        };
    }

    Ok(report)
}
