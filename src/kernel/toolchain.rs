//! Cross-compiler toolchain acquisition.
//!
//! Toolchains are cloned from pinned remotes into fixed directories under the
//! toolchain root, then described by a [`ToolchainSet`] that the build
//! environment consumes.

use crate::error::BuildError;
use crate::kernel::git::GitManager;
use crate::models::{ToolchainSet, ToolchainSpec};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const CLANG_DIR: &str = "clang";
pub const GCC64_DIR: &str = "gcc-64";
pub const GCC32_DIR: &str = "gcc-32";

/// Every directory a toolchain may be cloned into, relative to the root.
pub const TOOLCHAIN_DIRS: [&str; 3] = [CLANG_DIR, GCC64_DIR, GCC32_DIR];

/// Clone every remote named by `spec` and describe the result.
///
/// Blocking; run it on a blocking thread from async code.
pub fn fetch_toolchains(spec: &ToolchainSpec, root: &Path) -> Result<ToolchainSet, BuildError> {
    std::fs::create_dir_all(root).map_err(|e| {
        BuildError::AcquisitionFailed(format!(
            "Cannot create toolchain root {}: {}",
            root.display(),
            e
        ))
    })?;

    let remotes = [
        (CLANG_DIR, spec.clang.as_ref()),
        (GCC64_DIR, spec.gcc64.as_ref()),
        (GCC32_DIR, spec.gcc32.as_ref()),
    ];

    for (dir, remote) in remotes {
        if let Some(remote) = remote {
            log::info!("[Toolchain] Fetching {} from {} ({})", dir, remote.url, remote.branch);
            GitManager::clone_branch(&remote.url, &remote.branch, root.join(dir)).map_err(|e| {
                BuildError::AcquisitionFailed(format!("Toolchain {} clone failed: {}", dir, e))
            })?;
        }
    }

    let mut set = describe_toolchains(spec, root);
    set.compiler_identity = compiler_identity(&set);
    log::info!("[Toolchain] Compiler: {}", set.compiler_identity);
    Ok(set)
}

/// Derive compiler and search path from `spec` without touching the disk.
pub fn describe_toolchains(spec: &ToolchainSpec, root: &Path) -> ToolchainSet {
    let mut bin_dirs: Vec<PathBuf> = Vec::new();
    if spec.clang.is_some() {
        bin_dirs.push(root.join(CLANG_DIR).join("bin"));
    }
    if spec.gcc64.is_some() {
        bin_dirs.push(root.join(GCC64_DIR).join("bin"));
    }
    if spec.gcc32.is_some() {
        bin_dirs.push(root.join(GCC32_DIR).join("bin"));
    }

    let compiler = if spec.clang.is_some() {
        "clang".to_string()
    } else {
        format!("{}gcc", spec.cross_compile)
    };

    ToolchainSet {
        compiler,
        bin_dirs,
        cross_compile: spec.cross_compile.clone(),
        cross_compile_arm32: spec.cross_compile_arm32.clone(),
        clang_triple: spec.clang_triple.clone(),
        compiler_identity: String::new(),
    }
}

/// `PATH` with the toolchain bin dirs in front of the inherited one.
pub fn search_path(bin_dirs: &[PathBuf]) -> String {
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let mut paths: Vec<PathBuf> = bin_dirs.to_vec();
    paths.extend(std::env::split_paths(&inherited));
    std::env::join_paths(paths)
        .map(|joined| joined.to_string_lossy().into_owned())
        .unwrap_or_else(|_| inherited.to_string_lossy().into_owned())
}

/// First line of `<compiler> --version`, with vendor URLs stripped.
fn compiler_identity(set: &ToolchainSet) -> String {
    let output = Command::new(&set.compiler)
        .arg("--version")
        .env("PATH", search_path(&set.bin_dirs))
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            identity_line(&stdout).unwrap_or_else(|| set.compiler.clone())
        }
        Ok(out) => {
            log::warn!("[Toolchain] {} --version exited with {}", set.compiler, out.status);
            set.compiler.clone()
        }
        Err(e) => {
            log::warn!("[Toolchain] Could not run {} --version: {}", set.compiler, e);
            set.compiler.clone()
        }
    }
}

fn identity_line(version_output: &str) -> Option<String> {
    let first = version_output.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let cleaned = match first.find(" (http") {
        Some(start) => match first[start..].find(')') {
            Some(end) => format!("{}{}", &first[..start], &first[start + end + 1..]),
            None => first[..start].to_string(),
        },
        None => first.to_string(),
    };
    Some(cleaned.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceTable;

    #[test]
    fn test_clang_toolchain_description() {
        let profile = DeviceTable::builtin().resolve("sweet").unwrap();
        let set = describe_toolchains(&profile.toolchain, Path::new("/tc"));

        assert_eq!(set.compiler, "clang");
        assert_eq!(
            set.bin_dirs,
            vec![
                PathBuf::from("/tc/clang/bin"),
                PathBuf::from("/tc/gcc-64/bin"),
                PathBuf::from("/tc/gcc-32/bin"),
            ]
        );
        assert_eq!(set.cross_compile, "aarch64-linux-android-");
    }

    #[test]
    fn test_gcc_only_toolchain_description() {
        let profile = DeviceTable::builtin().resolve("j6primelte").unwrap();
        let set = describe_toolchains(&profile.toolchain, Path::new("/tc"));

        assert_eq!(set.compiler, "arm-linux-androideabi-gcc");
        assert_eq!(set.bin_dirs, vec![PathBuf::from("/tc/gcc-32/bin")]);
    }

    #[test]
    fn test_search_path_prepends() {
        let path = search_path(&[PathBuf::from("/tc/clang/bin")]);
        assert!(path.starts_with("/tc/clang/bin"));
    }

    #[test]
    fn test_identity_line_strips_urls() {
        let out = "Proton clang version 13.0.0 (https://github.com/llvm/llvm-project abc)\nTarget: x86_64\n";
        assert_eq!(identity_line(out).unwrap(), "Proton clang version 13.0.0");
        assert_eq!(identity_line("gcc 4.9\n").unwrap(), "gcc 4.9");
        assert!(identity_line("").is_none());
    }
}
