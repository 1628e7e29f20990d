//! Re:Kernel integration.
//!
//! Drops the driver into `drivers/rekernel`, runs the semantic patches that
//! apply to this tree, then wires the driver into Kconfig, the Makefile and
//! the device defconfig.

use super::{download, run_spatch, PatchResult, PatchSources};
use crate::error::PatchError;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SOURCE_ARCHIVE: &str = "src.zip";
const PROC_OPS_COCCI: &str = "proc_ops.cocci";
const BINDER_COCCI: &str = "binder.cocci";
const SIGNAL_COCCI: &str = "signal.cocci";

const KCONFIG_SOURCE: &str = r#"source "drivers/rekernel/Kconfig""#;
const MAKEFILE_RULE: &str = "obj-$(CONFIG_REKERNEL) += rekernel/";
const BINDER_MARKER: &str =
    "binder_proc_transaction() - sends a transaction to a process and wakes it up";

pub async fn apply(
    client: &reqwest::Client,
    sources: &PatchSources,
    tree: &Path,
    defconfig: &Path,
) -> PatchResult<()> {
    let scratch = TempDir::new()?;
    let cocci_dir = scratch.path().join("cocci");
    fs::create_dir_all(&cocci_dir)?;

    log::info!("[Patcher] [Re:Kernel] Downloading source and patches");
    let archive = download(
        client,
        &format!("{}/{}", sources.rekernel_base.trim_end_matches('/'), SOURCE_ARCHIVE),
        scratch.path(),
    )
    .await?;
    let patches_base = sources.rekernel_patches_base.trim_end_matches('/');
    for name in [PROC_OPS_COCCI, BINDER_COCCI, SIGNAL_COCCI] {
        download(client, &format!("{}/{}", patches_base, name), &cocci_dir).await?;
    }

    let extract_root = scratch.path().join("src");
    let install_tree = tree.to_path_buf();
    let driver_dir = tokio::task::spawn_blocking(move || -> PatchResult<PathBuf> {
        safe_extract(&archive, &extract_root)?;
        install_driver(&extract_root, &install_tree)
    })
    .await
    .map_err(|e| PatchError::PatchFailed(format!("Re:Kernel extraction task failed: {}", e)))??;
    log::info!("[Patcher] [Re:Kernel] Installed driver at {}", driver_dir.display());

    if has_proc_ops(tree) {
        apply_cocci(tree, &cocci_dir.join(PROC_OPS_COCCI), &driver_dir.join("rekernel.c")).await;
    }

    let binder = tree.join("drivers/android/binder.c");
    if !binder.exists() {
        log::warn!("[Patcher] [Re:Kernel] {} not found, skipping", binder.display());
    } else if !binder_has_transaction_doc(&binder) {
        log::error!(
            "[Patcher] [Re:Kernel] Could not find 'binder_proc_transaction()' in {}",
            binder.display()
        );
    } else {
        apply_cocci(tree, &cocci_dir.join(BINDER_COCCI), &binder).await;
    }

    let signal = tree.join("kernel/signal.c");
    if signal.exists() {
        apply_cocci(tree, &cocci_dir.join(SIGNAL_COCCI), &signal).await;
    } else {
        log::warn!("[Patcher] [Re:Kernel] {} not found, skipping", signal.display());
    }

    configure_build_files(tree, defconfig)?;
    log::info!("[Patcher] [Re:Kernel] Patches applied");
    Ok(())
}

async fn apply_cocci(tree: &Path, cocci: &Path, target: &Path) {
    if !target.exists() {
        log::warn!("[Patcher] [Re:Kernel] Target file not found: {}", target.display());
        return;
    }
    log::info!(
        "[Patcher] [Re:Kernel] Applying {} to {}",
        cocci.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        target.display()
    );
    let args: Vec<OsString> = vec![
        "--in-place".into(),
        "--sp-file".into(),
        cocci.as_os_str().to_os_string(),
        target.as_os_str().to_os_string(),
    ];
    run_spatch(tree, args).await;
}

/// Extract `archive` into `dest`, rejecting entries that would escape it.
pub fn safe_extract(archive: &Path, dest: &Path) -> PatchResult<()> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| PatchError::PatchFailed(format!("Invalid archive {}: {}", archive.display(), e)))?;

    fs::create_dir_all(dest)?;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| PatchError::PatchFailed(format!("Corrupt archive entry {}: {}", i, e)))?;

        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| PatchError::UnsafeArchiveEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// Move the extracted `rekernel/` directory into `drivers/rekernel`.
fn install_driver(extract_root: &Path, tree: &Path) -> PatchResult<PathBuf> {
    let source = extract_root.join("rekernel");
    if !source.is_dir() {
        return Err(PatchError::PatchFailed(
            "Re:Kernel archive has no rekernel/ directory".to_string(),
        ));
    }

    let target = tree.join("drivers").join("rekernel");
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    copy_dir(&source, &target)?;
    Ok(target)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

pub fn has_proc_ops(tree: &Path) -> bool {
    fs::read_to_string(tree.join("include/linux/proc_fs.h"))
        .map(|c| c.contains("struct proc_ops"))
        .unwrap_or(false)
}

pub fn binder_has_transaction_doc(binder: &Path) -> bool {
    fs::read_to_string(binder)
        .map(|c| c.contains(BINDER_MARKER))
        .unwrap_or(false)
}

fn mentions_rekernel(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|c| c.to_lowercase().contains("rekernel"))
        .unwrap_or(false)
}

/// Insert the Kconfig `source` line before the last `endmenu`, or append it.
///
/// Returns `None` when the line is already present.
pub fn insert_kconfig_source(content: &str) -> Option<String> {
    if content.contains(KCONFIG_SOURCE) {
        return None;
    }
    let mut lines: Vec<&str> = content.split('\n').collect();
    match lines.iter().rposition(|line| line.trim() == "endmenu") {
        Some(pos) => lines.insert(pos, KCONFIG_SOURCE),
        None => lines.push(KCONFIG_SOURCE),
    }
    Some(lines.join("\n"))
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Wire the driver into defconfig, `drivers/Kconfig` and `drivers/Makefile`.
pub fn configure_build_files(tree: &Path, defconfig: &Path) -> PatchResult<()> {
    let kconfig = tree.join("drivers/Kconfig");
    let makefile = tree.join("drivers/Makefile");

    for path in [defconfig, kconfig.as_path(), makefile.as_path()] {
        if !path.exists() {
            log::warn!("[Patcher] [Re:Kernel] {} not found, skipping", path.display());
            continue;
        }
        if mentions_rekernel(path) {
            log::warn!("[Patcher] [Re:Kernel] {} already contains Re:Kernel", path.display());
            continue;
        }

        if path == defconfig {
            append(path, "\nCONFIG_REKERNEL=y\nCONFIG_REKERNEL_NETWORK=n\n")?;
        } else if path == kconfig {
            let content = fs::read_to_string(path)?;
            if let Some(updated) = insert_kconfig_source(&content) {
                fs::write(path, updated)?;
            }
        } else if !fs::read_to_string(path)?.contains(MAKEFILE_RULE) {
            append(path, &format!("\n{}\n", MAKEFILE_RULE))?;
        }
        log::info!("[Patcher] [Re:Kernel] Updated {}", path.display());
    }
    Ok(())
}
