//! Flashable archive assembly on top of the AnyKernel3 template.

use crate::error::BuildError;
use crate::kernel::git::GitManager;
use crate::models::{ArchiveName, BuildArtifact, BuildJob, ImageKind, PackagedZip, Remote};
use futures::future::BoxFuture;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Turns a build artifact into a flashable archive.
pub trait ArtifactPackager: Send + Sync {
    fn package<'a>(
        &'a self,
        job: &'a BuildJob,
        artifact: &'a BuildArtifact,
        name: &'a ArchiveName,
    ) -> BoxFuture<'a, Result<PackagedZip, BuildError>>;
}

/// Production packager cloning the template fresh for every run.
#[derive(Debug, Clone)]
pub struct AnyKernelPackager {
    template: Remote,
    workdir: PathBuf,
}

impl AnyKernelPackager {
    pub fn new(template: Remote, workdir: PathBuf) -> Self {
        AnyKernelPackager { template, workdir }
    }

    pub fn template_dir(&self) -> PathBuf {
        self.workdir.join("AnyKernel3")
    }

    fn package_blocking(
        &self,
        job: &BuildJob,
        artifact: &BuildArtifact,
        name: &ArchiveName,
    ) -> Result<PackagedZip, BuildError> {
        let template_dir = self.template_dir();
        GitManager::clone_branch(&self.template.url, &self.template.branch, &template_dir)
            .map_err(|e| BuildError::PackagingFailed(format!("Template clone failed: {}", e)))?;

        let git_dir = template_dir.join(".git");
        if git_dir.exists() {
            fs::remove_dir_all(&git_dir).map_err(packaging_io)?;
        }

        let dest = self.workdir.join(name.file_name());
        assemble(&template_dir, job, artifact, &dest)
    }
}

impl ArtifactPackager for AnyKernelPackager {
    fn package<'a>(
        &'a self,
        job: &'a BuildJob,
        artifact: &'a BuildArtifact,
        name: &'a ArchiveName,
    ) -> BoxFuture<'a, Result<PackagedZip, BuildError>> {
        Box::pin(async move {
            let packager = self.clone();
            let job = job.clone();
            let artifact = artifact.clone();
            let name = name.clone();
            tokio::task::spawn_blocking(move || packager.package_blocking(&job, &artifact, &name))
                .await
                .map_err(|e| BuildError::PackagingFailed(format!("Packaging task failed: {}", e)))?
        })
    }
}

fn packaging_io(e: io::Error) -> BuildError {
    BuildError::PackagingFailed(e.to_string())
}

/// Copy the first image variant present in the boot dir into `template_dir`.
pub fn stage_image(boot_dir: &Path, job: &BuildJob, template_dir: &Path) -> Result<ImageKind, BuildError> {
    for kind in ImageKind::PRIORITY {
        let file_name = kind.file_name(job.arch);
        let candidate = boot_dir.join(file_name);
        if candidate.is_file() {
            fs::copy(&candidate, template_dir.join(file_name)).map_err(packaging_io)?;
            log::info!("[Package] Staged {}", file_name);
            return Ok(kind);
        }
    }
    Err(BuildError::PackagingFailed(format!(
        "No kernel image found in {}",
        boot_dir.display()
    )))
}

/// Stage the artifact into a prepared template and compress it to `dest`.
pub fn assemble(
    template_dir: &Path,
    job: &BuildJob,
    artifact: &BuildArtifact,
    dest: &Path,
) -> Result<PackagedZip, BuildError> {
    stage_image(&job.boot_dir(), job, template_dir)?;

    for extra in [&artifact.dtbo_path, &artifact.dtb_path].into_iter().flatten() {
        if let Some(file_name) = extra.file_name() {
            fs::copy(extra, template_dir.join(file_name)).map_err(packaging_io)?;
            log::info!("[Package] Staged {}", file_name.to_string_lossy());
        }
    }

    write_zip(template_dir, dest).map_err(|e| {
        BuildError::PackagingFailed(format!("Cannot write {}: {}", dest.display(), e))
    })?;
    log::info!("[Package] Created {}", dest.display());
    Ok(PackagedZip::new(dest))
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    entries.sort();
    for path in entries {
        let is_dir = path.is_dir();
        out.push(path.strip_prefix(root).unwrap_or(&path).to_path_buf());
        if is_dir {
            collect_entries(root, &path, out)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mode_of(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn mode_of(path: &Path) -> io::Result<u32> {
    Ok(if path.is_dir() { 0o755 } else { 0o644 })
}

/// Deflate every file under `src_dir` into `dest`, keeping permission bits.
pub fn write_zip(src_dir: &Path, dest: &Path) -> io::Result<()> {
    let mut entries = Vec::new();
    collect_entries(src_dir, src_dir, &mut entries)?;

    let file = fs::File::create(dest)?;
    let mut zip = zip::ZipWriter::new(file);

    for relative in entries {
        let full = src_dir.join(&relative);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode_of(&full)?);

        if full.is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(&full)?)?;
        }
    }

    zip.finish()?;
    Ok(())
}
