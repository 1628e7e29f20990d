//! Core data types for kbuild.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Length of the abbreviated commit hash used in names and messages.
pub const SHORT_SHA_LEN: usize = 7;

/// Target architecture of a kernel build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Arm64,
    Arm,
}

impl Arch {
    /// Value passed as `ARCH=` / `SUBARCH=` to kbuild.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
        }
    }

    /// Directory holding boot images, relative to the build output dir.
    pub fn boot_dir(&self) -> PathBuf {
        PathBuf::from("arch").join(self.as_str()).join("boot")
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel image variant produced by the build.
///
/// Packaging probes variants in [`ImageKind::PRIORITY`] order and ships the
/// first one present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    /// Compressed image with appended device tree (`Image.gz-dtb`)
    GzDtb,
    /// Uncompressed image with appended device tree (`Image-dtb`)
    Dtb,
    /// Compressed image only (`Image.gz`, `zImage` on arm)
    Gz,
    /// Raw image (`Image`)
    Raw,
}

impl ImageKind {
    pub const PRIORITY: [ImageKind; 4] = [ImageKind::GzDtb, ImageKind::Dtb, ImageKind::Gz, ImageKind::Raw];

    pub fn file_name(&self, arch: Arch) -> &'static str {
        match (arch, self) {
            (Arch::Arm64, ImageKind::GzDtb) => "Image.gz-dtb",
            (Arch::Arm, ImageKind::GzDtb) => "zImage-dtb",
            (_, ImageKind::Dtb) => "Image-dtb",
            (Arch::Arm64, ImageKind::Gz) => "Image.gz",
            (Arch::Arm, ImageKind::Gz) => "zImage",
            (_, ImageKind::Raw) => "Image",
        }
    }
}

/// A git remote pinned to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub url: String,
    pub branch: String,
}

impl Remote {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Remote {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

/// Pinned toolchain sources and the prefixes they provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSpec {
    /// Clang toolchain. When absent the build uses `<cross_compile>gcc`.
    #[serde(default)]
    pub clang: Option<Remote>,
    #[serde(default)]
    pub gcc64: Option<Remote>,
    #[serde(default)]
    pub gcc32: Option<Remote>,
    pub cross_compile: String,
    #[serde(default)]
    pub cross_compile_arm32: Option<String>,
    #[serde(default)]
    pub clang_triple: Option<String>,
}

/// One row of the device lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub codename: String,
    pub display_name: String,
    pub defconfig: String,
    pub arch: Arch,
    pub toolchain: ToolchainSpec,
    /// Image whose presence marks a successful build.
    pub expected_image: ImageKind,
    #[serde(default)]
    pub ship_dtbo: bool,
    #[serde(default)]
    pub ship_dtb: bool,
}

/// A single kernel build, fixed once compilation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub device: String,
    pub source_url: String,
    pub branch: String,
    pub arch: Arch,
    pub cross_compile: String,
    pub cross_compile_arm32: Option<String>,
    pub defconfig: String,
    pub out_dir: PathBuf,
}

impl BuildJob {
    pub fn new(profile: &DeviceProfile, source_url: &str, branch: &str, out_dir: PathBuf) -> Self {
        BuildJob {
            device: profile.codename.clone(),
            source_url: source_url.to_string(),
            branch: branch.to_string(),
            arch: profile.arch,
            cross_compile: profile.toolchain.cross_compile.clone(),
            cross_compile_arm32: profile.toolchain.cross_compile_arm32.clone(),
            defconfig: profile.defconfig.clone(),
            out_dir,
        }
    }

    /// `out/arch/<arch>/boot`
    pub fn boot_dir(&self) -> PathBuf {
        self.out_dir.join(self.arch.boot_dir())
    }

    /// Fixed path checked after compilation.
    pub fn image_path(&self, kind: ImageKind) -> PathBuf {
        self.boot_dir().join(kind.file_name(self.arch))
    }

    /// Build tool output persisted for diagnosis and failure uploads.
    pub fn build_log_path(&self) -> PathBuf {
        self.out_dir.join("build.log")
    }
}

/// Fetched toolchains, referenced but never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSet {
    /// Compiler passed as `CC=`
    pub compiler: String,
    /// Directories prepended to `PATH`
    pub bin_dirs: Vec<PathBuf>,
    pub cross_compile: String,
    pub cross_compile_arm32: Option<String>,
    pub clang_triple: Option<String>,
    /// First line of `<compiler> --version`
    pub compiler_identity: String,
}

/// Freshly cloned kernel source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub path: PathBuf,
    pub commit: String,
}

impl SourceTree {
    pub fn short_sha(&self) -> &str {
        short_sha(&self.commit)
    }
}

/// Abbreviate a commit hash.
pub fn short_sha(commit: &str) -> &str {
    match commit.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &commit[..idx],
        None => commit,
    }
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub image_path: PathBuf,
    pub image_kind: ImageKind,
    pub dtbo_path: Option<PathBuf>,
    pub dtb_path: Option<PathBuf>,
}

/// Inputs of the flashable archive naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub name: String,
    pub device: String,
    /// Already formatted date token, see [`ArchiveName::date_token`]
    pub date: String,
    pub short_sha: String,
}

impl ArchiveName {
    pub fn date_token(at: chrono::DateTime<chrono::Local>) -> String {
        at.format("%Y%m%d-%H%M").to_string()
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}-{}-{}.zip", self.name, self.device, self.date, self.short_sha)
    }
}

/// A flashable archive ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedZip {
    pub path: PathBuf,
    pub file_name: String,
}

impl PackagedZip {
    pub fn new(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        PackagedZip {
            path: path.to_path_buf(),
            file_name,
        }
    }
}

/// Payload of a bot message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Document { path: PathBuf, caption: String },
    Sticker(String),
}

/// A single fire-and-forget message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub chat_id: String,
    pub payload: MessagePayload,
}

/// Source integration applied between acquisition and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootIntegration {
    #[default]
    None,
    KernelSu,
    ReKernel,
    Lxc,
}

impl FromStr for RootIntegration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(RootIntegration::None),
            "kernelsu" | "ksu" => Ok(RootIntegration::KernelSu),
            "rekernel" | "re:kernel" => Ok(RootIntegration::ReKernel),
            "lxc" => Ok(RootIntegration::Lxc),
            other => Err(format!(
                "unknown integration '{}', expected one of: none, kernelsu, rekernel, lxc",
                other
            )),
        }
    }
}

impl fmt::Display for RootIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RootIntegration::None => "none",
            RootIntegration::KernelSu => "KernelSU",
            RootIntegration::ReKernel => "Re:Kernel",
            RootIntegration::Lxc => "LXC",
        };
        f.write_str(s)
    }
}
