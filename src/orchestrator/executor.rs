//! Build execution: environment assembly, `make` spawning, output streaming.
//!
//! Both `make` invocations stream stdout/stderr line by line into
//! `<out>/build.log` and the logger. The exit status decides success of each
//! step; the expected image decides success of the build as a whole.

use crate::config::PipelineConfig;
use crate::error::BuildError;
use crate::kernel::toolchain::search_path;
use crate::models::{BuildArtifact, BuildJob, ImageKind, ToolchainSet};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Everything `make` needs, fixed before compilation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub job: BuildJob,
    /// Kernel source root, the working directory of `make`
    pub source_dir: PathBuf,
    pub toolchains: ToolchainSet,
    pub jobs: usize,
    pub build_user: String,
    pub build_host: String,
    pub ccache: bool,
}

impl BuildEnvironment {
    pub fn new(job: BuildJob, source_dir: PathBuf, toolchains: ToolchainSet, config: &PipelineConfig) -> Self {
        BuildEnvironment {
            job,
            source_dir,
            toolchains,
            jobs: config.jobs.max(1),
            build_user: config.build_user.clone(),
            build_host: config.build_host.clone(),
            ccache: config.ccache,
        }
    }

    /// `O=` value, relative to the source dir when the output lives inside it.
    pub fn out_arg(&self) -> String {
        let out = self
            .job
            .out_dir
            .strip_prefix(&self.source_dir)
            .unwrap_or(&self.job.out_dir);
        format!("O={}", out.display())
    }

    /// Value passed as `CC=`.
    pub fn compiler(&self) -> String {
        if self.ccache {
            format!("ccache {}", self.toolchains.compiler)
        } else {
            self.toolchains.compiler.clone()
        }
    }

    /// `make O=out ARCH=<arch> <defconfig>`
    pub fn configure_args(&self) -> Vec<String> {
        vec![
            self.out_arg(),
            format!("ARCH={}", self.job.arch),
            self.job.defconfig.clone(),
        ]
    }

    /// `make -jN O=out ARCH=.. CC=.. [CLANG_TRIPLE=..] CROSS_COMPILE=.. [CROSS_COMPILE_ARM32=..]`
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-j{}", self.jobs),
            self.out_arg(),
            format!("ARCH={}", self.job.arch),
            format!("CC={}", self.compiler()),
        ];
        if let Some(triple) = &self.toolchains.clang_triple {
            args.push(format!("CLANG_TRIPLE={}", triple));
        }
        args.push(format!("CROSS_COMPILE={}", self.job.cross_compile));
        if let Some(arm32) = &self.job.cross_compile_arm32 {
            args.push(format!("CROSS_COMPILE_ARM32={}", arm32));
        }
        args
    }

    /// Variables exported to both `make` invocations.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), search_path(&self.toolchains.bin_dirs)),
            ("ARCH".to_string(), self.job.arch.to_string()),
            ("SUBARCH".to_string(), self.job.arch.to_string()),
            ("KBUILD_BUILD_USER".to_string(), self.build_user.clone()),
            ("KBUILD_BUILD_HOST".to_string(), self.build_host.clone()),
        ]
    }
}

/// Runs the two-step kernel build.
pub trait KernelBuilder: Send + Sync {
    fn build<'a>(&'a self, env: &'a BuildEnvironment) -> BoxFuture<'a, Result<(), BuildError>>;
}

/// Production builder spawning `make`.
#[derive(Debug, Clone)]
pub struct MakeBuilder {
    program: String,
}

impl MakeBuilder {
    pub fn new() -> Self {
        MakeBuilder {
            program: "make".to_string(),
        }
    }

    /// Use another executable in place of `make`.
    pub fn with_program(program: impl Into<String>) -> Self {
        MakeBuilder {
            program: program.into(),
        }
    }

    async fn run_steps(&self, env: &BuildEnvironment) -> Result<(), BuildError> {
        let log_path = env.job.build_log_path();
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BuildError::ConfigurationFailed(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        log::info!("[Build] [CONFIGURE] make {}", env.configure_args().join(" "));
        run_make(&self.program, &env.job.defconfig, &env.configure_args(), env, &log_path).await?;

        log::info!("[Build] [COMPILE] make {}", env.build_args().join(" "));
        run_make(&self.program, &format!("-j{}", env.jobs), &env.build_args(), env, &log_path).await?;

        log::info!("[Build] [SUCCESS] Kernel build completed");
        Ok(())
    }
}

impl Default for MakeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder for MakeBuilder {
    fn build<'a>(&'a self, env: &'a BuildEnvironment) -> BoxFuture<'a, Result<(), BuildError>> {
        Box::pin(self.run_steps(env))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn close(self, stdout_closed: &mut bool, stderr_closed: &mut bool) {
        match self {
            Stream::Stdout => *stdout_closed = true,
            Stream::Stderr => *stderr_closed = true,
        }
    }
}

async fn write_line(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await
}

/// Flush buffered build.log output, warning when it cannot reach the disk.
async fn finish_log(file: &mut tokio::fs::File, log_path: &Path) -> bool {
    match file.flush().await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("[Build] Failed to flush {}: {}", log_path.display(), e);
            false
        }
    }
}

/// Spawn one `make` step and stream its output into `log_path`.
pub async fn run_make(
    program: &str,
    step: &str,
    args: &[String],
    env: &BuildEnvironment,
    log_path: &Path,
) -> Result<(), BuildError> {
    let mut log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| BuildError::ConfigurationFailed(format!("Cannot open {}: {}", log_path.display(), e)))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&env.source_dir)
        .envs(env.env_vars())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        BuildError::ConfigurationFailed(format!(
            "Failed to spawn {} in {}: {}",
            program,
            env.source_dir.display(),
            e
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BuildError::ConfigurationFailed("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BuildError::ConfigurationFailed("Failed to capture stderr".to_string()))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut compiled_units = 0_usize;

    while !(stdout_closed && stderr_closed) {
        let (stream, line) = tokio::select! {
            line = stdout_lines.next_line(), if !stdout_closed => (Stream::Stdout, line),
            line = stderr_lines.next_line(), if !stderr_closed => (Stream::Stderr, line),
        };

        match line {
            Ok(Some(line)) => {
                let line = match stream {
                    Stream::Stdout => line,
                    Stream::Stderr => format!("[STDERR] {}", line),
                };
                if line.contains(" CC ") || line.contains(" LD ") || line.contains(" AR ") {
                    compiled_units += 1;
                    if compiled_units % 500 == 0 {
                        log::info!("[Build] [STATUS] Processed {} units...", compiled_units);
                    }
                }
                log::debug!("[Build] {}", line);
                if let Err(e) = write_line(&mut log_file, &line).await {
                    log::warn!("[Build] Failed to write {}: {}", log_path.display(), e);
                }
            }
            Ok(None) => stream.close(&mut stdout_closed, &mut stderr_closed),
            Err(e) => {
                log::warn!("[Build] {:?} read error: {}", stream, e);
                stream.close(&mut stdout_closed, &mut stderr_closed);
            }
        }
    }

    finish_log(&mut log_file, log_path).await;

    let status = child
        .wait()
        .await
        .map_err(|e| BuildError::ConfigurationFailed(format!("Failed to wait for {}: {}", program, e)))?;

    if status.success() {
        Ok(())
    } else {
        log::error!("[Build] [FAILED] make {} exited with {}", step, status);
        Err(BuildError::ToolFailed {
            step: step.to_string(),
            code: status.code(),
        })
    }
}

/// Locate build outputs, failing when the expected image is absent.
pub fn collect_artifact(
    job: &BuildJob,
    expected: ImageKind,
    ship_dtbo: bool,
    ship_dtb: bool,
) -> Result<BuildArtifact, BuildError> {
    let image_path = job.image_path(expected);
    if !image_path.is_file() {
        log::error!("[Build] [FAILED] Expected image missing: {}", image_path.display());
        return Err(BuildError::ArtifactMissing(image_path));
    }

    let optional = |enabled: bool, name: &str| {
        let path = job.boot_dir().join(name);
        (enabled && path.is_file()).then_some(path)
    };

    Ok(BuildArtifact {
        image_path,
        image_kind: expected,
        dtbo_path: optional(ship_dtbo, "dtbo.img"),
        dtb_path: optional(ship_dtb, "dtb.img"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceTable;
    use crate::kernel::toolchain::describe_toolchains;
    use tempfile::TempDir;

    fn mido_env(root: &Path) -> BuildEnvironment {
        let profile = DeviceTable::builtin().resolve("mido").unwrap();
        let source_dir = root.join("kernel");
        let job = BuildJob::new(
            &profile,
            "https://example.com/kernel.git",
            "main",
            source_dir.join("out"),
        );
        let toolchains = describe_toolchains(&profile.toolchain, &root.join("tc"));
        let config = PipelineConfig {
            jobs: 8,
            ..PipelineConfig::default()
        };
        BuildEnvironment::new(job, source_dir, toolchains, &config)
    }

    #[test]
    fn test_configure_args() {
        let env = mido_env(Path::new("/work"));
        assert_eq!(env.configure_args(), vec!["O=out", "ARCH=arm64", "mido_defconfig"]);
    }

    #[test]
    fn test_build_args() {
        let env = mido_env(Path::new("/work"));
        assert_eq!(
            env.build_args(),
            vec![
                "-j8",
                "O=out",
                "ARCH=arm64",
                "CC=clang",
                "CLANG_TRIPLE=aarch64-linux-gnu-",
                "CROSS_COMPILE=aarch64-linux-gnu-",
                "CROSS_COMPILE_ARM32=arm-linux-gnueabi-",
            ]
        );
    }

    #[test]
    fn test_ccache_prefixes_compiler() {
        let mut env = mido_env(Path::new("/work"));
        env.ccache = true;
        assert!(env.build_args().contains(&"CC=ccache clang".to_string()));
    }

    #[test]
    fn test_env_vars() {
        let env = mido_env(Path::new("/work"));
        let vars = env.env_vars();
        let get = |key: &str| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        assert!(get("PATH").unwrap().starts_with("/work/tc/clang/bin"));
        assert_eq!(get("SUBARCH").unwrap(), "arm64");
        assert_eq!(get("KBUILD_BUILD_USER").unwrap(), "kbuild");
    }

    #[test]
    fn test_collect_artifact_missing() {
        let temp = TempDir::new().unwrap();
        let env = mido_env(temp.path());
        let result = collect_artifact(&env.job, ImageKind::GzDtb, false, false);
        assert!(matches!(result, Err(BuildError::ArtifactMissing(p)) if p.ends_with("arch/arm64/boot/Image.gz-dtb")));
    }

    #[test]
    fn test_collect_artifact_with_dtbo() {
        let temp = TempDir::new().unwrap();
        let env = mido_env(temp.path());
        std::fs::create_dir_all(env.job.boot_dir()).unwrap();
        std::fs::write(env.job.image_path(ImageKind::GzDtb), b"kernel").unwrap();
        std::fs::write(env.job.boot_dir().join("dtbo.img"), b"dtbo").unwrap();

        let artifact = collect_artifact(&env.job, ImageKind::GzDtb, true, true).unwrap();
        assert_eq!(artifact.image_kind, ImageKind::GzDtb);
        assert!(artifact.dtbo_path.is_some());
        assert!(artifact.dtb_path.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_tool_writes_log() {
        let temp = TempDir::new().unwrap();
        let env = mido_env(temp.path());
        std::fs::create_dir_all(&env.source_dir).unwrap();

        MakeBuilder::with_program("true").build(&env).await.unwrap();
        assert!(env.job.build_log_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_tool_is_tool_failed() {
        let temp = TempDir::new().unwrap();
        let env = mido_env(temp.path());
        std::fs::create_dir_all(&env.source_dir).unwrap();

        let err = MakeBuilder::with_program("false").build(&env).await.unwrap_err();
        match err {
            BuildError::ToolFailed { step, code } => {
                assert_eq!(step, "mido_defconfig");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_finish_log_reports_full_disk() {
        let path = Path::new("/dev/full");
        let mut file = OpenOptions::new().append(true).open(path).await.unwrap();
        // Buffered by tokio, the ENOSPC only surfaces on flush
        file.write_all(b"  CC      init/main.o\n").await.unwrap();
        assert!(!finish_log(&mut file, path).await);
    }

    #[tokio::test]
    async fn test_missing_program_is_configuration_failure() {
        let temp = TempDir::new().unwrap();
        let env = mido_env(temp.path());
        std::fs::create_dir_all(&env.source_dir).unwrap();

        let err = MakeBuilder::with_program("kbuild-no-such-make").build(&env).await.unwrap_err();
        assert!(matches!(err, BuildError::ConfigurationFailed(_)));
    }
}
