use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use kbuild_action::config::{self, kconfig, loader, ConfigPreset};
use kbuild_action::kernel::diagnostics;
use kbuild_action::kernel::patcher::{PatchSources, SourcePatcher};
use kbuild_action::log_collector::level_from;
use kbuild_action::models::Remote;
use kbuild_action::system::{self, CleanOptions};
use kbuild_action::{
    Arch, BuildPipeline, BuildRequest, Collaborators, LogCollector, PipelineConfig, RootIntegration, TelegramConfig,
};

#[derive(Parser)]
#[command(name = "kbuild", version, about = "Build, package and deliver Android kernels")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a kernel for one device and deliver the flashable zip
    Build(BuildArgs),
    /// List supported devices
    Devices {
        /// JSON file with extra or replacement device profiles
        #[arg(long)]
        devices: Option<PathBuf>,
    },
    /// Check a defconfig against an option preset
    CheckConfig {
        file: PathBuf,
        #[arg(long)]
        preset: ConfigPreset,
        /// Fix what can be fixed in place
        #[arg(short, long)]
        write: bool,
    },
    /// Explain the errors in a build log
    AnalyzeLog { file: PathBuf },
    /// Apply an integration to a kernel tree
    Patch {
        integration: RootIntegration,
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Device whose arch and defconfig are patched (needed for rekernel)
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        devices: Option<PathBuf>,
        /// Download integration assets from this mirror instead
        #[arg(long)]
        mirror: Option<String>,
    },
    /// Remove sources, build output and temporary files
    Clean {
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        #[arg(long)]
        toolchain_root: Option<PathBuf>,
        /// Also remove cloned toolchains
        #[arg(long)]
        toolchains: bool,
        /// Also clear the ccache
        #[arg(long)]
        ccache: bool,
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Device codename
    #[arg(env = "KBUILD_DEVICE")]
    device: String,
    #[arg(long, env = "KERNEL_REPO")]
    repo: String,
    #[arg(long, env = "KERNEL_BRANCH")]
    branch: String,
    #[arg(long, env = "TG_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,
    #[arg(long, env = "TG_CHAT_ID")]
    chat_id: Option<String>,
    /// Archive name prefix
    #[arg(long, default_value = "Kernel")]
    name: String,
    #[arg(long, default_value = "none")]
    integration: RootIntegration,
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    #[arg(long)]
    toolchain_root: Option<PathBuf>,
    #[arg(long)]
    devices: Option<PathBuf>,
    #[arg(long)]
    jobs: Option<usize>,
    #[arg(long, default_value = config::TELEGRAM_API_BASE)]
    api_url: String,
    #[arg(long, default_value = config::ANYKERNEL3_URL)]
    anykernel_url: String,
    #[arg(long, default_value = config::ANYKERNEL3_BRANCH)]
    anykernel_branch: String,
    #[arg(long)]
    ccache: bool,
    #[arg(long)]
    config_preset: Option<ConfigPreset>,
    #[arg(long, env = "KBUILD_BUILD_USER")]
    build_user: Option<String>,
    #[arg(long, env = "KBUILD_BUILD_HOST")]
    build_host: Option<String>,
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn init_logging(log_dir: &Path, echo_stderr: bool) -> anyhow::Result<LogCollector> {
    let level = level_from(std::env::var("KBUILD_LOG").ok().as_deref());
    LogCollector::new(log_dir, level)
        .map(|collector| if echo_stderr { collector } else { collector.quiet() })
        .and_then(LogCollector::install)
        .map_err(anyhow::Error::msg)
}

async fn build(args: BuildArgs, collector: &LogCollector) -> anyhow::Result<i32> {
    let workdir = absolute(&args.workdir)?;
    std::fs::create_dir_all(&workdir).with_context(|| format!("Cannot create {}", workdir.display()))?;
    log::info!("[Main] kbuild {} logging to {}", kbuild_action::VERSION, collector.log_path().display());

    let devices = loader::load_device_table(args.devices.as_deref())?;

    let telegram = match (args.bot_token, args.chat_id) {
        (Some(token), Some(chat_id)) => Some(TelegramConfig {
            token,
            chat_id,
            api_base: args.api_url,
        }),
        (Some(_), None) | (None, Some(_)) => {
            log::warn!("[Main] Bot token and chat id must both be set, notifications disabled");
            None
        }
        (None, None) => None,
    };

    let defaults = PipelineConfig::default();
    let config = PipelineConfig {
        workdir,
        toolchain_root: match args.toolchain_root {
            Some(root) => absolute(&root)?,
            None => defaults.toolchain_root,
        },
        kernel_name: args.name,
        integration: args.integration,
        config_preset: args.config_preset,
        jobs: args.jobs.unwrap_or(defaults.jobs).max(1),
        build_user: args.build_user.unwrap_or(defaults.build_user),
        build_host: args.build_host.unwrap_or(defaults.build_host),
        ccache: args.ccache,
        anykernel: Remote::new(args.anykernel_url, args.anykernel_branch),
        telegram,
    };

    let request = BuildRequest {
        device: args.device,
        source_url: args.repo,
        branch: args.branch,
    };

    let collaborators = Collaborators::production(&config);
    let pipeline = BuildPipeline::new(config, devices, collaborators);
    let code = match pipeline.run(&request).await {
        Ok(zip) => {
            log::info!("[Main] Build succeeded: {}", zip.path.display());
            0
        }
        Err(e) => {
            log::error!("[Main] {}", e);
            e.exit_code()
        }
    };
    let _ = collector.wait_for_empty();
    Ok(code)
}

fn list_devices(devices: Option<&Path>) -> anyhow::Result<i32> {
    let table = loader::load_device_table(devices)?;
    for profile in table.profiles() {
        println!(
            "{:<12} {:<6} {:<28} {}",
            profile.codename, profile.arch, profile.defconfig, profile.display_name
        );
    }
    Ok(0)
}

fn check_config(file: &Path, preset: ConfigPreset, write: bool) -> anyhow::Result<i32> {
    let report = kconfig::check_config_file(file, preset, write)?;
    for finding in &report.findings {
        println!("{}", finding);
    }
    for fix in &report.fixes {
        println!("{}", fix);
    }
    println!("{}", report.summary());
    Ok(if report.is_clean() { 0 } else { 1 })
}

fn analyze_log(file: &Path) -> anyhow::Result<i32> {
    let marker_dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let (analysis, marker) = diagnostics::analyze_file(file, marker_dir)
        .with_context(|| format!("Cannot analyze {}", file.display()))?;
    print!("{}", analysis.render());
    if let Some(marker) = marker {
        println!("Error marker written to {}", marker.display());
    }
    Ok(if analysis.has_errors() { 1 } else { 0 })
}

async fn patch(
    integration: RootIntegration,
    source: &Path,
    device: Option<&str>,
    devices: Option<&Path>,
    mirror: Option<&str>,
) -> anyhow::Result<i32> {
    let (arch, defconfig) = match device {
        Some(device) => {
            let profile = loader::load_device_table(devices)?.resolve(device)?;
            (profile.arch, profile.defconfig)
        }
        None if integration == RootIntegration::ReKernel => {
            bail!("--device is required for {} to locate the defconfig", integration)
        }
        None => (Arch::Arm64, String::new()),
    };
    let sources = mirror.map(PatchSources::mirrored).unwrap_or_default();
    SourcePatcher::with_sources(sources)
        .apply_integration(integration, source, arch, &defconfig)
        .await?;
    println!("{} applied to {}", integration, source.display());
    Ok(0)
}

fn clean(workdir: &Path, toolchain_root: Option<PathBuf>, options: CleanOptions) -> anyhow::Result<i32> {
    let config = PipelineConfig {
        workdir: absolute(workdir)?,
        toolchain_root: toolchain_root.unwrap_or_else(config::default_toolchain_root),
        ..PipelineConfig::default()
    };
    let report = system::clean(&config, options)?;
    for path in &report.removed {
        println!("removed {}", path.display());
    }
    if options.ccache && !report.ccache_cleared {
        println!("ccache was not cleared");
    }
    Ok(0)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Tool subcommands print to stdout and keep their log out of the way
    let collector = match &cli.command {
        Command::Build(args) => init_logging(&absolute(&args.workdir)?.join("logs"), true)?,
        _ => init_logging(&std::env::temp_dir().join("kbuild-logs"), false)?,
    };

    match cli.command {
        Command::Build(args) => build(args, &collector).await,
        Command::Devices { devices } => list_devices(devices.as_deref()),
        Command::CheckConfig { file, preset, write } => check_config(&file, preset, write),
        Command::AnalyzeLog { file } => analyze_log(&file),
        Command::Patch {
            integration,
            source,
            device,
            devices,
            mirror,
        } => patch(integration, &source, device.as_deref(), devices.as_deref(), mirror.as_deref()).await,
        Command::Clean {
            workdir,
            toolchain_root,
            toolchains,
            ccache,
            all,
        } => {
            let options = if all {
                CleanOptions::all()
            } else {
                CleanOptions { toolchains, ccache }
            };
            clean(&workdir, toolchain_root, options)
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("kbuild: {:#}", e);
            1
        }
    };
    log::logger().flush();
    std::process::exit(code);
}
