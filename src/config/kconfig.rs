//! Kernel config preset checker
//!
//! Checks a defconfig against a preset of options that must be enabled,
//! disabled or set to an exact value, and optionally rewrites the file so it
//! complies. Presets cover LXC/Docker containers and Kali NetHunter.

use crate::error::ConfigError;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

const LXC_ON: &str = include_str!("presets/lxc_on.txt");
const LXC_OFF: &str = include_str!("presets/lxc_off.txt");
const NETHUNTER_ON: &str = include_str!("presets/nethunter_on.txt");
const NETHUNTER_OFF: &str = include_str!("presets/nethunter_off.txt");

/// Named option preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    Lxc,
    NetHunter,
}

impl FromStr for ConfigPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lxc" | "docker" => Ok(ConfigPreset::Lxc),
            "nethunter" | "kali" => Ok(ConfigPreset::NetHunter),
            other => Err(format!("unknown config preset '{}', expected lxc or nethunter", other)),
        }
    }
}

impl fmt::Display for ConfigPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigPreset::Lxc => f.write_str("lxc"),
            ConfigPreset::NetHunter => f.write_str("nethunter"),
        }
    }
}

impl ConfigPreset {
    pub fn options(&self) -> PresetOptions {
        match self {
            ConfigPreset::Lxc => PresetOptions::parse(LXC_ON, LXC_OFF, ""),
            ConfigPreset::NetHunter => PresetOptions::parse(NETHUNTER_ON, NETHUNTER_OFF, ""),
        }
    }
}

/// Options a preset requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetOptions {
    pub on: Vec<String>,
    pub off: Vec<String>,
    /// `CONFIG_X=value` entries
    pub eq: Vec<String>,
}

impl PresetOptions {
    pub fn parse(on: &str, off: &str, eq: &str) -> Self {
        fn items(text: &str) -> Vec<String> {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        }
        PresetOptions {
            on: items(on),
            off: items(off),
            eq: items(eq),
        }
    }
}

/// A problem left in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Duplicate(String),
    Missing(String),
    NotEnabled(String),
    NotDisabled(String),
    WrongValue { key: String, current: String, wanted: String },
    EqMissing(String),
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Duplicate(c) => write!(f, "{} appears more than once in the config file, fix this", c),
            Finding::Missing(c) => write!(f, "{} is neither enabled nor disabled in the config file", c),
            Finding::NotEnabled(c) => write!(f, "{} is not set, set it", c),
            Finding::NotDisabled(c) => write!(f, "{} is set, unset it", c),
            Finding::WrongValue { key, current, wanted } => {
                write!(f, "{} is set, but to {} not {}", key, current, wanted)
            }
            Finding::EqMissing(c) => write!(f, "{} is not set", c),
        }
    }
}

/// A change made in write mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    Created(String),
    Enabled(String),
    Disabled(String),
    Rewritten(String),
    Appended(String),
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fix::Created(c) => write!(f, "Creating {}", c),
            Fix::Enabled(c) => write!(f, "Setting {}", c),
            Fix::Disabled(c) => write!(f, "Unsetting {}", c),
            Fix::Rewritten(c) => write!(f, "Setting {} correctly", c),
            Fix::Appended(c) => write!(f, "Setting {}", c),
        }
    }
}

/// Outcome of checking one config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub findings: Vec<Finding>,
    pub fixes: Vec<Fix>,
    /// Options already in the wanted state
    pub satisfied: usize,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut out = if self.findings.is_empty() {
            "Config file checked, found no errors.".to_string()
        } else {
            format!(
                "Config file checked, found {} errors that I did not fix.",
                self.findings.len()
            )
        };
        if !self.fixes.is_empty() {
            out.push_str(&format!(" Made {} fixes.", self.fixes.len()));
        }
        out
    }
}

fn line_regex(pattern: &str) -> Regex {
    // Patterns are built from escaped option names only
    Regex::new(&format!("(?m){}", pattern)).expect("Invalid option line regex")
}

fn count_occurrences(content: &str, config: &str) -> usize {
    line_regex(&format!(r"\b{}\b", regex::escape(config)))
        .find_iter(content)
        .count()
}

fn is_enabled(content: &str, config: &str) -> bool {
    line_regex(&format!(r"^{}=(y|m)$", regex::escape(config))).is_match(content)
}

fn current_value(content: &str, config: &str) -> Option<String> {
    line_regex(&format!(r"^{}=(.+)$", regex::escape(config)))
        .captures(content)
        .map(|caps| caps[1].to_string())
}

fn append_line(content: &mut String, line: &str) {
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line);
    content.push('\n');
}

/// Check `content` against `options`; in write mode fix what can be fixed.
///
/// Returns the (possibly rewritten) content and the report.
pub fn check_config(content: &str, options: &PresetOptions, write: bool) -> (String, CheckReport) {
    let mut content = content.to_string();
    let mut report = CheckReport::default();

    for config in options.on.iter().chain(options.off.iter()) {
        let count = count_occurrences(&content, config);
        if count > 1 {
            report.findings.push(Finding::Duplicate(config.clone()));
        }
        if count == 0 {
            if write {
                append_line(&mut content, &format!("# {} is not set", config));
                report.fixes.push(Fix::Created(config.clone()));
            } else {
                report.findings.push(Finding::Missing(config.clone()));
            }
        }
    }

    for config in &options.on {
        if is_enabled(&content, config) {
            report.satisfied += 1;
        } else if write {
            let escaped = regex::escape(config);
            let pattern = line_regex(&format!(r"^(?:# {} is not set|{}=.*)$", escaped, escaped));
            content = pattern
                .replace_all(&content, format!("{}=y", config).as_str())
                .into_owned();
            report.fixes.push(Fix::Enabled(config.clone()));
        } else {
            report.findings.push(Finding::NotEnabled(config.clone()));
        }
    }

    for entry in &options.eq {
        let Some((lhs, rhs)) = entry.split_once('=') else {
            continue;
        };
        let exact = line_regex(&format!("^{}$", regex::escape(entry)));
        if exact.is_match(&content) {
            report.satisfied += 1;
            continue;
        }

        match current_value(&content, lhs) {
            Some(current) => {
                if write {
                    let pattern = line_regex(&format!(r"^{}=.*$", regex::escape(lhs)));
                    let replacement = format!("# {} was {}\n{}", lhs, current, entry);
                    content = pattern
                        .replace_all(&content, regex::NoExpand(&replacement))
                        .into_owned();
                    report.fixes.push(Fix::Rewritten(entry.clone()));
                } else {
                    report.findings.push(Finding::WrongValue {
                        key: lhs.to_string(),
                        current,
                        wanted: rhs.to_string(),
                    });
                }
            }
            None => {
                if write {
                    append_line(&mut content, entry);
                    report.fixes.push(Fix::Appended(entry.clone()));
                } else {
                    report.findings.push(Finding::EqMissing(entry.clone()));
                }
            }
        }
    }

    for config in &options.off {
        if is_enabled(&content, config) {
            if write {
                let pattern = line_regex(&format!(r"^{}=.*$", regex::escape(config)));
                content = pattern
                    .replace_all(&content, format!("# {} is not set", config).as_str())
                    .into_owned();
                report.fixes.push(Fix::Disabled(config.clone()));
            } else {
                report.findings.push(Finding::NotDisabled(config.clone()));
            }
        } else {
            report.satisfied += 1;
        }
    }

    (content, report)
}

/// Check a config file inside the current directory against a preset.
pub fn check_config_file(path: &Path, preset: ConfigPreset, write: bool) -> Result<CheckReport, ConfigError> {
    let cwd = std::env::current_dir()?;
    check_config_file_within(path, &cwd, preset, write)
}

/// Check a config file that must live below `root`.
pub fn check_config_file_within(
    path: &Path,
    root: &Path,
    preset: ConfigPreset,
    write: bool,
) -> Result<CheckReport, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    let resolved = path.canonicalize()?;
    let root = root.canonicalize()?;
    if !resolved.starts_with(&root) {
        return Err(ConfigError::ValidationFailed(format!(
            "Config file must be within {}",
            root.display()
        )));
    }

    let original = fs::read_to_string(&resolved)?;
    let (updated, report) = check_config(&original, &preset.options(), write);

    if write && updated != original {
        fs::write(&resolved, updated)?;
        log::info!(
            "[Kconfig] Applied {} fix(es) for preset {} to {}",
            report.fixes.len(),
            preset,
            resolved.display()
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> PresetOptions {
        PresetOptions::parse(
            "CONFIG_NAMESPACES\nCONFIG_USER_NS\n",
            "CONFIG_ANDROID_PARANOID_NETWORK\n",
            "CONFIG_HZ=300\n",
        )
    }

    #[test]
    fn test_presets_load() {
        let lxc = ConfigPreset::Lxc.options();
        assert!(lxc.on.contains(&"CONFIG_NAMESPACES".to_string()));
        assert_eq!(lxc.off, vec!["CONFIG_ANDROID_PARANOID_NETWORK", "CONFIG_SCHED_WALT"]);
        let kali = ConfigPreset::NetHunter.options();
        assert!(kali.on.contains(&"CONFIG_MODULES".to_string()));
        assert!(!kali.off.is_empty());
    }

    #[test]
    fn test_check_only_reports() {
        let content = "CONFIG_NAMESPACES=y\n# CONFIG_USER_NS is not set\nCONFIG_ANDROID_PARANOID_NETWORK=y\nCONFIG_HZ=100\n";
        let (out, report) = check_config(content, &options(), false);

        assert_eq!(out, content);
        assert!(report.fixes.is_empty());
        assert!(report.findings.contains(&Finding::NotEnabled("CONFIG_USER_NS".to_string())));
        assert!(report
            .findings
            .contains(&Finding::NotDisabled("CONFIG_ANDROID_PARANOID_NETWORK".to_string())));
        assert!(report.findings.contains(&Finding::WrongValue {
            key: "CONFIG_HZ".to_string(),
            current: "100".to_string(),
            wanted: "300".to_string(),
        }));
    }

    #[test]
    fn test_write_mode_fixes_everything() {
        let content = "CONFIG_NAMESPACES=y\nCONFIG_ANDROID_PARANOID_NETWORK=y\nCONFIG_HZ=100";
        let (out, report) = check_config(content, &options(), true);

        assert!(report.is_clean());
        assert!(out.contains("CONFIG_USER_NS=y\n"));
        assert!(out.contains("# CONFIG_ANDROID_PARANOID_NETWORK is not set"));
        assert!(out.contains("# CONFIG_HZ was 100\nCONFIG_HZ=300"));

        let (_, second) = check_config(&out, &options(), false);
        assert!(second.is_clean(), "{:?}", second.findings);
    }

    #[test]
    fn test_duplicate_detected() {
        let content = "CONFIG_NAMESPACES=y\nCONFIG_NAMESPACES=y\nCONFIG_USER_NS=y\n# CONFIG_ANDROID_PARANOID_NETWORK is not set\nCONFIG_HZ=300\n";
        let (_, report) = check_config(content, &options(), false);
        assert_eq!(report.findings, vec![Finding::Duplicate("CONFIG_NAMESPACES".to_string())]);
    }

    #[test]
    fn test_prefix_names_do_not_count() {
        assert_eq!(count_occurrences("CONFIG_USER_NS_EXTRA=y\n", "CONFIG_USER_NS"), 0);
    }

    #[test]
    fn test_file_outside_root_rejected() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let path = other.path().join("defconfig");
        fs::write(&path, "CONFIG_NAMESPACES=y\n").unwrap();

        let result = check_config_file_within(&path, root.path(), ConfigPreset::Lxc, false);
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_file_write_mode_persists() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("defconfig");
        fs::write(&path, "CONFIG_SCHED_WALT=y\n").unwrap();

        let report = check_config_file_within(&path, root.path(), ConfigPreset::Lxc, true).unwrap();
        assert!(report.is_clean());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# CONFIG_SCHED_WALT is not set"));
        assert!(written.contains("CONFIG_NAMESPACES=y"));
    }
}
