//! Device table override loader.
//!
//! A JSON file holding an array of device profiles can extend or replace rows
//! of the built-in table without touching control flow.

use crate::config::devices::DeviceTable;
use crate::error::ConfigError;
use crate::models::DeviceProfile;
use std::fs;
use std::path::Path;

/// Load device profiles from a JSON file.
pub fn load_profiles_from_file(path: &Path) -> Result<Vec<DeviceProfile>, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Device table not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let profiles: Vec<DeviceProfile> = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;

    for profile in &profiles {
        if profile.codename.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Device profile with empty codename".to_string(),
            ));
        }
        if profile.defconfig.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Device '{}' has no defconfig",
                profile.codename
            )));
        }
    }

    Ok(profiles)
}

/// Save device profiles as pretty JSON.
pub fn save_profiles_to_file(profiles: &[DeviceProfile], path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(profiles).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Built-in table, extended by an optional override file.
pub fn load_device_table(overrides: Option<&Path>) -> Result<DeviceTable, ConfigError> {
    let mut table = DeviceTable::builtin();
    if let Some(path) = overrides {
        let profiles = load_profiles_from_file(path)?;
        log::info!(
            "[Config] Loaded {} device profile(s) from {}",
            profiles.len(),
            path.display()
        );
        table.merge(profiles);
    }
    Ok(table)
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_profiles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        let table = DeviceTable::builtin();

        save_profiles_to_file(table.profiles(), &path).unwrap();
        let loaded = load_profiles_from_file(&path).unwrap();

        assert_eq!(loaded, table.profiles());
    }

    #[test]
    fn test_missing_file_is_file_not_found() {
        let result = load_profiles_from_file(Path::new("/nonexistent/devices.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_wrong_extension_rejected() {
        let result = validate_config_path(Path::new("devices.toml"));
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_override_adds_device() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("extra.json");
        std::fs::write(
            &path,
            r#"[{
                "codename": "lavender",
                "display_name": "Redmi Note 7",
                "defconfig": "lavender_defconfig",
                "arch": "arm64",
                "toolchain": { "cross_compile": "aarch64-linux-gnu-" },
                "expected_image": "gz-dtb"
            }]"#,
        )
        .unwrap();

        let table = load_device_table(Some(&path)).unwrap();
        let profile = table.resolve("lavender").unwrap();
        assert_eq!(profile.defconfig, "lavender_defconfig");
        assert!(!profile.ship_dtbo);
        assert!(table.resolve("mido").is_ok());
    }

    #[test]
    fn test_empty_defconfig_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"[{
                "codename": "bad",
                "display_name": "Bad",
                "defconfig": " ",
                "arch": "arm",
                "toolchain": { "cross_compile": "arm-linux-androideabi-" },
                "expected_image": "raw"
            }]"#,
        )
        .unwrap();

        assert!(matches!(
            load_profiles_from_file(&path),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
