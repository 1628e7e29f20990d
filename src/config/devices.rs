//! Device lookup table
//!
//! Maps device codenames to everything that differs between device builds:
//! defconfig, architecture, pinned toolchains and the image the build must
//! produce. Control flow is shared; only this data varies per device.

use crate::error::UnsupportedDevice;
use crate::models::{Arch, DeviceProfile, ImageKind, Remote, ToolchainSpec};
use once_cell::sync::Lazy;

const PROTON_CLANG: &str = "https://github.com/kdrag0n/proton-clang";
const LINEAGE_GCC64: &str =
    "https://github.com/LineageOS/android_prebuilts_gcc_linux-x86_aarch64_aarch64-linux-android-4.9";
const LINEAGE_GCC32: &str =
    "https://github.com/LineageOS/android_prebuilts_gcc_linux-x86_arm_arm-linux-androideabi-4.9";
const LINEAGE_GCC_BRANCH: &str = "lineage-19.1";

/// Clang with bundled GNU binutils, used by the msm8953/msm8940 family.
fn proton_toolchain() -> ToolchainSpec {
    ToolchainSpec {
        clang: Some(Remote::new(PROTON_CLANG, "master")),
        gcc64: None,
        gcc32: None,
        cross_compile: "aarch64-linux-gnu-".to_string(),
        cross_compile_arm32: Some("arm-linux-gnueabi-".to_string()),
        clang_triple: Some("aarch64-linux-gnu-".to_string()),
    }
}

/// Clang paired with the Android GCC 4.9 prebuilts.
fn clang_android_gcc_toolchain() -> ToolchainSpec {
    ToolchainSpec {
        clang: Some(Remote::new(PROTON_CLANG, "master")),
        gcc64: Some(Remote::new(LINEAGE_GCC64, LINEAGE_GCC_BRANCH)),
        gcc32: Some(Remote::new(LINEAGE_GCC32, LINEAGE_GCC_BRANCH)),
        cross_compile: "aarch64-linux-android-".to_string(),
        cross_compile_arm32: Some("arm-linux-androideabi-".to_string()),
        clang_triple: Some("aarch64-linux-gnu-".to_string()),
    }
}

/// GCC-only 32-bit toolchain.
fn arm_gcc_toolchain() -> ToolchainSpec {
    ToolchainSpec {
        clang: None,
        gcc64: None,
        gcc32: Some(Remote::new(LINEAGE_GCC32, LINEAGE_GCC_BRANCH)),
        cross_compile: "arm-linux-androideabi-".to_string(),
        cross_compile_arm32: None,
        clang_triple: None,
    }
}

fn profile(
    codename: &str,
    display_name: &str,
    defconfig: &str,
    arch: Arch,
    toolchain: ToolchainSpec,
    expected_image: ImageKind,
    ship_dtbo: bool,
) -> DeviceProfile {
    DeviceProfile {
        codename: codename.to_string(),
        display_name: display_name.to_string(),
        defconfig: defconfig.to_string(),
        arch,
        toolchain,
        expected_image,
        ship_dtbo,
        ship_dtb: false,
    }
}

static BUILTIN_PROFILES: Lazy<Vec<DeviceProfile>> = Lazy::new(|| {
    vec![
        profile("mido", "Redmi Note 4", "mido_defconfig", Arch::Arm64, proton_toolchain(), ImageKind::GzDtb, false),
        profile("santoni", "Redmi 4X", "santoni_defconfig", Arch::Arm64, proton_toolchain(), ImageKind::GzDtb, false),
        profile("tissot", "Mi A1", "tissot_defconfig", Arch::Arm64, proton_toolchain(), ImageKind::GzDtb, false),
        profile("j6primelte", "Galaxy J6+", "j6primelte_defconfig", Arch::Arm, arm_gcc_toolchain(), ImageKind::GzDtb, false),
        profile("sweet", "Redmi Note 10 Pro", "vendor/sweet_defconfig", Arch::Arm64, clang_android_gcc_toolchain(), ImageKind::Gz, true),
        profile("topaz", "Redmi Note 12", "vendor/topaz_defconfig", Arch::Arm64, clang_android_gcc_toolchain(), ImageKind::Gz, true),
    ]
});

/// Device lookup table.
#[derive(Debug, Clone)]
pub struct DeviceTable {
    profiles: Vec<DeviceProfile>,
}

impl DeviceTable {
    /// Table of all devices supported out of the box.
    pub fn builtin() -> Self {
        DeviceTable {
            profiles: BUILTIN_PROFILES.clone(),
        }
    }

    pub fn from_profiles(profiles: Vec<DeviceProfile>) -> Self {
        DeviceTable { profiles }
    }

    /// Add or replace rows, keyed by codename.
    pub fn merge(&mut self, overrides: Vec<DeviceProfile>) {
        for row in overrides {
            match self
                .profiles
                .iter_mut()
                .find(|p| p.codename.eq_ignore_ascii_case(&row.codename))
            {
                Some(existing) => {
                    log::debug!("[Devices] Overriding profile for {}", row.codename);
                    *existing = row;
                }
                None => {
                    log::debug!("[Devices] Adding profile for {}", row.codename);
                    self.profiles.push(row);
                }
            }
        }
    }

    /// Map a selector to exactly one profile, or reject it.
    pub fn resolve(&self, selector: &str) -> Result<DeviceProfile, UnsupportedDevice> {
        let wanted = selector.trim();
        self.profiles
            .iter()
            .find(|p| p.codename.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| UnsupportedDevice(wanted.to_string()))
    }

    pub fn codenames(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.codename.as_str()).collect()
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_selector_resolves_once() {
        let table = DeviceTable::builtin();
        for codename in table.codenames() {
            let matches = table
                .profiles()
                .iter()
                .filter(|p| p.codename.eq_ignore_ascii_case(codename))
                .count();
            assert_eq!(matches, 1, "{} must map to exactly one profile", codename);
            assert_eq!(table.resolve(codename).unwrap().codename, codename);
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let table = DeviceTable::builtin();
        let profile = table.resolve("  MIDO ").unwrap();
        assert_eq!(profile.defconfig, "mido_defconfig");
        assert_eq!(profile.arch, Arch::Arm64);
        assert_eq!(profile.expected_image, ImageKind::GzDtb);
    }

    #[test]
    fn test_unknown_selector_is_rejected() {
        let table = DeviceTable::builtin();
        let err = table.resolve("unknown-device").unwrap_err();
        assert_eq!(err, UnsupportedDevice("unknown-device".to_string()));
        assert!(table.resolve("").is_err());
    }

    #[test]
    fn test_merge_replaces_and_adds() {
        let mut table = DeviceTable::builtin();
        let mut mido = table.resolve("mido").unwrap();
        mido.defconfig = "custom_mido_defconfig".to_string();
        let mut lavender = mido.clone();
        lavender.codename = "lavender".to_string();

        table.merge(vec![mido, lavender]);

        assert_eq!(table.resolve("mido").unwrap().defconfig, "custom_mido_defconfig");
        assert!(table.resolve("lavender").is_ok());
        assert_eq!(table.codenames().len(), DeviceTable::builtin().codenames().len() + 1);
    }

    #[test]
    fn test_arm_device_uses_single_prefix() {
        let profile = DeviceTable::builtin().resolve("j6primelte").unwrap();
        assert_eq!(profile.arch, Arch::Arm);
        assert!(profile.toolchain.clang.is_none());
        assert!(profile.toolchain.cross_compile_arm32.is_none());
    }
}
