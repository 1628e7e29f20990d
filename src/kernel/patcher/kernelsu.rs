//! KernelSU integration via Coccinelle.

use super::{download, run_spatch, PatchResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use tempfile::TempDir;

pub const COCCI_FILE: &str = "minimal.cocci";

static TARGET_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"file in "([^"]+)""#).expect("Invalid cocci target regex"));

/// Files named by `file in "..."` clauses, first occurrence order, no repeats.
pub fn cocci_targets(cocci: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for caps in TARGET_REGEX.captures_iter(cocci) {
        let target = &caps[1];
        if !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }
    targets
}

/// Download the semantic patch and apply it to every file it targets.
///
/// Returns how many targets `spatch` patched. A failing target is skipped.
pub async fn apply(client: &reqwest::Client, base: &str, tree: &Path) -> PatchResult<usize> {
    let scratch = TempDir::new()?;
    let url = format!("{}/{}", base.trim_end_matches('/'), COCCI_FILE);
    let cocci_path = download(client, &url, scratch.path()).await?;
    let cocci = tokio::fs::read_to_string(&cocci_path).await?;

    let targets = cocci_targets(&cocci);
    log::info!("[Patcher] [KernelSU] {} target file(s) in {}", targets.len(), COCCI_FILE);

    let mut applied = 0;
    for target in &targets {
        let args: Vec<OsString> = vec![
            "--very-quiet".into(),
            "--sp-file".into(),
            cocci_path.clone().into_os_string(),
            "--in-place".into(),
            "--linux-spacing".into(),
            target.into(),
        ];
        if run_spatch(tree, args).await {
            log::debug!("[Patcher] [KernelSU] Applied patch to {}", target);
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_deduplicated_in_order() {
        let cocci = r#"
@ rule1 @
identifier fn;
@@
// file in "fs/exec.c"
@ rule2 @ file in "fs/open.c" @@
@ rule3 @ file in "fs/exec.c" @@
@ rule4 @ file in "drivers/input/input.c" @@
"#;
        assert_eq!(
            cocci_targets(cocci),
            vec!["fs/exec.c", "fs/open.c", "drivers/input/input.c"]
        );
    }

    #[test]
    fn test_no_targets() {
        assert!(cocci_targets("@@\n- foo();\n@@").is_empty());
    }
}
