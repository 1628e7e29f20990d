//! Container support patches for the cgroup and xt_qtaguid sources.

use super::PatchResult;
use std::fs;
use std::path::{Path, PathBuf};

const CGROUP_LEGACY: &str = "kernel/cgroup.c";
const CGROUP_MODERN: &str = "kernel/cgroup/cgroup.c";
const QTAGUID: &str = "net/netfilter/xt_qtaguid.c";

const CGROUP_MARKER: &str = "snprintf(name, CGROUP_FILE_NAME_MAX";
const QTAGUID_MARKER: &str = "struct rtnl_link_stats64 *stats";

/// Lines following the `if (iface_entry->active)` line that are dropped.
const QTAGUID_DROPPED_LINES: usize = 5;

/// Location of `cgroup_add_file`, which moved in newer kernels.
pub fn cgroup_file(tree: &Path) -> PathBuf {
    let legacy = tree.join(CGROUP_LEGACY);
    let defines_add_file = fs::read_to_string(&legacy)
        .map(|c| c.contains("int cgroup_add_file"))
        .unwrap_or(false);
    if defines_add_file {
        legacy
    } else {
        tree.join(CGROUP_MODERN)
    }
}

fn brace_delta(line: &str) -> i32 {
    line.matches('{').count() as i32 - line.matches('}').count() as i32
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Insert the prefixed-name link before the first `return 0;` of `cgroup_add_file`.
pub fn patch_cgroup(content: &str) -> Option<String> {
    let mut out: Vec<String> = Vec::new();
    let mut in_function = false;
    let mut depth = 0;
    let mut inserted = false;

    for line in content.split('\n') {
        let stripped = line.trim();
        if stripped.contains("int cgroup_add_file") {
            in_function = true;
        }
        if in_function && !inserted {
            depth += brace_delta(stripped);
            if stripped == "return 0;" && depth > 0 {
                let indent = indent_of(line);
                out.push(format!(
                    "{}if (cft->ss && (cgrp->root->flags & CGRP_ROOT_NOPREFIX) && !(cft->flags & CFTYPE_NO_PREFIX)) {{",
                    indent
                ));
                out.push(format!(
                    "{}    snprintf(name, CGROUP_FILE_NAME_MAX, \"%s.%s\", cft->ss->name, cft->name);",
                    indent
                ));
                out.push(format!("{}    kernfs_create_link(cgrp->kn, name, kn);", indent));
                out.push(format!("{}}}", indent));
                inserted = true;
            }
        }
        out.push(line.to_string());
    }

    inserted.then(|| out.join("\n"))
}

/// Stop `iface_stat_fmt_proc_show` from reading live device stats.
pub fn patch_qtaguid(content: &str) -> Option<String> {
    let mut out: Vec<String> = Vec::new();
    let mut in_function = false;
    let mut modified = false;
    let mut skip = 0;

    for line in content.split('\n') {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        if line.trim().contains("int iface_stat_fmt_proc_show") {
            in_function = true;
        }

        if in_function && !modified {
            if line.contains("if (iface_entry->active)") {
                out.push(format!("{}stats = &no_dev_stats;", indent_of(line)));
                skip = QTAGUID_DROPPED_LINES;
                modified = true;
                continue;
            }
            out.push(line.replace("struct rtnl_link_stats64 dev_stats, *stats", QTAGUID_MARKER));
            continue;
        }
        out.push(line.to_string());
    }

    modified.then(|| out.join("\n"))
}

/// Apply both patches, skipping missing or already patched files.
///
/// Returns the files that were rewritten.
pub fn apply(tree: &Path) -> PatchResult<Vec<PathBuf>> {
    let targets: [(PathBuf, &str, fn(&str) -> Option<String>); 2] = [
        (cgroup_file(tree), CGROUP_MARKER, patch_cgroup),
        (tree.join(QTAGUID), QTAGUID_MARKER, patch_qtaguid),
    ];

    let mut patched = Vec::new();
    for (path, marker, patch) in targets {
        if !path.exists() {
            log::warn!("[Patcher] [LXC] {} not found, skipping", path.display());
            continue;
        }
        let content = fs::read_to_string(&path)?;
        if content.contains(marker) {
            log::warn!("[Patcher] [LXC] {} already contains LXC patches, skipping", path.display());
            continue;
        }
        match patch(&content) {
            Some(updated) => {
                fs::write(&path, updated)?;
                log::info!("[Patcher] [LXC] Patched {}", path.display());
                patched.push(path);
            }
            None => log::warn!("[Patcher] [LXC] No insertion point in {}", path.display()),
        }
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CGROUP_SRC: &str = "static int cgroup_add_file(struct cgroup_subsys_state *css, struct cgroup *cgrp,\n\t\t\t   struct cftype *cft)\n{\n\tchar name[CGROUP_FILE_NAME_MAX];\n\tif (IS_ERR(kn))\n\t\treturn PTR_ERR(kn);\n\treturn 0;\n}\n";

    const QTAGUID_SRC: &str = "static int iface_stat_fmt_proc_show(struct seq_file *m, void *v)\n{\n\tstruct rtnl_link_stats64 dev_stats, *stats;\n\tstruct rtnl_link_stats64 no_dev_stats = {0};\n\n\tif (iface_entry->active) {\n\t\tstats = dev_get_stats(iface_entry->net_dev,\n\t\t\t\t      &dev_stats);\n\t} else {\n\t\tstats = &no_dev_stats;\n\t}\n\tseq_printf(m, \"%s\", iface_entry->ifname);\n\treturn 0;\n}\n";

    #[test]
    fn test_cgroup_block_inserted_before_return() {
        let patched = patch_cgroup(CGROUP_SRC).unwrap();
        let lines: Vec<&str> = patched.lines().collect();
        let ret = lines.iter().position(|l| l.trim() == "return 0;").unwrap();
        assert_eq!(lines[ret - 1], "\t}");
        assert!(lines[ret - 3].contains(CGROUP_MARKER));
        assert!(lines[ret - 4].starts_with("\tif (cft->ss"));
    }

    #[test]
    fn test_cgroup_without_function_untouched() {
        assert!(patch_cgroup("int main(void)\n{\n\treturn 0;\n}\n").is_none());
    }

    #[test]
    fn test_qtaguid_rewrite() {
        let patched = patch_qtaguid(QTAGUID_SRC).unwrap();
        assert!(patched.contains("\tstruct rtnl_link_stats64 *stats;"));
        assert!(!patched.contains("dev_get_stats"));
        assert!(patched.contains("\tstats = &no_dev_stats;\n\tseq_printf"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path();
        fs::create_dir_all(tree.join("kernel")).unwrap();
        fs::create_dir_all(tree.join("net/netfilter")).unwrap();
        fs::write(tree.join(CGROUP_LEGACY), CGROUP_SRC).unwrap();
        fs::write(tree.join(QTAGUID), QTAGUID_SRC).unwrap();

        assert_eq!(cgroup_file(tree), tree.join(CGROUP_LEGACY));
        assert_eq!(apply(tree).unwrap().len(), 2);
        assert!(apply(tree).unwrap().is_empty());
    }

    #[test]
    fn test_modern_cgroup_location() {
        let temp = TempDir::new().unwrap();
        assert_eq!(cgroup_file(temp.path()), temp.path().join(CGROUP_MODERN));
    }
}
