//! Build log analysis.
//!
//! Splits compiler output into error blocks and matches each block against a
//! table of known failure signatures to suggest a fix.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Marker file created next to the log when errors were found.
pub const ERROR_MARKER: &str = "have_error";

const UNCOMMON_CATEGORY: &str = "Uncommon Error";
const UNCOMMON_SUGGESTION: &str =
    "Please follow the compilation output error results and try to resolve using search engines";

/// Known failure signatures, first match wins.
const SIGNATURES: &[(&str, &str, &str)] = &[
    (
        r"No such file or directory",
        "Missing Header or Source File",
        "Check if the file path is correct, or if required development libraries are missing (e.g., libssl-dev, zlib1g-dev).",
    ),
    (
        r"undefined reference to",
        "Link Error: Missing Library or Function",
        "Check if required libraries are missing (e.g., -lssl, -lcrypto), if library paths are in LDFLAGS/LDLIBS, or if function names are misspelled.",
    ),
    (
        r"unrecognized command line option",
        "Compiler Option Not Supported",
        "Your compiler version may be too old or too new. Check the options passed to the compiler in the Makefile for compatibility with your compiler version. Consider upgrading or downgrading the toolchain.",
    ),
    (
        r"misleading-indentation",
        "Code Indentation Does Not Match Logic",
        "Add braces '{}' after 'if', 'for', 'while' statements to clarify code block scope, or disable this warning (not recommended).",
    ),
    (
        r"type specifier missing",
        "C Language Type Declaration Missing",
        "Variable or function declarations may be missing types (e.g., 'int'). For kernel modules it could be missing headers, ordering issues, or API changes between kernel versions.",
    ),
    (
        r"make\[\d+\]:.*Error \d+",
        "Makefile Build Error",
        "A Makefile rule failed. Check the specific error messages above, usually a subcommand (e.g., 'gcc', 'ld', 'sh') returned a non-zero status code.",
    ),
    (
        r"target emulation unknown",
        "Linker Emulation Mode Error",
        "The linker does not recognize the emulation mode. Check if LLVM and GNU toolchains are mixed, or ensure LD points to LLVM's lld.",
    ),
    (
        r"cannot open.*\.gz",
        "File Missing (Configuration May Not Be Generated)",
        "Check if 'make defconfig' or the device config has been run. After 'make mrproper' the tree must be reconfigured.",
    ),
    (
        r"makes pointer from integer without a cast",
        "Type Conversion Error (Pointer and Integer)",
        "A function return type does not match the expected type (e.g., returning int where a pointer is expected). Fix the source or use a more compatible compiler.",
    ),
    (
        r"MODULE_IMPORT_NS\(VFS_internal_I_am_really_a_filesystem_and_am_NOT_a_driver\)",
        "Clang Version Anomaly",
        "Compiler and KernelSU compatibility issue. For the official release pick v0.9.5; for SukiSU-Ultra switch to a different KernelSU branch.",
    ),
    (
        r"not found \(required by clang\)",
        "Clang Version Anomaly",
        "The build host is too old. Use Ubuntu 22.04 or newer.",
    ),
    (
        r"multiple definition of 'yylloc'",
        "Kernel Defect",
        "Change YYLTYPE yylloc to extern YYLTYPE yylloc in scripts/dtc/dtc-lexer.lex.c_shipped",
    ),
    (
        r"assembler command failed with exit code 1",
        "Clang Compiler Error",
        "Switch to a different Clang compiler version",
    ),
    (
        r"incompatible pointer types passing 'atomic_long_t \*'",
        "Source Code Pointer Type Error",
        "Usually follows manual patching of cred.h; replace atomic_inc_not_zero with atomic_long_inc_not_zero.",
    ),
    (
        r"-Werror",
        "Warning Treated as Error",
        "Fix the underlying warning, or remove -Werror from KBUILD_CFLAGS to allow compilation with warnings.",
    ),
    (
        r"implicit declaration of function",
        "Implicit Function Declaration",
        "Include the proper header or add a prototype before use. This may also indicate an API change in newer kernel versions.",
    ),
    (
        r"array subscript.*is outside array bounds",
        "Array Index Out of Bounds",
        "Check array bounds and ensure indices stay within [0, size-1].",
    ),
    (
        r"division by zero",
        "Division by Zero",
        "Check that the divisor is not zero before dividing.",
    ),
    (
        r"null pointer dereference",
        "Null Pointer Dereference",
        "Add null checks before dereferencing pointers, or initialize them before use.",
    ),
    (
        r"incompatible implicit declaration",
        "Incompatible Implicit Declaration",
        "Include the correct header or add a proper function prototype.",
    ),
    (
        r"unused variable",
        "Unused Variable",
        "Use the variable, remove it, or mark it __maybe_unused.",
    ),
    (
        r"uninitialized variable",
        "Uninitialized Variable",
        "Initialize the variable at declaration or before first use.",
    ),
    (
        r"dereferencing pointer to incomplete type",
        "Dereferencing Incomplete Type",
        "Include the header containing the complete type definition.",
    ),
    (
        r"conflicting types",
        "Conflicting Types",
        "Make all declarations match the definition exactly.",
    ),
    (
        r"redefinition of ",
        "Symbol Redefinition",
        "Check for duplicate definitions or missing include guards.",
    ),
    (
        r"deprecated",
        "Deprecated API Usage",
        "Move to the replacement API, or suppress with -Wno-deprecated-declarations (not recommended long-term).",
    ),
    (
        r"overflow in conversion",
        "Integer Overflow in Conversion",
        "Check value ranges and use a wider type or add bounds checking.",
    ),
    (
        r"shift count overflow",
        "Bit Shift Overflow",
        "Keep shift counts below the bit width of the type.",
    ),
    (
        r"cast from pointer to integer of different size",
        "Pointer to Integer Size Mismatch",
        "Use uintptr_t or intptr_t to hold pointer values.",
    ),
    (
        r"variable length array",
        "Variable Length Array (VLA) Used",
        "Use kmalloc/vmalloc instead, or bound the size.",
    ),
    (
        r"taking address of temporary",
        "Address of Temporary Value",
        "Store the value in a variable first, then take its address.",
    ),
    (
        r"control reaches end of non-void function",
        "Missing Return Statement",
        "Return a value on every code path.",
    ),
    (
        r"comparison of integer expressions of different signedness",
        "Signed/Unsigned Comparison",
        "Cast one operand to match the other, or use consistent types.",
    ),
    (
        r"result of operation is still indeterminate",
        "Sequence Point Violation",
        "Split the expression into multiple statements.",
    ),
    (
        r"stack-protector",
        "Stack Protection Enabled But Failed",
        "Check for buffer overflows, or disable with -fno-stack-protector (not recommended).",
    ),
    (
        r"clock skew detected",
        "Clock Skew Detected",
        "Synchronize the system clock or touch the affected files.",
    ),
];

static COMPILED_SIGNATURES: Lazy<Vec<(Regex, &'static str, &'static str)>> = Lazy::new(|| {
    SIGNATURES
        .iter()
        .map(|(pattern, category, suggestion)| {
            let regex = Regex::new(&format!("(?i){}", pattern)).expect("Invalid error signature regex");
            (regex, *category, *suggestion)
        })
        .collect()
});

static BLOCK_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\serror:|\sfatal error:|undefined reference to").expect("Invalid error start regex")
});

/// What an error block most likely means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub category: &'static str,
    pub suggestion: &'static str,
}

/// Consecutive log lines belonging to one compiler error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBlock {
    pub lines: Vec<String>,
    pub diagnosis: Diagnosis,
}

/// All error blocks found in one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogAnalysis {
    pub blocks: Vec<ErrorBlock>,
}

impl LogAnalysis {
    pub fn has_errors(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn first_diagnosis(&self) -> Option<&Diagnosis> {
        self.blocks.first().map(|b| &b.diagnosis)
    }

    /// Human-readable report with per-block details and a closing summary.
    pub fn render(&self) -> String {
        let separator = "-".repeat(56);
        let banner = "=".repeat(56);
        let mut out = String::new();

        for (idx, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "Error #{}:", idx + 1);
            for line in &block.lines {
                let _ = writeln!(out, "  {}", line);
            }
            let _ = writeln!(out, "Error: {}", block.diagnosis.category);
            let _ = writeln!(out, "Suggestion: {}", block.diagnosis.suggestion);
            let _ = writeln!(out, "{}", separator);
        }

        if !self.has_errors() {
            let _ = writeln!(out, "No errors found.");
            let _ = writeln!(out, "{}", separator);
            return out;
        }

        let _ = writeln!(out, "Total found {} error(s).", self.blocks.len());
        let _ = writeln!(out, "{}", separator);
        let _ = writeln!(out, "\n{}\n{:^56}\n{}", banner, "Error Summary", banner);
        for (idx, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "\n  [{}] {}", idx + 1, block.diagnosis.category);
            let _ = writeln!(out, "      {}", block.diagnosis.suggestion);
        }
        let _ = writeln!(out, "\n{}\nTotal: {} error(s)\n{}", banner, self.blocks.len(), banner);
        out
    }
}

/// Classify one error block by the first matching signature.
pub fn classify(lines: &[String]) -> Diagnosis {
    let text = lines.join("\n");
    COMPILED_SIGNATURES
        .iter()
        .find(|(regex, _, _)| regex.is_match(&text))
        .map(|(_, category, suggestion)| Diagnosis {
            category: *category,
            suggestion: *suggestion,
        })
        .unwrap_or(Diagnosis {
            category: UNCOMMON_CATEGORY,
            suggestion: UNCOMMON_SUGGESTION,
        })
}

/// Split a log into error blocks and classify each.
///
/// A block starts on a compiler error line and continues until the first
/// blank line.
pub fn analyze(log: &str) -> LogAnalysis {
    let mut raw_blocks: Vec<Vec<String>> = Vec::new();
    let mut current: Option<Vec<String>> = None;

    for line in log.lines() {
        let line = line.trim_end_matches('\r');
        if BLOCK_START.is_match(line) {
            if let Some(done) = current.take() {
                raw_blocks.push(done);
            }
            current = Some(vec![line.to_string()]);
        } else if let Some(block) = current.as_mut() {
            if line.trim().is_empty() {
                raw_blocks.extend(current.take());
            } else {
                block.push(line.to_string());
            }
        }
    }
    raw_blocks.extend(current);

    LogAnalysis {
        blocks: raw_blocks
            .into_iter()
            .map(|lines| ErrorBlock {
                diagnosis: classify(&lines),
                lines,
            })
            .collect(),
    }
}

/// Analyze a log file, creating the error marker in `marker_dir` when errors exist.
pub fn analyze_file(path: &Path, marker_dir: &Path) -> io::Result<(LogAnalysis, Option<PathBuf>)> {
    let bytes = fs::read(path)?;
    let analysis = analyze(&String::from_utf8_lossy(&bytes));

    let marker = if analysis.has_errors() {
        let marker = marker_dir.join(ERROR_MARKER);
        fs::write(&marker, b"")?;
        Some(marker)
    } else {
        None
    };
    Ok((analysis, marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOG: &str = "  CC      kernel/fork.o
drivers/foo/bar.c:12:10: fatal error: linux/missing.h: No such file or directory
   12 | #include <linux/missing.h>
      |          ^~~~~~~~~~~~~~~~~
compilation terminated.

  CC      kernel/exit.o
ld.lld: error: undefined symbol: ksu_handle_execveat
>>> referenced by exec.c
make[1]: *** [Makefile:1182: vmlinux] Error 1
";

    #[test]
    fn test_blocks_split_on_blank_lines() {
        let analysis = analyze(LOG);
        assert_eq!(analysis.blocks.len(), 2);
        assert_eq!(analysis.blocks[0].lines.len(), 4);
        assert_eq!(analysis.blocks[1].lines.len(), 3);
    }

    #[test]
    fn test_first_matching_signature_wins() {
        let analysis = analyze(LOG);
        assert_eq!(analysis.blocks[0].diagnosis.category, "Missing Header or Source File");
        assert_eq!(analysis.blocks[1].diagnosis.category, "Makefile Build Error");
        assert_eq!(
            analysis.first_diagnosis().unwrap().category,
            "Missing Header or Source File"
        );
    }

    #[test]
    fn test_unknown_error_is_uncommon() {
        let diagnosis = classify(&["foo.c:1:1: error: something odd".to_string()]);
        assert_eq!(diagnosis.category, UNCOMMON_CATEGORY);
    }

    #[test]
    fn test_case_insensitive_start() {
        let analysis = analyze("x.c: ERROR: bad\n");
        assert_eq!(analysis.blocks.len(), 1);
    }

    #[test]
    fn test_clean_log() {
        let analysis = analyze("  CC init/main.o\n  LD vmlinux\n");
        assert!(!analysis.has_errors());
        assert!(analysis.render().contains("No errors found."));
    }

    #[test]
    fn test_analyze_file_creates_marker() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("build.log");
        fs::write(&log, LOG).unwrap();

        let (analysis, marker) = analyze_file(&log, temp.path()).unwrap();
        assert_eq!(analysis.blocks.len(), 2);
        assert!(marker.unwrap().exists());
        assert!(analysis.render().contains("Total: 2 error(s)"));
    }

    #[test]
    fn test_analyze_file_no_marker_when_clean() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("build.log");
        fs::write(&log, "all good\n").unwrap();

        let (_, marker) = analyze_file(&log, temp.path()).unwrap();
        assert!(marker.is_none());
        assert!(!temp.path().join(ERROR_MARKER).exists());
    }
}
