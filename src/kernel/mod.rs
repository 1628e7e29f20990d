//! Kernel Source Management Module
//!
//! Handles interactions with the kernel source tree:
//! - Git operations (cloning kernel, toolchain and template repositories)
//! - Toolchain acquisition and compiler identification
//! - Root and container integration patches
//! - Build log diagnosis

pub mod diagnostics;
pub mod git;
pub mod patcher;
pub mod source;
pub mod toolchain;
