use kbuild_action::kernel::git::GitManager;
use kbuild_action::kernel::source::{GitSourceProvider, SourceProvider};
use kbuild_action::models::{Arch, BuildJob, DeviceProfile, ImageKind, ToolchainSpec};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Create a repository with one commit on `branch`, returning the commit id.
fn init_source_repo(path: &Path, branch: &str) -> String {
    let repo = git2::Repository::init(path).expect("Failed to init source repo");
    fs::write(path.join("Makefile"), "VERSION = 4\n").expect("Failed to write Makefile");

    let mut index = repo.index().expect("Failed to get index");
    index.add_path(Path::new("Makefile")).expect("Failed to add file");
    index.write().expect("Failed to write index");
    let tree_id = index.write_tree().expect("Failed to write tree");
    let tree = repo.find_tree(tree_id).expect("Failed to find tree");
    let sig = git2::Signature::now("Test User", "test@example.com").expect("Failed to create signature");
    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .expect("Failed to commit");

    let commit = repo.find_commit(commit_id).expect("Failed to find commit");
    repo.branch(branch, &commit, true).expect("Failed to create branch");
    commit_id.to_string()
}

fn test_profile() -> DeviceProfile {
    DeviceProfile {
        codename: "mido".to_string(),
        display_name: "Redmi Note 4".to_string(),
        defconfig: "mido_defconfig".to_string(),
        arch: Arch::Arm64,
        toolchain: ToolchainSpec {
            clang: None,
            gcc64: None,
            gcc32: None,
            cross_compile: "aarch64-linux-android-".to_string(),
            cross_compile_arm32: None,
            clang_triple: None,
        },
        expected_image: ImageKind::GzDtb,
        ship_dtbo: false,
        ship_dtb: false,
    }
}

#[test]
fn test_clone_branch_and_head_commit() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let source_path = temp_dir.path().join("source");
    let clone_path = temp_dir.path().join("clone");
    let expected = init_source_repo(&source_path, "lineage-18.1");

    let url = source_path.to_str().unwrap();
    let manager = GitManager::clone_branch(url, "lineage-18.1", &clone_path).expect("Failed to clone repository");

    assert!(clone_path.join(".git").exists());
    assert!(clone_path.join("Makefile").exists());
    assert_eq!(manager.get_head_commit().unwrap(), expected);
    assert_eq!(manager.repo_path(), clone_path);
}

#[test]
fn test_clone_replaces_stale_checkout() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let source_path = temp_dir.path().join("source");
    let clone_path = temp_dir.path().join("clone");
    init_source_repo(&source_path, "main-dev");

    fs::create_dir_all(&clone_path).unwrap();
    fs::write(clone_path.join("leftover.o"), "stale").unwrap();

    GitManager::clone_branch(source_path.to_str().unwrap(), "main-dev", &clone_path).unwrap();
    assert!(!clone_path.join("leftover.o").exists());
}

#[test]
fn test_clone_missing_branch_fails() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let source_path = temp_dir.path().join("source");
    init_source_repo(&source_path, "main-dev");

    let result = GitManager::clone_branch(
        source_path.to_str().unwrap(),
        "no-such-branch",
        temp_dir.path().join("clone"),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_source_provider_reports_commit() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let source_path = temp_dir.path().join("source");
    let expected = init_source_repo(&source_path, "android-4.9");

    let dest = temp_dir.path().join("work/kernel");
    let job = BuildJob::new(
        &test_profile(),
        source_path.to_str().unwrap(),
        "android-4.9",
        dest.join("out"),
    );

    let tree = GitSourceProvider.fetch_kernel(&job, &dest).await.unwrap();
    assert_eq!(tree.commit, expected);
    assert_eq!(tree.short_sha(), &expected[..7]);
    assert_eq!(tree.path, dest);
}

#[tokio::test]
async fn test_source_provider_maps_failure_to_acquisition() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dest = temp_dir.path().join("kernel");
    let missing = temp_dir.path().join("does-not-exist");
    let job = BuildJob::new(&test_profile(), missing.to_str().unwrap(), "main", dest.join("out"));

    let err = GitSourceProvider.fetch_kernel(&job, &dest).await.unwrap_err();
    assert!(matches!(err, kbuild_action::BuildError::AcquisitionFailed(_)));
}
