//! Properties of flashable archive names.

use kbuild_action::models::{short_sha, ArchiveName};
use proptest::prelude::*;

fn name_for(commit: &str) -> String {
    ArchiveName {
        name: "Kernel".to_string(),
        device: "mido".to_string(),
        date: "20240101-1200".to_string(),
        short_sha: short_sha(commit).to_string(),
    }
    .file_name()
}

proptest! {
    #[test]
    fn distinct_commits_give_distinct_names(a in "[0-9a-f]{40}", b in "[0-9a-f]{40}") {
        prop_assume!(a[..7] != b[..7]);
        prop_assert_ne!(name_for(&a), name_for(&b));
    }

    #[test]
    fn name_embeds_device_date_and_sha(commit in "[0-9a-f]{40}", device in "[a-z][a-z0-9]{2,11}") {
        let name = ArchiveName {
            name: "Kernel".to_string(),
            device: device.clone(),
            date: "20240101-1200".to_string(),
            short_sha: short_sha(&commit).to_string(),
        }
        .file_name();

        let expected_prefix = format!("Kernel-{}-", device);
        prop_assert!(name.starts_with(&expected_prefix));
        prop_assert!(name.contains("-20240101-1200-"));
        let expected_suffix = format!("-{}.zip", &commit[..7]);
        prop_assert!(name.ends_with(&expected_suffix));
    }
}
