//! Path helper tests.

use super::super::*;
use crate::test_support::EnvGuard;

#[tokio::test]
async fn tilde_expands_against_home() {
    let _guard = EnvGuard::set_vars(&[("HOME", Some("/home/exit"))]).await;

    assert_eq!(expand_tilde("~/.ssh/id_ed25519"), "/home/exit/.ssh/id_ed25519");
    assert_eq!(expand_tilde("~user/key"), "~user/key");
}

#[tokio::test]
async fn tilde_is_kept_without_home() {
    let _guard = EnvGuard::set_vars(&[("HOME", None)]).await;

    assert_eq!(expand_tilde("~/key"), "~/key");
}

#[test]
fn artifact_lists_skip_blank_entries() {
    let paths = split_artifacts(" a.yaml ,, .env ,install.bash,");
    let rendered: Vec<&str> = paths.iter().map(AsRef::<str>::as_ref).collect();
    assert_eq!(rendered, ["a.yaml", ".env", "install.bash"]);
}
