//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("exitnode");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("race"))
        .stdout(contains("status"));
}

#[test]
fn race_help_lists_overrides() {
    let mut cmd = cargo_bin_cmd!("exitnode");
    cmd.args(["race", "--help"])
        .assert()
        .success()
        .stdout(contains("--max-droplets"))
        .stdout(contains("--max-attempts"));
}

#[test]
fn blank_token_fails_before_contacting_the_provider() {
    let mut cmd = cargo_bin_cmd!("exitnode");
    cmd.arg("race")
        .env("DO_TOKEN", " ")
        .env_remove("DO_MAX_DROPLETS")
        .env_remove("DO_MAX_ATTEMPTS")
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("DO_TOKEN"));
}

#[test]
fn zero_ceiling_flag_is_rejected() {
    let mut cmd = cargo_bin_cmd!("exitnode");
    cmd.args(["race", "--max-droplets", "0"])
        .env("DO_TOKEN", "dop_v1_example")
        .assert()
        .code(1)
        .stderr(contains("max_droplets must be at least 1"));
}
