//! Shared fixtures for transport tests.

use std::net::{IpAddr, Ipv4Addr};

use rstest::fixture;

use super::super::*;
use crate::test_helpers::ArtifactDir;
use crate::test_support::ScriptedRunner;

pub const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

#[fixture]
pub fn artifacts() -> ArtifactDir {
    ArtifactDir::new()
}

#[fixture]
pub fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

pub fn deployer(artifacts: &ArtifactDir, runner: &ScriptedRunner) -> Deployer<ScriptedRunner> {
    Deployer::new(artifacts.config(), runner.clone()).expect("config should validate")
}

pub fn args_of(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}
