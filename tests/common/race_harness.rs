//! Shared wiring for provisioning and race behavioural tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing the harness under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/race_harness.rs"]
//! mod race_harness;
//! ```

use std::ffi::OsString;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use exitnode::catalog::{CatalogRequest, resolve};
use exitnode::test_support::{CommandInvocation, FakeCloud, RoutedRunner, command_output};
use exitnode::{
    Deployer, InstanceLifecycle, InstanceRegistry, Provisioner, RetryPolicy, StageExecutor,
    TransportConfig,
};
use tempfile::TempDir;

/// Retry policy that keeps behavioural tests fast.
pub const FAST: RetryPolicy = RetryPolicy::new(2, Duration::from_millis(2));

/// Temporary directory holding the shipped artifacts.
pub struct Artifacts {
    dir: TempDir,
}

impl Artifacts {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        for name in ["docker-compose.yaml", ".env", "install.bash"] {
            fs::write(dir.path().join(name), "# test artifact\n")
                .expect("artifact should be written");
        }
        Self { dir }
    }

    pub fn config(&self) -> TransportConfig {
        let artifacts = ["docker-compose.yaml", ".env", "install.bash"]
            .map(|name| self.dir.path().join(name).to_string_lossy().into_owned())
            .join(",");
        TransportConfig {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            tailscale_bin: String::from("tailscale"),
            ssh_user: String::from("root"),
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_identity_file: None,
            artifacts,
            env_file: String::from(".env"),
            install_script: String::from("install.bash"),
        }
    }
}

/// Builds a provisioner over `cloud` recording droplets in `registry`.
pub async fn provisioner(
    cloud: &Arc<FakeCloud>,
    registry: &Arc<InstanceRegistry>,
    runner: RoutedRunner,
    artifacts: &Artifacts,
) -> Provisioner<FakeCloud, RoutedRunner> {
    let request = CatalogRequest {
        region: String::from("fra1"),
        image: String::from("ubuntu-22-04"),
        min_memory_mb: 1000,
    };
    let selection = resolve(cloud.as_ref(), &request)
        .await
        .expect("default catalog should resolve");
    let lifecycle = InstanceLifecycle::new(Arc::clone(cloud), Arc::clone(registry), "do-exit")
        .with_poll_interval(Duration::from_millis(1));
    let deployer = Deployer::new(artifacts.config(), runner).expect("config should validate");
    let stages = StageExecutor::new(deployer).with_policies(FAST, FAST);
    Provisioner::new(selection, lifecycle, stages)
}

fn last_octet(text: &str) -> Option<u8> {
    text.rsplit('.').next()?.parse().ok()
}

fn arg(invocation: &CommandInvocation, from_end: usize) -> String {
    invocation
        .args
        .iter()
        .rev()
        .nth(from_end)
        .map(|value: &OsString| value.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runner emulating healthy hosts where only droplets whose id is listed in
/// `direct` reach this machine without a relay.
///
/// `FakeCloud` gives droplet `n` the address `10.0.0.n`; its overlay address
/// is `100.64.0.n`.
pub fn overlay_runner(direct: &'static [u8]) -> RoutedRunner {
    RoutedRunner::new(move |invocation| {
        let output = match invocation.program.as_str() {
            "ssh" if arg(invocation, 0) == "tailscale ip --4" => {
                let host = arg(invocation, 1);
                let id = last_octet(&host).unwrap_or_default();
                command_output(Some(0), format!("100.64.0.{id}\n"), "")
            }
            "tailscale" => {
                let overlay = arg(invocation, 0);
                let id = last_octet(&overlay).unwrap_or_default();
                let via = if direct.contains(&id) {
                    format!("10.0.0.{id}:41641")
                } else {
                    String::from("DERP(fra)")
                };
                command_output(Some(0), format!("pong from exit ({overlay}) via {via} in 9ms\n"), "")
            }
            _ => command_output(Some(0), "", ""),
        };
        Ok(output)
    })
}
