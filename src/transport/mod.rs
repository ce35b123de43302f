//! Remote setup and direct-connectivity checks over the system `scp`, `ssh`,
//! and `tailscale` clients.
//!
//! Every operation blocks for the duration of the underlying command. Async
//! callers run them on the blocking pool.

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use shell_escape::unix::escape;
use tracing::{debug, info};

mod config;
mod error;
mod probe;
mod types;
mod util;

pub use camino::Utf8PathBuf;
pub use config::{DEFAULT_ARTIFACTS, TransportConfig, TransportConfigLoadError};
pub use error::TransportError;
pub use probe::{direct_endpoint, overlay_ipv4};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use util::{expand_tilde, split_artifacts};

/// Ships artifacts, runs the installer, and probes the overlay for one host
/// at a time.
#[derive(Clone, Debug)]
pub struct Deployer<R: CommandRunner> {
    config: TransportConfig,
    runner: R,
}

impl Deployer<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: TransportConfig) -> Result<Self, TransportError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> Deployer<R> {
    /// Creates a deployer using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] when configuration
    /// validation fails.
    pub fn new(config: TransportConfig, runner: R) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Confirms every configured artifact exists locally and returns their
    /// paths.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingArtifact`] for the first absent file.
    pub fn check_artifacts(&self) -> Result<Vec<Utf8PathBuf>, TransportError> {
        let artifacts = self.config.artifact_paths();
        if let Some(missing) = artifacts.iter().find(|path| !path.is_file()) {
            return Err(TransportError::MissingArtifact {
                path: missing.clone(),
            });
        }
        Ok(artifacts)
    }

    /// Copies the configured artifacts into the remote user's home
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingArtifact`] before contacting the host
    /// when a local file is absent, or [`TransportError::CommandFailure`]
    /// when `scp` exits non-zero.
    pub fn ship(&self, host: IpAddr) -> Result<(), TransportError> {
        let args = self.build_scp_args(host)?;
        info!(%host, "shipping files");
        self.run_checked(&self.config.scp_bin, &args)?;
        Ok(())
    }

    /// Runs the install script remotely with the shipped environment file
    /// exported.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] when the remote command
    /// exits non-zero.
    pub fn install(&self, host: IpAddr) -> Result<(), TransportError> {
        let command = self.install_command();
        info!(%host, "deploying");
        self.run_ssh(host, &command)?;
        Ok(())
    }

    /// Ships the artifacts and runs the installer.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Deployer::ship`] or
    /// [`Deployer::install`].
    pub fn setup(&self, host: IpAddr) -> Result<(), TransportError> {
        self.ship(host)?;
        self.install(host)
    }

    /// Asks the host for its overlay IPv4 address.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] when the query fails and
    /// [`TransportError::OverlayAddress`] when the output holds no address.
    pub fn overlay_address(&self, host: IpAddr) -> Result<Ipv4Addr, TransportError> {
        let output = self.run_ssh(host, "tailscale ip --4")?;
        overlay_ipv4(&output.stdout).ok_or_else(|| TransportError::OverlayAddress {
            host,
            output: output.stdout.trim().to_owned(),
        })
    }

    /// Pings `overlay` from this machine and returns the direct endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailure`] when the ping exits
    /// non-zero and [`TransportError::NoDirectPath`] when the reply came
    /// through a relay.
    pub fn probe_direct(&self, overlay: Ipv4Addr) -> Result<SocketAddr, TransportError> {
        let args = [OsString::from("ping"), OsString::from(overlay.to_string())];
        let output = self.run_checked(&self.config.tailscale_bin, &args)?;
        debug!(%overlay, output = %output.stdout.trim(), "overlay ping finished");
        direct_endpoint(&output.stdout).ok_or_else(|| TransportError::NoDirectPath {
            overlay,
            output: output.stdout.trim().to_owned(),
        })
    }

    /// Confirms a direct overlay path to `host`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Deployer::overlay_address`] or
    /// [`Deployer::probe_direct`].
    pub fn verify_direct(&self, host: IpAddr) -> Result<SocketAddr, TransportError> {
        let overlay = self.overlay_address(host)?;
        info!(%host, %overlay, "checking exit node");
        let endpoint = self.probe_direct(overlay)?;
        info!(%host, %endpoint, "direct connection established");
        Ok(endpoint)
    }

    fn run_checked(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        self.runner.run(program, args)?.into_success(program)
    }

    fn run_ssh(&self, host: IpAddr, command: &str) -> Result<CommandOutput, TransportError> {
        let args = self.build_ssh_args(host, command);
        self.run_checked(&self.config.ssh_bin, &args)
    }

    fn install_command(&self) -> String {
        let env_file = escape(self.config.env_file.trim().into());
        let script = escape(self.config.install_script.trim().into());
        format!("env $(cat {env_file} | xargs) bash {script}")
    }

    fn build_scp_args(&self, host: IpAddr) -> Result<Vec<OsString>, TransportError> {
        let artifacts = self.check_artifacts()?;
        let mut args = self.common_ssh_options();
        args.extend(artifacts.iter().map(|path| OsString::from(path.as_str())));
        args.push(OsString::from(format!("{}:~", self.remote_target(host))));
        Ok(args)
    }

    fn build_ssh_args(&self, host: IpAddr, remote_command: &str) -> Vec<OsString> {
        let mut args = self.common_ssh_options();
        args.push(OsString::from(self.remote_target(host)));
        args.push(OsString::from(remote_command));
        args
    }

    fn remote_target(&self, host: IpAddr) -> String {
        format!("{}@{host}", self.config.ssh_user)
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }
}

#[cfg(test)]
mod tests;
