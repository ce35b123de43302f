//! Transport configuration structures and validation.
//!
//! [`TransportConfig`] holds the SSH, SCP, and Tailscale settings plus the
//! list of artifacts shipped to every droplet. Configuration is loaded via
//! `ortho-config` which merges defaults, configuration files, and
//! environment variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::TransportError;
use super::util::{remote_name, split_artifacts};

/// Files shipped to each droplet before installation.
pub const DEFAULT_ARTIFACTS: &str = "../exit-node/docker-compose.yaml,.env,install.bash";

/// Remote SSH, SCP, and overlay probe settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "EXITNODE_TRANSPORT",
    discovery(
        app_name = "exitnode",
        env_var = "EXITNODE_CONFIG_PATH",
        config_file_name = "exitnode.toml",
        dotfile_name = ".exitnode.toml",
        project_file_name = "exitnode.toml"
    )
)]
pub struct TransportConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the local `tailscale` executable used for the direct ping.
    #[ortho_config(default = "tailscale".to_owned())]
    pub tailscale_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; fresh droplets have unknown keys.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for throwaway hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key file. Supports tilde expansion. When unset
    /// SSH falls back to its default key locations.
    pub ssh_identity_file: Option<String>,
    /// Comma separated local files copied to the remote home directory.
    #[ortho_config(default = DEFAULT_ARTIFACTS.to_owned())]
    pub artifacts: String,
    /// Name of the shipped environment file sourced by the installer.
    #[ortho_config(default = ".env".to_owned())]
    pub env_file: String,
    /// Name of the shipped install script.
    #[ortho_config(default = "install.bash".to_owned())]
    pub install_script: String,
}

/// Errors raised when loading the transport configuration from layered
/// sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TransportConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("transport configuration parsing failed: {0}")]
    Parse(String),
}

impl TransportConfig {
    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`TransportConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, TransportConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("exitnode")])
            .map_err(|err| TransportConfigLoadError::Parse(err.to_string()))
    }

    /// Ensures every required value is present and that the environment
    /// file and install script are among the shipped artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), TransportError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.tailscale_bin, "tailscale_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_value(&self.env_file, "env_file")?;
        Self::require_value(&self.install_script, "install_script")?;

        let artifacts = self.artifact_paths();
        if artifacts.is_empty() {
            return Err(Self::invalid("artifacts"));
        }
        for (name, field) in [
            (self.env_file.trim(), "env_file"),
            (self.install_script.trim(), "install_script"),
        ] {
            if !artifacts.iter().any(|path| remote_name(path) == Some(name)) {
                return Err(Self::invalid(field));
            }
        }
        Ok(())
    }

    /// Local paths of the artifacts to ship, in configured order.
    #[must_use]
    pub fn artifact_paths(&self) -> Vec<Utf8PathBuf> {
        split_artifacts(&self.artifacts)
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), TransportError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(Self::invalid(field)),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), TransportError> {
        Self::require_optional_value(Some(value), field)
    }

    fn invalid(field: &str) -> TransportError {
        TransportError::InvalidConfig {
            field: field.to_owned(),
        }
    }
}
