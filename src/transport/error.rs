//! Errors raised by the remote setup and verification transport.

use std::net::{IpAddr, Ipv4Addr};

use camino::Utf8PathBuf;
use thiserror::Error;

/// Remote command output fragments that no amount of retrying will fix.
const FATAL_STDERR_MARKERS: &[&str] = &["Permission denied", "Host key verification failed"];

/// Errors surfaced while shipping artifacts, installing, or probing a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when configuration is missing required values. The error message
    /// includes guidance on how to provide the value via environment variable
    /// or configuration file.
    #[error("missing {field}: set EXITNODE_TRANSPORT_{env_suffix} or add {field} to [transport] in exitnode.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a local artifact to ship does not exist.
    #[error("artifact missing: {path}")]
    MissingArtifact {
        /// Path that was expected to be shipped.
        path: Utf8PathBuf,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the host does not report a usable overlay address.
    #[error("{host} reported no overlay IPv4 address: {output}")]
    OverlayAddress {
        /// Public address of the host queried.
        host: IpAddr,
        /// Trimmed command output.
        output: String,
    },
    /// Raised when the overlay ping only reached the peer through a relay.
    #[error("no direct connection to {overlay}: {output}")]
    NoDirectPath {
        /// Overlay address that was pinged.
        overlay: Ipv4Addr,
        /// Trimmed ping output.
        output: String,
    },
    /// Raised when the blocking worker running a command panicked or was
    /// aborted.
    #[error("command worker failed: {message}")]
    Worker {
        /// Join error description.
        message: String,
    },
}

impl TransportError {
    /// Returns `true` when retrying the same operation could succeed.
    ///
    /// Missing artifacts, missing binaries, and SSH authentication failures
    /// are permanent for the lifetime of the process.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidConfig { .. }
            | Self::MissingArtifact { .. }
            | Self::Spawn { .. }
            | Self::Worker { .. } => false,
            Self::CommandFailure { stderr, .. } => !FATAL_STDERR_MARKERS
                .iter()
                .any(|marker| stderr.contains(marker)),
            Self::OverlayAddress { .. } | Self::NoDirectPath { .. } => true,
        }
    }

    pub(crate) fn from_status(program: &str, status: Option<i32>, stderr: String) -> Self {
        let status_text = status.map_or_else(|| String::from("unknown"), |code| code.to_string());
        Self::CommandFailure {
            program: program.to_owned(),
            status,
            status_text,
            stderr,
        }
    }
}
