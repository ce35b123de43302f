//! Command-line interface definitions for the `exitnode` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `exitnode` binary.
#[derive(Debug, Parser)]
#[command(
    name = "exitnode",
    about = "Race disposable DigitalOcean droplets until one is a directly reachable Tailscale exit node",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision droplets concurrently and keep the first verified one.
    #[command(
        name = "race",
        about = "Provision droplets concurrently and keep the first verified one"
    )]
    Race(RaceCommand),
    /// Show the droplets on the account and the remaining capacity.
    #[command(
        name = "status",
        about = "Show the droplets on the account and the remaining capacity"
    )]
    Status,
}

/// Arguments for the `exitnode race` subcommand.
///
/// Every flag overrides the matching `DO_*` setting for this run only.
#[derive(Debug, Default, Parser)]
pub(crate) struct RaceCommand {
    /// Region slug to create droplets in, for example `fra1`.
    #[arg(long, value_name = "SLUG")]
    pub(crate) region: Option<String>,
    /// Fragment matched against image slugs, for example `ubuntu-22-04`.
    #[arg(long, value_name = "NAME")]
    pub(crate) image: Option<String>,
    /// Maximum number of droplets on the account at once.
    #[arg(long, value_name = "COUNT")]
    pub(crate) max_droplets: Option<u32>,
    /// Give up after this many provisioning attempts in total.
    #[arg(long, value_name = "COUNT")]
    pub(crate) max_attempts: Option<u32>,
}
