//! Binary entry point for the `exitnode` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use exitnode::catalog::resolve;
use exitnode::{
    CatalogError, CloudApi, ConfigError, Deployer, DigitalOceanApi, DigitalOceanError, Droplet,
    ExitNodeConfig, InstanceLifecycle, InstanceRegistry, Provisioner, RaceCoordinator,
    RaceOutcome, StageExecutor, TransportConfig, TransportError,
};

mod cli;

use cli::{Cli, RaceCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport configuration error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(#[from] DigitalOceanError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("every provisioning attempt failed ({attempts} attempts)")]
    Exhausted { attempts: u32 },
    #[error("race interrupted before a droplet was verified")]
    Interrupted,
}

impl From<TransportError> for CliError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value.to_string())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Race(command) => race_command(&command).await,
        Cli::Status => status_command().await,
    }
}

fn load_config(overrides: &RaceCommand) -> Result<ExitNodeConfig, CliError> {
    let mut config = ExitNodeConfig::load_without_cli_args()?;
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut ExitNodeConfig, overrides: &RaceCommand) {
    if let Some(ref region) = overrides.region {
        config.region.clone_from(region);
    }
    if let Some(ref image) = overrides.image {
        config.image.clone_from(image);
    }
    if let Some(max_droplets) = overrides.max_droplets {
        config.max_droplets = max_droplets;
    }
    if overrides.max_attempts.is_some() {
        config.max_attempts = overrides.max_attempts;
    }
}

async fn race_command(args: &RaceCommand) -> Result<(), CliError> {
    let config = load_config(args)?;
    let api = Arc::new(DigitalOceanApi::new(&config.token)?);

    let existing = report_state(api.as_ref()).await?;
    let registry = Arc::new(InstanceRegistry::from(existing));

    let selection = resolve(api.as_ref(), &config.catalog_request()).await?;

    let transport = TransportConfig::load_without_cli_args()
        .map_err(|err| CliError::Transport(err.to_string()))?;
    let deployer = Deployer::with_process_runner(transport)?;
    deployer.check_artifacts()?;

    let lifecycle = InstanceLifecycle::new(api, Arc::clone(&registry), &config.name_prefix);
    let provisioner = Provisioner::new(selection, lifecycle, StageExecutor::new(deployer));
    let coordinator = RaceCoordinator::new(Arc::new(provisioner), registry, config.ceiling())
        .with_max_attempts(config.max_attempts);

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping the race");
            trigger.cancel();
        }
    });

    let (outcome, drain) = coordinator.race(&stop).await;
    let result = match outcome {
        RaceOutcome::Winner(droplet) => {
            write_winner(io::stdout(), &droplet);
            Ok(())
        }
        RaceOutcome::LimitReached { .. } => Ok(()),
        RaceOutcome::Exhausted { attempts } => Err(CliError::Exhausted { attempts }),
        RaceOutcome::Interrupted => Err(CliError::Interrupted),
    };
    drain.wait().await;
    result
}

async fn report_state<A: CloudApi>(api: &A) -> Result<Vec<Droplet>, CliError>
where
    CliError: From<A::Error>,
{
    let droplets = api.list_droplets().await?;
    let ssh_keys = api.list_ssh_keys().await?;
    info!(
        droplets = droplets.len(),
        ssh_keys = ssh_keys.len(),
        "current system state"
    );
    for droplet in &droplets {
        info!(
            droplet_id = droplet.id,
            name = %droplet.name,
            region = %droplet.region,
            "existing droplet"
        );
    }
    for key in &ssh_keys {
        info!(key_id = key.id, name = %key.name, fingerprint = %key.fingerprint, "ssh key");
    }
    Ok(droplets)
}

async fn status_command() -> Result<(), CliError> {
    let config = load_config(&RaceCommand::default())?;
    let api = DigitalOceanApi::new(&config.token)?;
    let droplets = api.list_droplets().await?;
    write_status(io::stdout(), &droplets, config.ceiling());
    Ok(())
}

fn write_winner(mut target: impl Write, droplet: &Droplet) {
    let address = droplet
        .public_ip
        .map_or_else(|| String::from("unknown"), |ip| ip.to_string());
    writeln!(target, "found {address} with id {}", droplet.id).ok();
}

fn write_status(mut target: impl Write, droplets: &[Droplet], ceiling: usize) {
    for droplet in droplets {
        let address = droplet
            .public_ip
            .map_or_else(|| String::from("-"), |ip| ip.to_string());
        writeln!(
            target,
            "{}\t{}\t{}\t{address}",
            droplet.id, droplet.name, droplet.region
        )
        .ok();
    }
    let free = ceiling.saturating_sub(droplets.len());
    writeln!(target, "{} of {ceiling} droplets in use, {free} free", droplets.len()).ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use exitnode::test_support::droplet_record;

    use super::*;

    fn config() -> ExitNodeConfig {
        ExitNodeConfig {
            token: String::from("token"),
            region: String::from("fra1"),
            image: String::from("ubuntu-22-04"),
            name_prefix: String::from("do-exit"),
            max_droplets: 3,
            min_memory_mb: 1000,
            max_attempts: None,
        }
    }

    fn render(write: impl FnOnce(&mut Vec<u8>)) -> String {
        let mut buf = Vec::new();
        write(&mut buf);
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn flags_override_loaded_values() {
        let mut loaded = config();
        let overrides = RaceCommand {
            region: Some(String::from("ams3")),
            image: None,
            max_droplets: Some(1),
            max_attempts: Some(6),
        };

        apply_overrides(&mut loaded, &overrides);

        assert_eq!(loaded.region, "ams3");
        assert_eq!(loaded.image, "ubuntu-22-04");
        assert_eq!(loaded.max_droplets, 1);
        assert_eq!(loaded.max_attempts, Some(6));
    }

    #[test]
    fn absent_flags_keep_loaded_values() {
        let mut loaded = config();
        loaded.max_attempts = Some(4);

        apply_overrides(&mut loaded, &RaceCommand::default());

        assert_eq!(loaded, ExitNodeConfig {
            max_attempts: Some(4),
            ..config()
        });
    }

    #[test]
    fn winner_line_names_address_and_id() {
        let rendered = render(|buf| write_winner(buf, &droplet_record(7)));
        assert_eq!(rendered, "found 10.0.0.7 with id 7\n");
    }

    #[test]
    fn status_reports_free_capacity() {
        let rendered = render(|buf| write_status(buf, &[droplet_record(1)], 3));
        assert!(rendered.contains("do-exit-fra1-00000001"), "rendered: {rendered}");
        assert!(
            rendered.ends_with("1 of 3 droplets in use, 2 free\n"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn write_error_writes_cli_error() {
        let rendered = render(|buf| write_error(buf, &CliError::Exhausted { attempts: 4 }));
        assert!(
            rendered.contains("every provisioning attempt failed (4 attempts)"),
            "rendered: {rendered}"
        );
    }
}
