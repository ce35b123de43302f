//! Core library for the `exitnode` droplet race.
//!
//! The crate creates several disposable DigitalOcean droplets at once, ships
//! a Tailscale exit-node installer to each, and keeps the first one that
//! answers an overlay ping over a direct path. Every other droplet is
//! destroyed, and the number of droplets on the account never exceeds the
//! configured ceiling.
//!
//! The pipeline is split along its seams: [`catalog`] resolves what to
//! create, [`lifecycle`] creates and destroys, [`stages`] runs the remote
//! setup and verification through [`transport`], [`provision`] chains those
//! for one droplet, and [`race`] runs provisioners concurrently.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod digitalocean;
pub mod lifecycle;
pub mod provision;
pub mod race;
pub mod registry;
pub mod retry;
pub mod stages;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;
pub mod transport;

pub use backend::{BackendFuture, CloudApi, Droplet, InstanceStage};
pub use catalog::{CatalogError, CatalogRequest, CatalogSelection};
pub use config::{ConfigError, ExitNodeConfig};
pub use digitalocean::{DigitalOceanApi, DigitalOceanError};
pub use lifecycle::{InstanceLifecycle, LifecycleError};
pub use provision::{Provision, ProvisionError, Provisioner};
pub use race::{Drain, RaceCoordinator, RaceOutcome};
pub use registry::InstanceRegistry;
pub use retry::{RetryError, RetryPolicy};
pub use stages::{StageError, StageExecutor};
pub use transport::{
    CommandOutput, CommandRunner, Deployer, ProcessCommandRunner, TransportConfig, TransportError,
};
