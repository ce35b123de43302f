//! Cloud API abstraction for provisioning disposable exit-node droplets.
//!
//! The race only needs a narrow slice of the provider: catalog listings, a
//! create call that hands back an action to poll, a metadata refresh, and a
//! destroy call. Everything else about the provider stays behind
//! [`CloudApi`].

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

/// Future returned by cloud API operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// A provider region such as `fra1`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Region {
    /// Short identifier used in API requests.
    pub slug: String,
    /// Human readable region name.
    pub name: String,
    /// Whether the provider currently accepts new droplets in the region.
    pub available: bool,
}

/// A bootable base image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Numeric provider identifier passed on creation.
    pub id: u64,
    /// Slug such as `ubuntu-22-04-x64`. Snapshots and custom images have none.
    pub slug: Option<String>,
    /// Human readable image name.
    pub name: String,
}

/// A droplet size with its pricing and regional availability.
#[derive(Clone, Debug, PartialEq)]
pub struct Size {
    /// Slug such as `s-1vcpu-1gb`.
    pub slug: String,
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Monthly price in US dollars.
    pub price_monthly: f64,
    /// Region slugs in which the size can be created.
    pub regions: Vec<String>,
    /// Whether the size can currently be created at all.
    pub available: bool,
}

/// An SSH key registered on the provider account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKey {
    /// Numeric provider identifier.
    pub id: u64,
    /// Key fingerprint.
    pub fingerprint: String,
    /// Label given to the key.
    pub name: String,
}

/// Parameters for a droplet creation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DropletRequest {
    /// Droplet name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Size slug.
    pub size: String,
    /// Image identifier.
    pub image: u64,
    /// Account SSH keys installed for `root`.
    pub ssh_keys: Vec<u64>,
    /// Tags attached to the droplet.
    pub tags: Vec<String>,
}

/// Handle returned by the provider for an accepted creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedDroplet {
    /// Identifier of the new droplet.
    pub id: u64,
    /// Actions started by the request, oldest first.
    pub action_ids: Vec<u64>,
}

/// Status of an asynchronous provider action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with a provider-side failure.
    Errored,
}

/// Where a droplet is in the provisioning pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum InstanceStage {
    /// Accepted by the provider but not yet reported active.
    Created,
    /// Active with a network address.
    Active,
    /// Remote installation completed.
    SetupComplete,
    /// Direct overlay connectivity confirmed.
    Verified,
}

/// Instance record for a droplet owned or observed by this process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Droplet {
    /// Provider identifier.
    pub id: u64,
    /// Droplet name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Image the droplet booted from, when the provider reports one.
    pub image_id: Option<u64>,
    /// Size slug.
    pub size: String,
    /// Public IPv4 address, assigned once the droplet is active.
    pub public_ip: Option<IpAddr>,
    /// Provisioning stage reached so far.
    pub stage: InstanceStage,
}

/// Minimal interface implemented by cloud providers.
pub trait CloudApi: Send + Sync {
    /// Provider specific error type returned by the API.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists all regions.
    fn list_regions(&self) -> BackendFuture<'_, Vec<Region>, Self::Error>;

    /// Lists public distribution images.
    fn list_images(&self) -> BackendFuture<'_, Vec<Image>, Self::Error>;

    /// Lists all droplet sizes.
    fn list_sizes(&self) -> BackendFuture<'_, Vec<Size>, Self::Error>;

    /// Lists the SSH keys registered on the account.
    fn list_ssh_keys(&self) -> BackendFuture<'_, Vec<SshKey>, Self::Error>;

    /// Lists the droplets currently on the account.
    fn list_droplets(&self) -> BackendFuture<'_, Vec<Droplet>, Self::Error>;

    /// Requests a new droplet and returns its id plus the actions to poll.
    fn create_droplet<'a>(
        &'a self,
        request: &'a DropletRequest,
    ) -> BackendFuture<'a, CreatedDroplet, Self::Error>;

    /// Reads the current status of an action.
    fn get_action(&self, action_id: u64) -> BackendFuture<'_, ActionStatus, Self::Error>;

    /// Fetches fresh metadata for a droplet.
    fn get_droplet(&self, droplet_id: u64) -> BackendFuture<'_, Droplet, Self::Error>;

    /// Destroys a droplet.
    fn destroy_droplet(&self, droplet_id: u64) -> BackendFuture<'_, (), Self::Error>;
}
