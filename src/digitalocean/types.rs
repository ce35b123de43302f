//! Wire representations of DigitalOcean API payloads.

use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::{
    ActionStatus, CreatedDroplet, Droplet, DropletRequest, Image, InstanceStage, Region, Size,
    SshKey,
};

#[derive(Deserialize)]
pub(crate) struct RegionsPage {
    pub(crate) regions: Vec<RegionWire>,
}

#[derive(Deserialize)]
pub(crate) struct RegionWire {
    slug: String,
    name: String,
    #[serde(default)]
    available: bool,
}

impl From<RegionWire> for Region {
    fn from(value: RegionWire) -> Self {
        Self {
            slug: value.slug,
            name: value.name,
            available: value.available,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ImagesPage {
    pub(crate) images: Vec<ImageWire>,
}

#[derive(Deserialize)]
pub(crate) struct ImageWire {
    id: u64,
    #[serde(default)]
    slug: Option<String>,
    name: String,
}

impl From<ImageWire> for Image {
    fn from(value: ImageWire) -> Self {
        Self {
            id: value.id,
            slug: value.slug,
            name: value.name,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct SizesPage {
    pub(crate) sizes: Vec<SizeWire>,
}

#[derive(Deserialize)]
pub(crate) struct SizeWire {
    slug: String,
    memory: u64,
    price_monthly: f64,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default = "available_by_default")]
    available: bool,
}

const fn available_by_default() -> bool {
    true
}

impl From<SizeWire> for Size {
    fn from(value: SizeWire) -> Self {
        Self {
            slug: value.slug,
            memory_mb: value.memory,
            price_monthly: value.price_monthly,
            regions: value.regions,
            available: value.available,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct SshKeysPage {
    pub(crate) ssh_keys: Vec<SshKeyWire>,
}

#[derive(Deserialize)]
pub(crate) struct SshKeyWire {
    id: u64,
    fingerprint: String,
    name: String,
}

impl From<SshKeyWire> for SshKey {
    fn from(value: SshKeyWire) -> Self {
        Self {
            id: value.id,
            fingerprint: value.fingerprint,
            name: value.name,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct DropletsPage {
    pub(crate) droplets: Vec<DropletWire>,
}

#[derive(Deserialize)]
pub(crate) struct DropletEnvelope {
    pub(crate) droplet: DropletWire,
}

#[derive(Deserialize)]
pub(crate) struct DropletWire {
    id: u64,
    name: String,
    status: String,
    region: SlugRef,
    #[serde(default)]
    image: Option<ImageRef>,
    size_slug: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Deserialize)]
struct SlugRef {
    slug: String,
}

#[derive(Deserialize)]
struct ImageRef {
    id: u64,
}

#[derive(Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

impl From<DropletWire> for Droplet {
    fn from(value: DropletWire) -> Self {
        let public_ip = value
            .networks
            .v4
            .iter()
            .filter(|network| network.kind == "public")
            .find_map(|network| IpAddr::from_str(&network.ip_address).ok());
        let stage = if value.status == "active" && public_ip.is_some() {
            InstanceStage::Active
        } else {
            InstanceStage::Created
        };
        Self {
            id: value.id,
            name: value.name,
            region: value.region.slug,
            image_id: value.image.map(|image| image.id),
            size: value.size_slug,
            public_ip,
            stage,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct CreateDropletBody<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: u64,
    ssh_keys: &'a [u64],
    tags: &'a [String],
}

impl<'a> From<&'a DropletRequest> for CreateDropletBody<'a> {
    fn from(value: &'a DropletRequest) -> Self {
        Self {
            name: &value.name,
            region: &value.region,
            size: &value.size,
            image: value.image,
            ssh_keys: &value.ssh_keys,
            tags: &value.tags,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct CreateDropletResponse {
    droplet: CreatedDropletWire,
    #[serde(default)]
    links: Links,
}

#[derive(Deserialize)]
struct CreatedDropletWire {
    id: u64,
}

#[derive(Default, Deserialize)]
struct Links {
    #[serde(default)]
    actions: Vec<ActionLink>,
}

#[derive(Deserialize)]
struct ActionLink {
    id: u64,
}

impl From<CreateDropletResponse> for CreatedDroplet {
    fn from(value: CreateDropletResponse) -> Self {
        Self {
            id: value.droplet.id,
            action_ids: value.links.actions.into_iter().map(|link| link.id).collect(),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ActionEnvelope {
    pub(crate) action: ActionWire,
}

#[derive(Deserialize)]
pub(crate) struct ActionWire {
    status: String,
}

impl From<ActionWire> for ActionStatus {
    fn from(value: ActionWire) -> Self {
        match value.status.as_str() {
            "completed" => Self::Completed,
            "errored" => Self::Errored,
            _ => Self::InProgress,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    pub(crate) id: String,
    pub(crate) message: String,
}
