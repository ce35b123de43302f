//! Resolution of the region, image, and size every droplet is created with.
//!
//! The catalogs are listed once at startup. Selection is deterministic for a
//! given catalog: the first image whose slug contains the configured name,
//! and the cheapest size available in the region that meets the memory
//! floor, with the first listed size winning a price tie.

use std::fmt::Display;

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{CloudApi, Image, Region, Size, SshKey};

/// What the caller wants from the catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatalogRequest {
    /// Region slug that must exist verbatim.
    pub region: String,
    /// Fragment that must appear in the image slug.
    pub image: String,
    /// Minimum droplet memory in megabytes.
    pub min_memory_mb: u64,
}

/// Immutable region, image, and size tuple used for every attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogSelection {
    /// Selected region.
    pub region: Region,
    /// Selected base image.
    pub image: Image,
    /// Cheapest qualifying size.
    pub size: Size,
    /// Account SSH keys installed on every droplet.
    pub ssh_keys: Vec<SshKey>,
}

/// Raised when no valid catalog combination exists.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CatalogError {
    /// The region slug is not in the provider's region list.
    #[error("region {region} not found in regions")]
    RegionNotFound {
        /// Requested region slug.
        region: String,
    },
    /// No image slug contains the requested name.
    #[error("image {image} not found")]
    ImageNotFound {
        /// Requested image name fragment.
        image: String,
    },
    /// No size in the region meets the memory floor.
    #[error("no size with at least {min_memory_mb} MB found for region {region}")]
    NoQualifyingSize {
        /// Region the sizes were filtered for.
        region: String,
        /// Memory floor applied.
        min_memory_mb: u64,
    },
    /// Listing one of the catalogs failed.
    #[error("failed to list {catalog}: {message}")]
    Provider {
        /// Catalog being listed (for example `regions`).
        catalog: &'static str,
        /// Provider error message.
        message: String,
    },
}

impl CatalogError {
    fn provider(catalog: &'static str, err: &impl Display) -> Self {
        Self::Provider {
            catalog,
            message: err.to_string(),
        }
    }
}

impl CatalogSelection {
    /// Picks region, image, and size from already listed catalogs.
    ///
    /// # Errors
    ///
    /// Returns the [`CatalogError`] variant naming the dimension that cannot
    /// be satisfied, checked in region, image, size order.
    pub fn select(
        request: &CatalogRequest,
        regions: &[Region],
        images: &[Image],
        sizes: &[Size],
        ssh_keys: Vec<SshKey>,
    ) -> Result<Self, CatalogError> {
        let region = regions
            .iter()
            .find(|region| region.slug == request.region)
            .cloned()
            .ok_or_else(|| CatalogError::RegionNotFound {
                region: request.region.clone(),
            })?;

        let image = images
            .iter()
            .find(|image| {
                image
                    .slug
                    .as_deref()
                    .is_some_and(|slug| slug.contains(request.image.as_str()))
            })
            .cloned()
            .ok_or_else(|| CatalogError::ImageNotFound {
                image: request.image.clone(),
            })?;

        let size = cheapest_size(sizes, &region.slug, request.min_memory_mb)
            .cloned()
            .ok_or_else(|| CatalogError::NoQualifyingSize {
                region: region.slug.clone(),
                min_memory_mb: request.min_memory_mb,
            })?;

        Ok(Self {
            region,
            image,
            size,
            ssh_keys,
        })
    }

    /// Returns the SSH key identifiers passed on droplet creation.
    #[must_use]
    pub fn ssh_key_ids(&self) -> Vec<u64> {
        self.ssh_keys.iter().map(|key| key.id).collect()
    }
}

fn cheapest_size<'a>(sizes: &'a [Size], region: &str, min_memory_mb: u64) -> Option<&'a Size> {
    sizes
        .iter()
        .filter(|size| size.available && size.memory_mb >= min_memory_mb)
        .filter(|size| size.regions.iter().any(|slug| slug == region))
        .fold(None, |best: Option<&Size>, candidate| match best {
            Some(current) if current.price_monthly.total_cmp(&candidate.price_monthly).is_le() => {
                Some(current)
            }
            _ => Some(candidate),
        })
}

/// Lists every catalog once and selects the droplet parameters.
///
/// # Errors
///
/// Returns [`CatalogError::Provider`] when a listing fails, otherwise the
/// variant naming the unsatisfiable dimension.
pub async fn resolve<A: CloudApi>(
    api: &A,
    request: &CatalogRequest,
) -> Result<CatalogSelection, CatalogError> {
    let regions = api
        .list_regions()
        .await
        .map_err(|err| CatalogError::provider("regions", &err))?;
    let images = api
        .list_images()
        .await
        .map_err(|err| CatalogError::provider("images", &err))?;
    let sizes = api
        .list_sizes()
        .await
        .map_err(|err| CatalogError::provider("sizes", &err))?;
    let ssh_keys = api
        .list_ssh_keys()
        .await
        .map_err(|err| CatalogError::provider("ssh keys", &err))?;
    debug!(
        regions = regions.len(),
        images = images.len(),
        sizes = sizes.len(),
        ssh_keys = ssh_keys.len(),
        "catalogs listed"
    );

    let selection = CatalogSelection::select(request, &regions, &images, &sizes, ssh_keys)?;
    info!(
        region = %selection.region.slug,
        image_id = selection.image.id,
        size = %selection.size.slug,
        price_monthly = selection.size.price_monthly,
        "catalog selection resolved"
    );
    Ok(selection)
}
