//! DigitalOcean implementation of the cloud API.
//!
//! Talks to the public v2 REST API directly over `reqwest`. Catalog listings
//! request a single page of 200 items; accounts with more entries than that
//! in a catalog only see the first page.

mod error;
mod types;

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::backend::{
    ActionStatus, BackendFuture, CloudApi, CreatedDroplet, Droplet, DropletRequest, Image, Region,
    Size, SshKey,
};
use types::{
    ActionEnvelope, ApiErrorBody, CreateDropletBody, CreateDropletResponse, DropletEnvelope,
    DropletsPage, ImagesPage, RegionsPage, SizesPage, SshKeysPage,
};

pub use error::DigitalOceanError;

/// Base URL of the DigitalOcean v2 API.
pub const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";

const PAGE_SIZE: u32 = 200;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the DigitalOcean droplet, catalog, and action endpoints.
#[derive(Clone, Debug)]
pub struct DigitalOceanApi {
    client: Client,
    token: String,
    base_url: String,
}

impl DigitalOceanApi {
    /// Constructs a client authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the token is blank or the
    /// HTTP client cannot be built.
    pub fn new(token: &str) -> Result<Self, DigitalOceanError> {
        Self::with_base_url(token, DIGITALOCEAN_API_BASE)
    }

    /// Constructs a client against an alternative API endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the token is blank or the
    /// HTTP client cannot be built.
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, DigitalOceanError> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(DigitalOceanError::Config(String::from(
                "API token must not be empty",
            )));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| DigitalOceanError::Config(err.to_string()))?;
        Ok(Self {
            client,
            token: trimmed.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&CreateDropletBody<'_>>,
    ) -> Result<Vec<u8>, DigitalOceanError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, &url).bearer_auth(&self.token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|err| DigitalOceanError::Http {
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| DigitalOceanError::Http {
                path: path.to_owned(),
                message: err.to_string(),
            })?
            .to_vec();

        if status.is_success() {
            return Ok(bytes);
        }

        Err(api_error(path, status, &bytes))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DigitalOceanError> {
        let body = self.send(Method::GET, path, None).await?;
        decode(path, &body)
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, DigitalOceanError> {
    serde_json::from_slice(bytes).map_err(|err| DigitalOceanError::Decode {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

fn api_error(path: &str, status: StatusCode, bytes: &[u8]) -> DigitalOceanError {
    let (id, message) = serde_json::from_slice::<ApiErrorBody>(bytes).map_or_else(
        |_| {
            (
                String::from("unknown"),
                String::from_utf8_lossy(bytes).into_owned(),
            )
        },
        |body| (body.id, body.message),
    );
    DigitalOceanError::Api {
        path: path.to_owned(),
        status: status.as_u16(),
        id,
        message,
    }
}

impl CloudApi for DigitalOceanApi {
    type Error = DigitalOceanError;

    fn list_regions(&self) -> BackendFuture<'_, Vec<Region>, Self::Error> {
        Box::pin(async move {
            let page: RegionsPage = self
                .get_json(&format!("/regions?per_page={PAGE_SIZE}"))
                .await?;
            Ok(page.regions.into_iter().map(Region::from).collect())
        })
    }

    fn list_images(&self) -> BackendFuture<'_, Vec<Image>, Self::Error> {
        Box::pin(async move {
            let page: ImagesPage = self
                .get_json(&format!("/images?type=distribution&per_page={PAGE_SIZE}"))
                .await?;
            Ok(page.images.into_iter().map(Image::from).collect())
        })
    }

    fn list_sizes(&self) -> BackendFuture<'_, Vec<Size>, Self::Error> {
        Box::pin(async move {
            let page: SizesPage = self.get_json(&format!("/sizes?per_page={PAGE_SIZE}")).await?;
            Ok(page.sizes.into_iter().map(Size::from).collect())
        })
    }

    fn list_ssh_keys(&self) -> BackendFuture<'_, Vec<SshKey>, Self::Error> {
        Box::pin(async move {
            let page: SshKeysPage = self
                .get_json(&format!("/account/keys?per_page={PAGE_SIZE}"))
                .await?;
            Ok(page.ssh_keys.into_iter().map(SshKey::from).collect())
        })
    }

    fn list_droplets(&self) -> BackendFuture<'_, Vec<Droplet>, Self::Error> {
        Box::pin(async move {
            let page: DropletsPage = self
                .get_json(&format!("/droplets?per_page={PAGE_SIZE}"))
                .await?;
            Ok(page.droplets.into_iter().map(Droplet::from).collect())
        })
    }

    fn create_droplet<'a>(
        &'a self,
        request: &'a DropletRequest,
    ) -> BackendFuture<'a, CreatedDroplet, Self::Error> {
        Box::pin(async move {
            let path = "/droplets";
            let payload = CreateDropletBody::from(request);
            let body = self.send(Method::POST, path, Some(&payload)).await?;
            let response: CreateDropletResponse = decode(path, &body)?;
            Ok(CreatedDroplet::from(response))
        })
    }

    fn get_action(&self, action_id: u64) -> BackendFuture<'_, ActionStatus, Self::Error> {
        Box::pin(async move {
            let envelope: ActionEnvelope = self.get_json(&format!("/actions/{action_id}")).await?;
            Ok(ActionStatus::from(envelope.action))
        })
    }

    fn get_droplet(&self, droplet_id: u64) -> BackendFuture<'_, Droplet, Self::Error> {
        Box::pin(async move {
            let envelope: DropletEnvelope =
                self.get_json(&format!("/droplets/{droplet_id}")).await?;
            Ok(Droplet::from(envelope.droplet))
        })
    }

    fn destroy_droplet(&self, droplet_id: u64) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            match self
                .send(Method::DELETE, &format!("/droplets/{droplet_id}"), None)
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}

#[cfg(test)]
mod tests;
