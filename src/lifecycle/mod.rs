//! Droplet creation, readiness polling, and teardown.
//!
//! Creation blocks on the provider's create action and then re-fetches the
//! droplet for its public address. The registry lock only covers the record
//! update; provider calls from different attempts run fully in parallel.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ActionStatus, CloudApi, Droplet, DropletRequest, InstanceStage};
use crate::catalog::CatalogSelection;
use crate::registry::InstanceRegistry;

/// Interval between action status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of action polls before creation is abandoned (about 15 minutes).
pub const DEFAULT_MAX_POLLS: u32 = 180;

/// Tag attached to every droplet created by this crate.
pub const DROPLET_TAG: &str = "exitnode";

const NAME_SUFFIX_LEN: usize = 8;

/// Errors raised while creating or destroying droplets.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// A provider call failed.
    #[error("failed to {operation}: {message}")]
    Provider {
        /// Operation that was attempted.
        operation: &'static str,
        /// Provider error message.
        message: String,
    },
    /// The create call returned no action to wait on.
    #[error("droplet {droplet_id} was created without a create action")]
    MissingAction {
        /// Provider droplet identifier.
        droplet_id: u64,
    },
    /// The provider reported the create action as errored.
    #[error("create action {action_id} for droplet {droplet_id} errored")]
    ActionFailed {
        /// Provider droplet identifier.
        droplet_id: u64,
        /// Action that errored.
        action_id: u64,
    },
    /// The create action did not complete within the poll budget.
    #[error("droplet {droplet_id} not ready after {polls} polls of action {action_id}")]
    ProvisioningTimeout {
        /// Provider droplet identifier.
        droplet_id: u64,
        /// Action being polled.
        action_id: u64,
        /// Number of polls performed.
        polls: u32,
    },
    /// The droplet finished creating without a public IPv4 address.
    #[error("droplet {droplet_id} has no public IPv4 address")]
    MissingAddress {
        /// Provider droplet identifier.
        droplet_id: u64,
    },
    /// The destroy call failed. The record is already gone from the registry.
    #[error("failed to destroy droplet {droplet_id}: {message}")]
    Destroy {
        /// Provider droplet identifier.
        droplet_id: u64,
        /// Provider error message.
        message: String,
    },
}

impl LifecycleError {
    fn provider(operation: &'static str, err: &impl Display) -> Self {
        Self::Provider {
            operation,
            message: err.to_string(),
        }
    }

    /// Short classification used in log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "ProviderError",
            Self::MissingAction { .. } | Self::ActionFailed { .. } => "CreateActionFailure",
            Self::ProvisioningTimeout { .. } => "ProvisioningTimeout",
            Self::MissingAddress { .. } => "MissingAddress",
            Self::Destroy { .. } => "DestroyFailure",
        }
    }
}

/// Creates and destroys droplets while keeping the shared registry current.
#[derive(Debug)]
pub struct InstanceLifecycle<A: CloudApi> {
    api: Arc<A>,
    registry: Arc<InstanceRegistry>,
    name_prefix: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl<A: CloudApi> InstanceLifecycle<A> {
    /// Builds a lifecycle manager using the default action poll budget.
    #[must_use]
    pub fn new(api: Arc<A>, registry: Arc<InstanceRegistry>, name_prefix: &str) -> Self {
        Self {
            api,
            registry,
            name_prefix: name_prefix.trim().to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Overrides the delay between action polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the number of action polls before giving up.
    #[must_use]
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Shared registry this manager records droplets in.
    #[must_use]
    pub const fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Builds the create request for one attempt. Every call yields a fresh
    /// name so concurrent attempts never collide.
    #[must_use]
    pub fn droplet_request(&self, selection: &CatalogSelection) -> DropletRequest {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(NAME_SUFFIX_LEN)
            .collect();
        DropletRequest {
            name: format!("{}-{}-{suffix}", self.name_prefix, selection.region.slug),
            region: selection.region.slug.clone(),
            size: selection.size.slug.clone(),
            image: selection.image.id,
            ssh_keys: selection.ssh_key_ids(),
            tags: vec![String::from(DROPLET_TAG)],
        }
    }

    /// Creates a droplet, waits for it to become active, and records it.
    ///
    /// A droplet whose readiness wait fails is destroyed before the error is
    /// returned, so a failed call leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ProvisioningTimeout`] when the create action
    /// outlives the poll budget, [`LifecycleError::ActionFailed`] when the
    /// provider reports it errored, and [`LifecycleError::Provider`] when any
    /// provider call fails.
    pub async fn create(&self, selection: &CatalogSelection) -> Result<Droplet, LifecycleError> {
        let request = self.droplet_request(selection);
        let created = self
            .api
            .create_droplet(&request)
            .await
            .map_err(|err| LifecycleError::provider("create droplet", &err))?;
        info!(
            droplet_id = created.id,
            name = %request.name,
            region = %selection.region.name,
            "creating droplet"
        );

        match self.await_active(created.id, created.action_ids.last().copied()).await {
            Ok(droplet) => {
                self.registry.insert(droplet.clone());
                Ok(droplet)
            }
            Err(err) => {
                self.discard(created.id).await;
                Err(err)
            }
        }
    }

    async fn await_active(
        &self,
        droplet_id: u64,
        action_id: Option<u64>,
    ) -> Result<Droplet, LifecycleError> {
        let action = action_id.ok_or(LifecycleError::MissingAction { droplet_id })?;
        info!(droplet_id, action_id = action, "waiting for droplet to finish");
        self.wait_for_action(droplet_id, action).await?;

        let mut droplet = self
            .api
            .get_droplet(droplet_id)
            .await
            .map_err(|err| LifecycleError::provider("fetch droplet", &err))?;
        let Some(address) = droplet.public_ip else {
            return Err(LifecycleError::MissingAddress { droplet_id });
        };
        droplet.stage = InstanceStage::Active;
        info!(droplet_id, %address, "droplet active");
        Ok(droplet)
    }

    async fn wait_for_action(&self, droplet_id: u64, action_id: u64) -> Result<(), LifecycleError> {
        for poll in 1..=self.max_polls {
            let status = self
                .api
                .get_action(action_id)
                .await
                .map_err(|err| LifecycleError::provider("poll create action", &err))?;
            match status {
                ActionStatus::Completed => return Ok(()),
                ActionStatus::Errored => {
                    return Err(LifecycleError::ActionFailed {
                        droplet_id,
                        action_id,
                    });
                }
                ActionStatus::InProgress => {
                    debug!(droplet_id, action_id, poll, "create action in progress");
                    sleep(self.poll_interval).await;
                }
            }
        }

        Err(LifecycleError::ProvisioningTimeout {
            droplet_id,
            action_id,
            polls: self.max_polls,
        })
    }

    async fn discard(&self, droplet_id: u64) {
        if let Err(err) = self.api.destroy_droplet(droplet_id).await {
            warn!(
                droplet_id,
                kind = "DestroyFailure",
                error = %err,
                "failed to discard droplet that never became ready"
            );
        }
    }

    /// Records that `droplet` reached `stage`.
    pub fn record_stage(&self, droplet: &mut Droplet, stage: InstanceStage) {
        droplet.stage = stage;
        self.registry.insert(droplet.clone());
        debug!(droplet_id = droplet.id, ?stage, "stage recorded");
    }

    /// Destroys `droplet` and removes it from the registry.
    ///
    /// Returns `Ok(false)` without calling the provider when the droplet is
    /// no longer registered, so repeated cleanup is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Destroy`] when the provider call fails. The
    /// registry entry is removed regardless and the call is not retried.
    pub async fn destroy(&self, droplet: &Droplet) -> Result<bool, LifecycleError> {
        if !self.registry.remove(droplet.id) {
            debug!(droplet_id = droplet.id, "droplet already released");
            return Ok(false);
        }

        info!(droplet_id = droplet.id, name = %droplet.name, "destroying droplet");
        self.api.destroy_droplet(droplet.id).await.map_err(|err| {
            warn!(
                droplet_id = droplet.id,
                kind = "DestroyFailure",
                error = %err,
                "destroy call failed; droplet may leak"
            );
            LifecycleError::Destroy {
                droplet_id: droplet.id,
                message: err.to_string(),
            }
        })?;
        Ok(true)
    }
}
