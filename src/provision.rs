//! Single-candidate provisioning: create, set up, and verify one droplet.
//!
//! An attempt either ends with a verified live droplet or with nothing:
//! every failure and every observed cancellation destroys the droplet
//! before the error is returned.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{BackendFuture, CloudApi, Droplet, InstanceStage};
use crate::catalog::CatalogSelection;
use crate::lifecycle::{InstanceLifecycle, LifecycleError};
use crate::stages::{StageError, StageExecutor};
use crate::transport::CommandRunner;

/// Errors raised by a single provisioning attempt.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Creating the droplet failed. Nothing was left behind.
    #[error("failed to create droplet: {0}")]
    Lifecycle(#[source] LifecycleError),
    /// A stage failed and the droplet was destroyed.
    #[error("droplet {droplet_id} rejected: {source}")]
    Stage {
        /// Provider droplet identifier.
        droplet_id: u64,
        /// Stage failure that caused the rejection.
        #[source]
        source: StageError,
    },
    /// The attempt observed cancellation and released its droplet, if any.
    #[error("attempt cancelled")]
    Cancelled {
        /// Droplet released on cancellation.
        droplet_id: Option<u64>,
    },
}

impl ProvisionError {
    /// Short classification used in log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Lifecycle(err) => err.kind(),
            Self::Stage { source, .. } => source.kind(),
            Self::Cancelled { .. } => "Cancelled",
        }
    }

    /// Returns `true` when the attempt stopped because it was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A unit of work the race coordinator can run concurrently.
pub trait Provision: Send + Sync + 'static {
    /// Runs one attempt to completion, returning a verified droplet.
    fn attempt<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, Droplet, ProvisionError>;

    /// Destroys a droplet returned by [`Provision::attempt`] that is no
    /// longer wanted. Returns `true` when this call released it.
    fn release<'a>(&'a self, droplet: &'a Droplet) -> BackendFuture<'a, bool, ProvisionError>;
}

/// Carries one droplet from creation through verification.
#[derive(Debug)]
pub struct Provisioner<A: CloudApi, R: CommandRunner + 'static> {
    selection: CatalogSelection,
    lifecycle: InstanceLifecycle<A>,
    stages: StageExecutor<R>,
}

impl<A: CloudApi, R: CommandRunner + 'static> Provisioner<A, R> {
    /// Creates a provisioner for droplets built from `selection`.
    #[must_use]
    pub const fn new(
        selection: CatalogSelection,
        lifecycle: InstanceLifecycle<A>,
        stages: StageExecutor<R>,
    ) -> Self {
        Self {
            selection,
            lifecycle,
            stages,
        }
    }

    /// Runs create, setup, and verification, checking `cancel` between
    /// stages.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Lifecycle`] when creation fails,
    /// [`ProvisionError::Stage`] when setup or verification fails, and
    /// [`ProvisionError::Cancelled`] when cancellation is observed. In every
    /// error case the droplet has already been destroyed.
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<Droplet, ProvisionError> {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled { droplet_id: None });
        }

        let mut droplet = self
            .lifecycle
            .create(&self.selection)
            .await
            .map_err(ProvisionError::Lifecycle)?;
        self.checkpoint(&droplet, cancel).await?;

        if let Err(err) = self.stages.setup(&droplet, cancel).await {
            return Err(self.reject(&droplet, err).await);
        }
        self.lifecycle
            .record_stage(&mut droplet, InstanceStage::SetupComplete);
        self.checkpoint(&droplet, cancel).await?;

        match self.stages.verify(&droplet, cancel).await {
            Ok(endpoint) => info!(droplet_id = droplet.id, %endpoint, "direct path confirmed"),
            Err(err) => return Err(self.reject(&droplet, err).await),
        }
        self.checkpoint(&droplet, cancel).await?;
        self.lifecycle
            .record_stage(&mut droplet, InstanceStage::Verified);

        info!(droplet_id = droplet.id, name = %droplet.name, "droplet is up and running");
        Ok(droplet)
    }

    async fn checkpoint(
        &self,
        droplet: &Droplet,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        info!(droplet_id = droplet.id, "attempt cancelled; releasing droplet");
        self.destroy(droplet).await;
        Err(ProvisionError::Cancelled {
            droplet_id: Some(droplet.id),
        })
    }

    async fn reject(&self, droplet: &Droplet, err: StageError) -> ProvisionError {
        let failure = match err {
            StageError::Cancelled => ProvisionError::Cancelled {
                droplet_id: Some(droplet.id),
            },
            source => ProvisionError::Stage {
                droplet_id: droplet.id,
                source,
            },
        };
        if !failure.is_cancelled() {
            error!(
                droplet_id = droplet.id,
                kind = failure.kind(),
                error = %failure,
                "droplet rejected"
            );
        }
        self.destroy(droplet).await;
        failure
    }

    async fn destroy(&self, droplet: &Droplet) {
        // Destroy failures are logged by the lifecycle manager.
        if let Ok(true) = self.lifecycle.destroy(droplet).await {
            debug!(droplet_id = droplet.id, "droplet released");
        }
    }
}

impl<A, R> Provision for Provisioner<A, R>
where
    A: CloudApi + 'static,
    R: CommandRunner + 'static,
{
    fn attempt<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, Droplet, ProvisionError> {
        Box::pin(self.provision(cancel))
    }

    fn release<'a>(&'a self, droplet: &'a Droplet) -> BackendFuture<'a, bool, ProvisionError> {
        Box::pin(async move {
            self.lifecycle
                .destroy(droplet)
                .await
                .map_err(ProvisionError::Lifecycle)
        })
    }
}
