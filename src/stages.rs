//! Setup and verification stages for one droplet, each under its own retry
//! policy.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Droplet;
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::transport::{CommandRunner, Deployer, TransportError};

/// Errors raised by the setup and verification stages.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StageError {
    /// Remote installation failed on its final attempt.
    #[error("setup failed: {0}")]
    Setup(#[source] TransportError),
    /// Direct connectivity could not be confirmed on the final attempt.
    #[error("verification failed: {0}")]
    Verification(#[source] TransportError),
    /// The droplet record carries no public address to connect to.
    #[error("droplet {droplet_id} has no public address")]
    MissingAddress {
        /// Provider droplet identifier.
        droplet_id: u64,
    },
    /// Cancellation was observed between attempts.
    #[error("stage cancelled")]
    Cancelled,
}

impl StageError {
    /// Short classification used in log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "SetupFailure",
            Self::Verification(_) => "VerificationFailure",
            Self::MissingAddress { .. } => "MissingAddress",
            Self::Cancelled => "Cancelled",
        }
    }

    fn from_retry(err: RetryError<TransportError>, wrap: fn(TransportError) -> Self) -> Self {
        match err {
            RetryError::Failed(inner) => wrap(inner),
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

/// Runs the blocking transport operations for one droplet on the blocking
/// pool.
#[derive(Debug)]
pub struct StageExecutor<R: CommandRunner + 'static> {
    deployer: Arc<Deployer<R>>,
    setup_policy: RetryPolicy,
    verification_policy: RetryPolicy,
}

impl<R: CommandRunner + 'static> StageExecutor<R> {
    /// Wraps `deployer` with the default setup and verification policies.
    #[must_use]
    pub fn new(deployer: Deployer<R>) -> Self {
        Self {
            deployer: Arc::new(deployer),
            setup_policy: RetryPolicy::SETUP,
            verification_policy: RetryPolicy::VERIFICATION,
        }
    }

    /// Replaces both retry policies.
    #[must_use]
    pub const fn with_policies(mut self, setup: RetryPolicy, verification: RetryPolicy) -> Self {
        self.setup_policy = setup;
        self.verification_policy = verification;
        self
    }

    /// Ships the artifacts and runs the installer on `droplet`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Setup`] holding the last transport error once
    /// the policy is spent or a permanent error occurs, and
    /// [`StageError::Cancelled`] when `cancel` fires between attempts.
    pub async fn setup(&self, droplet: &Droplet, cancel: &CancellationToken) -> Result<(), StageError> {
        let host = host_of(droplet)?;
        retry(self.setup_policy, cancel, "setup", || {
            self.blocking(move |deployer| deployer.setup(host))
        })
        .await
        .map_err(|err| StageError::from_retry(err, StageError::Setup))?;
        info!(droplet_id = droplet.id, %host, "setup complete");
        Ok(())
    }

    /// Confirms a direct overlay path to `droplet`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Verification`] holding the last transport
    /// error, or [`StageError::Cancelled`].
    pub async fn verify(
        &self,
        droplet: &Droplet,
        cancel: &CancellationToken,
    ) -> Result<SocketAddr, StageError> {
        let host = host_of(droplet)?;
        retry(self.verification_policy, cancel, "verification", || {
            self.blocking(move |deployer| deployer.verify_direct(host))
        })
        .await
        .map_err(|err| StageError::from_retry(err, StageError::Verification))
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&Deployer<R>) -> Result<T, TransportError> + Send + 'static,
    {
        let deployer = Arc::clone(&self.deployer);
        tokio::task::spawn_blocking(move || operation(&deployer))
            .await
            .map_err(|err| TransportError::Worker {
                message: err.to_string(),
            })?
    }
}

fn host_of(droplet: &Droplet) -> Result<IpAddr, StageError> {
    droplet.public_ip.ok_or(StageError::MissingAddress {
        droplet_id: droplet.id,
    })
}
