//! Race coordinator: runs concurrent provisioning attempts and keeps the
//! first droplet that passes verification.
//!
//! The ceiling counts droplets that existed before the race plus one slot
//! per in-flight attempt, so an attempt's own droplet is never counted
//! twice. The coordinator is a single polling loop; attempts run as
//! independent tasks on a pool bounded by a semaphore of `ceiling` permits.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::Droplet;
use crate::provision::{Provision, ProvisionError};
use crate::registry::InstanceRegistry;

/// Interval between checks for finished attempts.
pub const DEFAULT_RACE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How a race ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaceOutcome {
    /// An attempt produced a verified droplet. It stays live.
    Winner(Droplet),
    /// The account already holds `ceiling` droplets; nothing was created.
    LimitReached {
        /// Droplets present when the race started.
        live: usize,
        /// Configured ceiling.
        ceiling: usize,
    },
    /// Every attempt allowed by the attempt limit failed.
    Exhausted {
        /// Number of attempts started.
        attempts: u32,
    },
    /// The external stop signal fired before a winner emerged.
    Interrupted,
}

struct Attempt {
    id: u32,
    handle: JoinHandle<Result<Droplet, ProvisionError>>,
}

/// Losing attempts still winding down after the race returned.
///
/// Each loser destroys its own droplet when it stops; any loser that
/// verified anyway is released by the drain. Await [`Drain::wait`] before
/// exiting so no droplet is left behind.
#[derive(Debug, Default)]
#[must_use = "losing attempts keep their droplets until drained"]
pub struct Drain {
    handle: Option<JoinHandle<()>>,
}

impl Drain {
    fn spawn<P: Provision>(
        provisioner: Arc<P>,
        mut surplus: Vec<Droplet>,
        attempts: Vec<Attempt>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            surplus.extend(collect(attempts).await);
            release_all(provisioner.as_ref(), &surplus).await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Returns `true` once every losing attempt has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for every losing attempt to stop and its droplet to be released.
    pub async fn wait(self) {
        let Some(handle) = self.handle else {
            return;
        };
        if let Err(err) = handle.await {
            error!(error = %err, "drain task aborted");
        }
    }
}

/// Spawns, polls, and cancels provisioning attempts.
#[derive(Debug)]
pub struct RaceCoordinator<P: Provision> {
    provisioner: Arc<P>,
    registry: Arc<InstanceRegistry>,
    ceiling: usize,
    max_attempts: Option<u32>,
    poll_interval: Duration,
}

impl<P: Provision> RaceCoordinator<P> {
    /// Creates a coordinator for at most `ceiling` concurrent droplets.
    #[must_use]
    pub const fn new(provisioner: Arc<P>, registry: Arc<InstanceRegistry>, ceiling: usize) -> Self {
        Self {
            provisioner,
            registry,
            ceiling,
            max_attempts: None,
            poll_interval: DEFAULT_RACE_POLL_INTERVAL,
        }
    }

    /// Caps the total number of attempts. `None` keeps replacing failed
    /// attempts until a winner emerges or the race is stopped.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Overrides the interval between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the race to completion, including the drain of losing attempts.
    pub async fn run(&self, stop: &CancellationToken) -> RaceOutcome {
        let (outcome, drain) = self.race(stop).await;
        drain.wait().await;
        outcome
    }

    /// Runs the race until a winner emerges, the attempt limit is spent, or
    /// `stop` fires.
    ///
    /// A winner is returned as soon as it is seen. Losing attempts are
    /// cancelled and keep winding down behind the returned [`Drain`]. On
    /// interruption the attempts are drained before this returns.
    pub async fn race(&self, stop: &CancellationToken) -> (RaceOutcome, Drain) {
        let preexisting: BTreeSet<u64> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|droplet| droplet.id)
            .collect();
        let live = preexisting.len();
        if live >= self.ceiling {
            error!(live, ceiling = self.ceiling, "droplet limit reached");
            let outcome = RaceOutcome::LimitReached {
                live,
                ceiling: self.ceiling,
            };
            return (outcome, Drain::default());
        }

        let cancel = stop.child_token();
        let pool = Arc::new(Semaphore::new(self.ceiling));
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut started: u32 = 0;

        loop {
            let capacity = self.capacity(&preexisting);
            while attempts.len() < capacity && self.may_start(started) {
                started += 1;
                attempts.push(self.spawn(started, &cancel, &pool));
                info!(
                    attempt = started,
                    in_flight = attempts.len(),
                    live = self.registry.len(),
                    "checking for exit nodes"
                );
            }

            if attempts.is_empty() {
                warn!(attempts = started, "every provisioning attempt failed");
                return (RaceOutcome::Exhausted { attempts: started }, Drain::default());
            }

            tokio::select! {
                () = stop.cancelled() => {}
                () = sleep(self.poll_interval) => {}
            }

            let (finished, pending): (Vec<Attempt>, Vec<Attempt>) = attempts
                .into_iter()
                .partition(|attempt| attempt.handle.is_finished());
            attempts = pending;

            let mut winners = collect(finished).await.into_iter();
            if let Some(winner) = winners.next() {
                info!(
                    droplet_id = winner.id,
                    "At least one exit node is working. Stopping provisions."
                );
                cancel.cancel();
                if !attempts.is_empty() {
                    info!(in_flight = attempts.len(), "draining losing attempts");
                }
                let drain = Drain::spawn(Arc::clone(&self.provisioner), winners.collect(), attempts);
                return (RaceOutcome::Winner(winner), drain);
            }

            if stop.is_cancelled() {
                info!(in_flight = attempts.len(), "race interrupted; draining attempts");
                cancel.cancel();
                let stragglers = collect(attempts).await;
                release_all(self.provisioner.as_ref(), &stragglers).await;
                return (RaceOutcome::Interrupted, Drain::default());
            }
        }
    }

    fn capacity(&self, preexisting: &BTreeSet<u64>) -> usize {
        let foreign = self
            .registry
            .snapshot()
            .iter()
            .filter(|droplet| preexisting.contains(&droplet.id))
            .count();
        self.ceiling.saturating_sub(foreign)
    }

    fn may_start(&self, started: u32) -> bool {
        self.max_attempts.is_none_or(|limit| started < limit)
    }

    fn spawn(&self, id: u32, cancel: &CancellationToken, pool: &Arc<Semaphore>) -> Attempt {
        let provisioner = Arc::clone(&self.provisioner);
        let token = cancel.clone();
        let permits = Arc::clone(pool);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(ProvisionError::Cancelled { droplet_id: None });
            };
            if token.is_cancelled() {
                return Err(ProvisionError::Cancelled { droplet_id: None });
            }
            provisioner.attempt(&token).await
        });
        Attempt { id, handle }
    }
}

async fn release_all<P: Provision>(provisioner: &P, droplets: &[Droplet]) {
    for droplet in droplets {
        match provisioner.release(droplet).await {
            Ok(_) => info!(droplet_id = droplet.id, "surplus droplet released"),
            Err(err) => warn!(
                droplet_id = droplet.id,
                kind = err.kind(),
                error = %err,
                "failed to release surplus droplet"
            ),
        }
    }
}

async fn collect(attempts: Vec<Attempt>) -> Vec<Droplet> {
    let mut winners = Vec::new();
    for attempt in attempts {
        match attempt.handle.await {
            Ok(Ok(droplet)) => winners.push(droplet),
            Ok(Err(err)) if err.is_cancelled() => {
                info!(attempt = attempt.id, "attempt cancelled");
            }
            Ok(Err(err)) => {
                warn!(
                    attempt = attempt.id,
                    kind = err.kind(),
                    error = %err,
                    "provisioning attempt failed"
                );
            }
            Err(err) => {
                error!(attempt = attempt.id, error = %err, "provisioning task aborted");
            }
        }
    }
    winners
}
