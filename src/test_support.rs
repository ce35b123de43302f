//! Test support utilities shared across unit and integration tests.
//!
//! Every double here is thread safe because attempts run on the
//! multi-threaded runtime and commands run on the blocking pool.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::{OsStr, OsString};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    ActionStatus, BackendFuture, CloudApi, CreatedDroplet, Droplet, DropletRequest, Image,
    InstanceStage, Region, Size, SshKey,
};
use crate::provision::{Provision, ProvisionError};
use crate::registry::InstanceRegistry;
use crate::stages::StageError;
use crate::transport::{CommandOutput, CommandRunner, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through a test runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Builds a command output with the given exit code and streams.
#[must_use]
pub fn command_output(
    code: Option<i32>,
    stdout: impl Into<String>,
    stderr: impl Into<String>,
) -> CommandOutput {
    CommandOutput {
        code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Running out of responses yields [`TransportError::Spawn`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(command_output(code, stdout, stderr));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| TransportError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

type Route = dyn Fn(&CommandInvocation) -> Result<CommandOutput, TransportError> + Send + Sync;

/// Command runner that answers each invocation through a closure.
///
/// Useful when several attempts run concurrently and responses must depend
/// on the target host rather than on call order.
#[derive(Clone)]
pub struct RoutedRunner {
    route: Arc<Route>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl std::fmt::Debug for RoutedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedRunner")
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

impl RoutedRunner {
    /// Creates a runner answering through `route`.
    #[must_use]
    pub fn new<F>(route: F) -> Self
    where
        F: Fn(&CommandInvocation) -> Result<CommandOutput, TransportError> + Send + Sync + 'static,
    {
        Self {
            route: Arc::new(route),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }
}

impl CommandRunner for RoutedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        let invocation = CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        };
        lock(&self.invocations).push(invocation.clone());
        (self.route)(&invocation)
    }
}

/// Public address [`FakeCloud`] assigns to droplet `id`.
#[must_use]
pub fn fake_address(id: u64) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, u8::try_from(id).unwrap_or(u8::MAX)))
}

/// Builds an active droplet record with a predictable name and address.
#[must_use]
pub fn droplet_record(id: u64) -> Droplet {
    Droplet {
        id,
        name: format!("do-exit-fra1-{id:08x}"),
        region: String::from("fra1"),
        image_id: Some(42),
        size: String::from("s-1vcpu-1gb"),
        public_ip: Some(fake_address(id)),
        stage: InstanceStage::Active,
    }
}

/// Error returned by [`FakeCloud`] when a scripted failure triggers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake cloud: {0}")]
pub struct FakeCloudError(pub String);

#[derive(Debug)]
struct PendingAction {
    droplet_id: u64,
    remaining_polls: u32,
}

#[derive(Debug, Default)]
struct FakeCloudState {
    regions: Vec<Region>,
    images: Vec<Image>,
    sizes: Vec<Size>,
    ssh_keys: Vec<SshKey>,
    droplets: Vec<Droplet>,
    actions: BTreeMap<u64, PendingAction>,
    next_id: u64,
    action_polls: u32,
    action_outcome: Option<ActionStatus>,
    fail_create: bool,
    fail_destroy: bool,
    withhold_address: bool,
    created: Vec<DropletRequest>,
    destroyed: Vec<u64>,
    peak_live: usize,
}

/// In-memory [`CloudApi`] double.
///
/// Droplet ids start at 1 and droplet `n` receives address `10.0.0.n` once
/// its create action completes.
#[derive(Debug)]
pub struct FakeCloud {
    state: Mutex<FakeCloudState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeCloudState {
                next_id: 1,
                action_outcome: Some(ActionStatus::Completed),
                ..FakeCloudState::default()
            }),
        }
    }
}

impl FakeCloud {
    /// Creates a cloud with empty catalogs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cloud offering `fra1`, an Ubuntu 22.04 image, one 1 GB size,
    /// and two SSH keys.
    #[must_use]
    pub fn with_default_catalog() -> Self {
        let cloud = Self::new();
        {
            let mut state = lock(&cloud.state);
            state.regions = vec![Region {
                slug: String::from("fra1"),
                name: String::from("Frankfurt 1"),
                available: true,
            }];
            state.images = vec![Image {
                id: 42,
                slug: Some(String::from("ubuntu-22-04-x64")),
                name: String::from("Ubuntu 22.04 (LTS) x64"),
            }];
            state.sizes = vec![Size {
                slug: String::from("s-1vcpu-1gb"),
                memory_mb: 1024,
                price_monthly: 6.0,
                regions: vec![String::from("fra1")],
                available: true,
            }];
            state.ssh_keys = vec![
                SshKey {
                    id: 11,
                    fingerprint: String::from("aa:bb"),
                    name: String::from("laptop"),
                },
                SshKey {
                    id: 12,
                    fingerprint: String::from("cc:dd"),
                    name: String::from("ci"),
                },
            ];
        }
        cloud
    }

    /// Replaces the size catalog.
    pub fn set_sizes(&self, sizes: Vec<Size>) {
        lock(&self.state).sizes = sizes;
    }

    /// Adds a droplet that already exists on the account.
    pub fn seed_droplet(&self, droplet: Droplet) {
        let mut state = lock(&self.state);
        state.next_id = state.next_id.max(droplet.id + 1);
        state.droplets.push(droplet);
    }

    /// Number of polls a create action stays in progress.
    pub fn set_action_polls(&self, polls: u32) {
        lock(&self.state).action_polls = polls;
    }

    /// Makes create actions end as errored.
    pub fn fail_actions(&self) {
        lock(&self.state).action_outcome = Some(ActionStatus::Errored);
    }

    /// Makes create actions stay in progress forever.
    pub fn stall_actions(&self) {
        lock(&self.state).action_outcome = None;
    }

    /// Makes every create call fail.
    pub fn fail_creates(&self) {
        lock(&self.state).fail_create = true;
    }

    /// Makes every destroy call fail.
    pub fn fail_destroys(&self) {
        lock(&self.state).fail_destroy = true;
    }

    /// Leaves completed droplets without a public address.
    pub fn withhold_addresses(&self) {
        lock(&self.state).withhold_address = true;
    }

    /// Number of accepted create calls.
    #[must_use]
    pub fn created_count(&self) -> usize {
        lock(&self.state).created.len()
    }

    /// Create requests received, in order.
    #[must_use]
    pub fn created_requests(&self) -> Vec<DropletRequest> {
        lock(&self.state).created.clone()
    }

    /// Ids passed to successful destroy calls, in order.
    #[must_use]
    pub fn destroyed_ids(&self) -> Vec<u64> {
        lock(&self.state).destroyed.clone()
    }

    /// Ids of droplets currently on the account.
    #[must_use]
    pub fn live_ids(&self) -> BTreeSet<u64> {
        lock(&self.state)
            .droplets
            .iter()
            .map(|droplet| droplet.id)
            .collect()
    }

    /// Highest number of droplets the account held at once.
    #[must_use]
    pub fn peak_live(&self) -> usize {
        lock(&self.state).peak_live
    }

    /// Ids of the catalog SSH keys.
    #[must_use]
    pub fn ssh_key_ids(&self) -> Vec<u64> {
        lock(&self.state).ssh_keys.iter().map(|key| key.id).collect()
    }

    fn ready<T: Send + 'static>(value: T) -> BackendFuture<'static, T, FakeCloudError> {
        Box::pin(std::future::ready(Ok(value)))
    }

    fn failed<T: Send + 'static>(message: String) -> BackendFuture<'static, T, FakeCloudError> {
        Box::pin(std::future::ready(Err(FakeCloudError(message))))
    }

    fn poll_action(&self, action_id: u64) -> Result<ActionStatus, FakeCloudError> {
        let mut state = lock(&self.state);
        let outcome = state.action_outcome;
        let withhold = state.withhold_address;
        let pending = state
            .actions
            .get_mut(&action_id)
            .ok_or_else(|| FakeCloudError(format!("action {action_id} not found")))?;
        if pending.remaining_polls > 0 {
            pending.remaining_polls -= 1;
            return Ok(ActionStatus::InProgress);
        }
        let droplet_id = pending.droplet_id;
        let status = outcome.unwrap_or(ActionStatus::InProgress);
        if status == ActionStatus::Completed
            && let Some(droplet) = state.droplets.iter_mut().find(|d| d.id == droplet_id)
        {
            droplet.stage = InstanceStage::Active;
            if !withhold {
                droplet.public_ip = Some(fake_address(droplet_id));
            }
        }
        Ok(status)
    }
}

impl CloudApi for FakeCloud {
    type Error = FakeCloudError;

    fn list_regions(&self) -> BackendFuture<'_, Vec<Region>, Self::Error> {
        Self::ready(lock(&self.state).regions.clone())
    }

    fn list_images(&self) -> BackendFuture<'_, Vec<Image>, Self::Error> {
        Self::ready(lock(&self.state).images.clone())
    }

    fn list_sizes(&self) -> BackendFuture<'_, Vec<Size>, Self::Error> {
        Self::ready(lock(&self.state).sizes.clone())
    }

    fn list_ssh_keys(&self) -> BackendFuture<'_, Vec<SshKey>, Self::Error> {
        Self::ready(lock(&self.state).ssh_keys.clone())
    }

    fn list_droplets(&self) -> BackendFuture<'_, Vec<Droplet>, Self::Error> {
        Self::ready(lock(&self.state).droplets.clone())
    }

    fn create_droplet<'a>(
        &'a self,
        request: &'a DropletRequest,
    ) -> BackendFuture<'a, CreatedDroplet, Self::Error> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Self::failed(String::from("create rejected"));
        }
        let id = state.next_id;
        state.next_id += 1;
        let action_id = id + 10_000;
        state.droplets.push(Droplet {
            id,
            name: request.name.clone(),
            region: request.region.clone(),
            image_id: Some(request.image),
            size: request.size.clone(),
            public_ip: None,
            stage: InstanceStage::Created,
        });
        state.peak_live = state.peak_live.max(state.droplets.len());
        let remaining_polls = state.action_polls;
        state.actions.insert(
            action_id,
            PendingAction {
                droplet_id: id,
                remaining_polls,
            },
        );
        state.created.push(request.clone());
        Self::ready(CreatedDroplet {
            id,
            action_ids: vec![action_id],
        })
    }

    fn get_action(&self, action_id: u64) -> BackendFuture<'_, ActionStatus, Self::Error> {
        Box::pin(std::future::ready(self.poll_action(action_id)))
    }

    fn get_droplet(&self, droplet_id: u64) -> BackendFuture<'_, Droplet, Self::Error> {
        let found = lock(&self.state)
            .droplets
            .iter()
            .find(|droplet| droplet.id == droplet_id)
            .cloned();
        found.map_or_else(
            || Self::failed(format!("droplet {droplet_id} not found")),
            Self::ready,
        )
    }

    fn destroy_droplet(&self, droplet_id: u64) -> BackendFuture<'_, (), Self::Error> {
        let mut state = lock(&self.state);
        if state.fail_destroy {
            return Self::failed(String::from("destroy rejected"));
        }
        state.droplets.retain(|droplet| droplet.id != droplet_id);
        state.destroyed.push(droplet_id);
        Self::ready(())
    }
}

/// Behaviour of one [`ScriptedProvision`] attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptScript {
    /// Produces a verified droplet after the delay unless cancelled first.
    Succeed(Duration),
    /// Fails setup after the delay.
    Fail(Duration),
    /// Runs until cancelled.
    Hang,
    /// Ignores cancellation for the whole delay, then succeeds unless the
    /// token fired meanwhile.
    Stubborn(Duration),
}

impl AttemptScript {
    /// Succeeds after `delay`.
    #[must_use]
    pub const fn succeed(delay: Duration) -> Self {
        Self::Succeed(delay)
    }

    /// Fails after `delay`.
    #[must_use]
    pub const fn fail(delay: Duration) -> Self {
        Self::Fail(delay)
    }
}

/// [`Provision`] double driven by a queue of [`AttemptScript`] steps.
///
/// Successful attempts insert their droplet into the shared registry the way
/// a real provisioner does; released droplets are removed again.
#[derive(Debug)]
pub struct ScriptedProvision {
    registry: Arc<InstanceRegistry>,
    script: Mutex<VecDeque<AttemptScript>>,
    fallback: AttemptScript,
    next_id: AtomicU64,
    started: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    released: Mutex<Vec<u64>>,
}

impl ScriptedProvision {
    /// Plays `script` in order, then hangs for any further attempt.
    #[must_use]
    pub fn new(script: Vec<AttemptScript>) -> Self {
        Self::build(script, AttemptScript::Hang)
    }

    /// Plays `step` for every attempt.
    #[must_use]
    pub fn repeating(step: AttemptScript) -> Self {
        Self::build(Vec::new(), step)
    }

    fn build(script: Vec<AttemptScript>, fallback: AttemptScript) -> Self {
        Self {
            registry: Arc::new(InstanceRegistry::new()),
            script: Mutex::new(script.into()),
            fallback,
            next_id: AtomicU64::new(1),
            started: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Registry shared with the coordinator.
    #[must_use]
    pub fn registry(&self) -> Arc<InstanceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Number of attempts started.
    #[must_use]
    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of attempts currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of attempts that ran at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Droplet ids released through [`Provision::release`].
    #[must_use]
    pub fn released(&self) -> Vec<u64> {
        lock(&self.released).clone()
    }

    async fn play(&self, step: AttemptScript, cancel: &CancellationToken) -> Result<Droplet, ProvisionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let delay = match step {
            AttemptScript::Succeed(delay) | AttemptScript::Fail(delay) => delay,
            AttemptScript::Hang => Duration::MAX,
            AttemptScript::Stubborn(delay) => {
                tokio::time::sleep(delay).await;
                if cancel.is_cancelled() {
                    return Err(ProvisionError::Cancelled { droplet_id: Some(id) });
                }
                Duration::ZERO
            }
        };
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled { droplet_id: Some(id) });
            }
            () = tokio::time::sleep(delay) => {}
        }

        match step {
            AttemptScript::Succeed(_) | AttemptScript::Stubborn(_) => {
                let mut droplet = droplet_record(id);
                droplet.stage = InstanceStage::Verified;
                self.registry.insert(droplet.clone());
                Ok(droplet)
            }
            AttemptScript::Fail(_) | AttemptScript::Hang => Err(ProvisionError::Stage {
                droplet_id: id,
                source: StageError::Setup(TransportError::from_status(
                    "scp",
                    Some(1),
                    String::from("simulated failure"),
                )),
            }),
        }
    }
}

impl Provision for ScriptedProvision {
    fn attempt<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BackendFuture<'a, Droplet, ProvisionError> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

            let step = lock(&self.script).pop_front().unwrap_or(self.fallback);
            let result = self.play(step, cancel).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn release<'a>(&'a self, droplet: &'a Droplet) -> BackendFuture<'a, bool, ProvisionError> {
        Box::pin(async move {
            let removed = self.registry.remove(droplet.id);
            if removed {
                lock(&self.released).push(droplet.id);
            }
            Ok(removed)
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// A `None` value removes the variable for the lifetime of the guard.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            apply_var(key, value.map(OsStr::new));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            apply_var(key, old.as_deref());
        }
    }
}

fn apply_var(key: &str, value: Option<&OsStr>) {
    // SAFETY: callers hold `ENV_LOCK`, so no other test mutates the
    // environment concurrently.
    unsafe {
        value.map_or_else(|| env::remove_var(key), |val| env::set_var(key, val));
    }
}
