//! Cluster membership
//!
//! [`ClusterTracker`] registers the running server in the replicated
//! registry, settles a server number no other live server holds, keeps the
//! registration alive with a periodic heartbeat and removes it on shutdown.
//!
//! The registry offers no compare-and-set, so numbers are settled by
//! claiming, waiting for replication, and checking for competing claims.
//! Collisions are won by the earliest claim, then the smaller server id,
//! and lost claims are retried with bounded, jittered backoff.

use std::sync::Arc;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::identity::{IdentitySource, PlatformIdentity, ServerIdentity};
use super::numbering::{backoff_delay, collision_verdict, lowest_free_number, ClaimVerdict};
use super::tracking::{TrackingOutcome, UserTracker};
use super::unique_id::{ClusterUniqueId, UniqueIdGenerator};
use crate::clock::{Clock, SystemClock};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult, RegistryError};
use crate::registry::{Region, Registry};
use crate::transport::{TrackingRequest, TrackingResponse};
use crate::types::{ServerEntry, UserTrackingEntry};

/// Lifecycle of the local registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// Not registered yet
    Inactive,
    /// Settling a server number
    Registering,
    /// Registered with a settled number
    Ready { server_number: u32 },
    /// Registration removed; terminal
    Deactivated,
}

impl MembershipState {
    pub fn name(&self) -> &'static str {
        match self {
            MembershipState::Inactive => "inactive",
            MembershipState::Registering => "registering",
            MembershipState::Ready { .. } => "ready",
            MembershipState::Deactivated => "deactivated",
        }
    }
}

/// Membership, numbering, unique ids and user tracking for one server
#[derive(Debug)]
pub struct ClusterTracker {
    config: ClusterConfig,
    identity: ServerIdentity,
    servers: Region<ServerEntry>,
    users: UserTracker,
    clock: Arc<dyn Clock>,
    state: RwLock<MembershipState>,
    settled: RwLock<Option<Settled>>,
}

/// Claim that survived verification and the id generator bound to it
#[derive(Debug)]
struct Settled {
    claim: ServerEntry,
    ids: Arc<UniqueIdGenerator>,
}

impl Settled {
    fn new(claim: ServerEntry, clock: &Arc<dyn Clock>) -> ClusterResult<Self> {
        let ids = UniqueIdGenerator::new(claim.server_number, Arc::clone(clock))?;
        Ok(Self { claim, ids: Arc::new(ids) })
    }
}

impl ClusterTracker {
    /// Tracker using the platform identity and the system clock
    pub fn new(registry: Arc<dyn Registry>, config: ClusterConfig) -> ClusterResult<Self> {
        Self::with_parts(registry, config, &PlatformIdentity, Arc::new(SystemClock))
    }

    /// Tracker with an explicit identity source and clock
    pub fn with_parts(
        registry: Arc<dyn Registry>,
        config: ClusterConfig,
        identity: &dyn IdentitySource,
        clock: Arc<dyn Clock>,
    ) -> ClusterResult<Self> {
        config.validate()?;
        let identity = ServerIdentity::identify(identity)?;
        let servers = Region::new(Arc::clone(&registry), config.server_region.clone());
        let users = UserTracker::new(
            Region::<UserTrackingEntry>::new(registry, config.tracking_region.clone()),
            identity.clone(),
            Arc::clone(&clock),
            &config,
        );

        Ok(Self {
            config,
            identity,
            servers,
            users,
            clock,
            state: RwLock::new(MembershipState::Inactive),
            settled: RwLock::new(None),
        })
    }

    /// Register in the cluster and settle a unique server number.
    ///
    /// Blocks for at least one settle delay. Fails when the number cannot be
    /// settled within the configured attempts; the tracker then returns to
    /// `Inactive`.
    pub async fn activate(&self) -> ClusterResult<u32> {
        {
            let mut state = self.state.write();
            if *state != MembershipState::Inactive {
                return Err(ClusterError::InvalidState {
                    expected: MembershipState::Inactive.name(),
                    found: state.name(),
                });
            }
            *state = MembershipState::Registering;
        }
        info!(server_id = %self.identity, "registering server in cluster");

        let settled = self
            .settle(MembershipState::Registering.name())
            .await
            .and_then(|claim| Settled::new(claim, &self.clock));

        let settled = match settled {
            Ok(settled) => settled,
            Err(e) => {
                error!(server_id = %self.identity, error = %e, "server registration failed");
                self.withdraw_claim().await;
                self.set_state_if(MembershipState::Registering, MembershipState::Inactive);
                return Err(e);
            }
        };

        // Deactivation may have raced the settling loop.
        let number = settled.claim.server_number;
        let interrupted = {
            let mut state = self.state.write();
            if *state == MembershipState::Registering {
                *state = MembershipState::Ready { server_number: number };
                *self.settled.write() = Some(settled);
                None
            } else {
                Some(state.name())
            }
        };
        if let Some(found) = interrupted {
            self.withdraw_claim().await;
            return Err(ClusterError::InvalidState {
                expected: MembershipState::Registering.name(),
                found,
            });
        }
        info!(server_id = %self.identity, server_number = number, "server registered");
        Ok(number)
    }

    /// Refresh the registration so the registry does not expire it.
    ///
    /// Failures are logged and otherwise ignored; the settled number is kept.
    /// If an earlier claim turns out to hold the same number, the number is
    /// settled again and ids are issued from the new one. Until then ids
    /// keep the old number.
    pub async fn heartbeat(&self) {
        let claim = match self.current_claim() {
            Some(claim) if self.is_ready() => claim,
            _ => return,
        };
        let number = claim.server_number;

        match self.servers.put(self.identity.as_str(), &claim).await {
            Ok(Some(_)) => debug!(server_id = %self.identity, server_number = number, "registration refreshed"),
            Ok(None) => warn!(
                server_id = %self.identity,
                server_number = number,
                "registration disappeared, re-registered"
            ),
            Err(e) => {
                warn!(server_id = %self.identity, error = %e, "heartbeat failed");
                return;
            }
        }

        if !self.is_ready() {
            // Deactivated while the refresh was in flight.
            self.withdraw_claim().await;
            return;
        }

        match self.servers.list().await {
            Ok(live) => {
                if collision_verdict(&claim, &live) == ClaimVerdict::Lost {
                    self.renumber(claim).await;
                }
            }
            Err(e) => warn!(server_id = %self.identity, error = %e, "heartbeat collision check failed"),
        }
    }

    /// Run [`heartbeat`](Self::heartbeat) on the configured interval until
    /// the handle is stopped or the tracker is deactivated.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> HeartbeatHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tracker = Arc::clone(self);
        let period = self.config.heartbeat_interval();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if tracker.state() == MembershipState::Deactivated {
                            break;
                        }
                        tracker.heartbeat().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(server_id = %tracker.identity, "heartbeat stopped");
        });

        HeartbeatHandle { shutdown, task }
    }

    /// Remove the registration. No further heartbeats are sent.
    pub async fn deactivate(&self) -> ClusterResult<()> {
        let previous = std::mem::replace(&mut *self.state.write(), MembershipState::Deactivated);
        *self.settled.write() = None;
        if previous == MembershipState::Deactivated {
            return Ok(());
        }

        self.servers.remove(self.identity.as_str()).await?;
        info!(server_id = %self.identity, "server deregistered");
        Ok(())
    }

    /// Registrations currently visible in the registry
    pub async fn all_servers(&self) -> ClusterResult<Vec<ServerEntry>> {
        Ok(self.servers.list().await?)
    }

    /// Identity of this server
    pub fn current_server_id(&self) -> &str {
        self.identity.as_str()
    }

    /// Settled server number
    pub fn server_number(&self) -> ClusterResult<u32> {
        match self.state() {
            MembershipState::Ready { server_number } => Ok(server_number),
            _ => Err(ClusterError::NotReady),
        }
    }

    pub fn state(&self) -> MembershipState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), MembershipState::Ready { .. })
    }

    /// Next cluster-wide unique id
    pub fn cluster_unique_id(&self) -> ClusterResult<ClusterUniqueId> {
        let generator = self
            .settled
            .read()
            .as_ref()
            .map(|settled| Arc::clone(&settled.ids))
            .ok_or(ClusterError::NotReady)?;
        Ok(generator.next_id())
    }

    /// Track the user behind a request, see [`UserTracker::track_user`]
    pub async fn track_user<Q, S>(&self, request: &Q, response: &mut S) -> TrackingOutcome
    where
        Q: TrackingRequest + ?Sized,
        S: TrackingResponse + ?Sized,
    {
        self.users.track_user(request, response).await
    }

    /// User last seen with `token`, see [`UserTracker::get_user`]
    pub async fn get_user(&self, token: &str) -> Option<UserTrackingEntry> {
        self.users.get_user(token).await
    }

    fn current_claim(&self) -> Option<ServerEntry> {
        self.settled.read().as_ref().map(|settled| settled.claim.clone())
    }

    /// Claim and verify numbers until one sticks or attempts run out.
    ///
    /// Stops with `InvalidState` once the tracker leaves `Registering` or
    /// `Ready`, so a deactivated tracker writes no further claims.
    async fn settle(&self, expected: &'static str) -> ClusterResult<ServerEntry> {
        let max_attempts = self.config.max_settle_attempts;
        let mut rng = StdRng::from_entropy();
        let mut last_error: Option<RegistryError> = None;

        for attempt in 1..=max_attempts {
            self.ensure_settling(expected)?;
            match self.claim_round(expected).await {
                Ok(Some(claim)) => return Ok(claim),
                Ok(None) => {
                    debug!(server_id = %self.identity, attempt, "lost server number collision");
                    last_error = None;
                }
                Err(ClusterError::Registry(e)) => {
                    warn!(server_id = %self.identity, attempt, error = %e, "registry error while settling");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                let delay = backoff_delay(attempt, self.config.backoff_base(), self.config.backoff_max(), &mut rng);
                tokio::time::sleep(delay).await;
            }
        }

        Err(match last_error {
            Some(e) => ClusterError::Registry(e),
            None => ClusterError::SettleExhausted { attempts: max_attempts },
        })
    }

    /// One claim/verify round; `None` when the claim lost a collision
    async fn claim_round(&self, expected: &'static str) -> ClusterResult<Option<ServerEntry>> {
        let own_id = self.identity.as_str();

        let live = self.servers.list().await?;
        let candidate = lowest_free_number(own_id, &live);
        let claim = ServerEntry::new(own_id, candidate, self.clock.now());
        self.servers.put(own_id, &claim).await?;

        tokio::time::sleep(self.config.settle_delay()).await;
        self.ensure_settling(expected)?;

        let live = self.servers.list().await?;
        match collision_verdict(&claim, &live) {
            ClaimVerdict::Unique | ClaimVerdict::WonTieBreak => Ok(Some(claim)),
            ClaimVerdict::Lost => Ok(None),
        }
    }

    fn ensure_settling(&self, expected: &'static str) -> ClusterResult<()> {
        match self.state() {
            MembershipState::Registering | MembershipState::Ready { .. } => Ok(()),
            other => Err(ClusterError::InvalidState {
                expected,
                found: other.name(),
            }),
        }
    }

    /// Settle a new number after `old` lost a collision.
    ///
    /// The registry must end up advertising the number the tracker issues ids
    /// from: the new claim on success, the old one when settling fails, and
    /// nothing once the tracker was deactivated meanwhile.
    async fn renumber(&self, old: ServerEntry) {
        warn!(
            server_id = %self.identity,
            server_number = old.server_number,
            "server number collision, settling again"
        );

        let settled = self
            .settle(MembershipState::Ready { server_number: old.server_number }.name())
            .await
            .and_then(|claim| Settled::new(claim, &self.clock));

        match settled {
            Ok(settled) => {
                let number = settled.claim.server_number;
                let installed = {
                    let mut state = self.state.write();
                    if matches!(*state, MembershipState::Ready { .. }) {
                        *state = MembershipState::Ready { server_number: number };
                        *self.settled.write() = Some(settled);
                        true
                    } else {
                        false
                    }
                };
                if installed {
                    info!(server_id = %self.identity, old = old.server_number, server_number = number, "server renumbered");
                } else {
                    self.withdraw_claim().await;
                }
            }
            Err(e) if self.is_ready() => {
                warn!(
                    server_id = %self.identity,
                    error = %e,
                    server_number = old.server_number,
                    "renumbering failed, restoring previous registration"
                );
                self.restore_claim(&old).await;
            }
            Err(e) => {
                debug!(server_id = %self.identity, error = %e, "renumbering interrupted");
                self.withdraw_claim().await;
            }
        }
    }

    async fn restore_claim(&self, claim: &ServerEntry) {
        if let Err(e) = self.servers.put(self.identity.as_str(), claim).await {
            warn!(server_id = %self.identity, error = %e, "failed to restore registration");
            return;
        }
        if !self.is_ready() {
            self.withdraw_claim().await;
        }
    }

    async fn withdraw_claim(&self) {
        if let Err(e) = self.servers.remove(self.identity.as_str()).await {
            warn!(server_id = %self.identity, error = %e, "failed to withdraw registration");
        }
    }

    fn set_state_if(&self, expected: MembershipState, next: MembershipState) {
        let mut state = self.state.write();
        if *state == expected {
            *state = next;
        }
    }
}

/// Running heartbeat task
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat and wait for the task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
