use crate::listeners::ListenerRegistry;
use crate::metrics::METRICS;
use crate::provider::{MembershipDelta, MembershipProvider, SubscriptionId};
use crate::status::StatusGuard;
use crate::{ChangedEventSender, Error, HashRing, HostInfo};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Routing and change notification for one role.
pub trait ServiceResolver: Send + Sync {
    fn role(&self) -> &str;

    /// Host currently responsible for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientHosts`] when the role has no members.
    fn lookup(&self, key: &str) -> Result<HostInfo, Error>;

    fn members(&self) -> Vec<HostInfo>;

    fn member_count(&self) -> usize;

    /// Register `sink` under `name`. Only changes after registration are delivered.
    fn add_listener(&self, name: &str, sink: ChangedEventSender) -> Result<(), Error>;

    fn remove_listener(&self, name: &str) -> Result<(), Error>;
}

/// Ring, listeners and local exclusions shared with the background task.
struct RingState {
    role: String,
    ring: ArcSwap<HashRing>,
    listeners: ListenerRegistry,
    /// Serializes ring writers. Holds addresses excluded by local eviction.
    writer: Mutex<HashSet<String>>,
}

impl RingState {
    /// Publish the initial ring. No event is emitted for it.
    fn install(&self, hosts: Vec<HostInfo>) {
        let excluded = self.writer.lock();
        let ring = HashRing::build(
            hosts
                .into_iter()
                .filter(|h| h.has_role(&self.role) && !excluded.contains(h.address())),
        );
        tracing::debug!(role = %self.role, count = ring.member_count(), "Initial hashring built");
        self.ring.store(Arc::new(ring));
    }

    /// Fold `deltas` into the current member set and publish the result.
    ///
    /// Malformed deltas are skipped individually; the rest of the batch is
    /// still applied. Returns the number of deltas rejected.
    fn apply(&self, deltas: &[MembershipDelta]) -> usize {
        let excluded = self.writer.lock();
        let current = self.ring.load_full();
        let mut members: BTreeMap<String, HostInfo> = current
            .iter_members()
            .map(|h| (h.identity().to_string(), h.clone()))
            .collect();

        let mut rejected = 0;
        for delta in deltas {
            if let Err(e) = validate(delta) {
                rejected += 1;
                METRICS.inc_delta_rejected();
                tracing::error!(role = %self.role, "Rejected membership delta: {}", e);
                continue;
            }
            for address in &delta.removed {
                members.remove(address);
            }
            for host in delta.added.iter().chain(&delta.updated) {
                if host.has_role(&self.role) && !excluded.contains(host.address()) {
                    members.insert(host.identity().to_string(), host.clone());
                } else {
                    members.remove(host.address());
                }
            }
        }

        if rejected < deltas.len() {
            self.publish(&current, HashRing::build(members.into_values()));
        }
        rejected
    }

    /// Drop `address` from this and every future ring.
    fn exclude(&self, address: &str) {
        let mut excluded = self.writer.lock();
        if !excluded.insert(address.to_string()) {
            return;
        }
        let current = self.ring.load_full();
        if current.contains(address) {
            let next = HashRing::build(current.members().into_iter().filter(|h| h.address() != address));
            self.publish(&current, next);
        }
    }

    /// Swap in `next` and notify listeners. Caller holds the writer lock.
    fn publish(&self, current: &HashRing, next: HashRing) {
        let event = current.diff(&next);
        if event.is_empty() {
            tracing::trace!(role = %self.role, count = next.member_count(), "No membership changes");
            return;
        }

        tracing::debug!(
            role = %self.role,
            count = next.member_count(),
            added = event.hosts_added.len(),
            updated = event.hosts_updated.len(),
            removed = event.hosts_removed.len(),
            "Membership changed, hashring updated"
        );
        self.ring.store(Arc::new(next));
        METRICS.inc_ring_rebuild();
        self.listeners.notify(event);
    }
}

fn validate(delta: &MembershipDelta) -> Result<(), Error> {
    if delta
        .added
        .iter()
        .chain(&delta.updated)
        .any(|h| h.address().is_empty())
    {
        return Err(Error::MalformedDelta("host with empty address".into()));
    }
    if delta.removed.iter().any(String::is_empty) {
        return Err(Error::MalformedDelta("removal of empty address".into()));
    }
    Ok(())
}

/// Consistent-hash resolver for one role, fed by a provider subscription.
///
/// Lookups read the current ring through an atomic pointer and never wait on
/// ring maintenance.
pub struct RingResolver {
    state: Arc<RingState>,
    provider: Arc<dyn MembershipProvider>,
    status: StatusGuard,
    cancel_token: CancellationToken,
    task: Mutex<Option<(SubscriptionId, tokio::task::JoinHandle<()>)>>,
}

impl RingResolver {
    pub fn new(role: &str, provider: Arc<dyn MembershipProvider>) -> Self {
        Self {
            state: Arc::new(RingState {
                role: role.to_string(),
                ring: ArcSwap::from_pointee(HashRing::empty()),
                listeners: ListenerRegistry::new(role),
                writer: Mutex::new(HashSet::new()),
            }),
            provider,
            status: StatusGuard::new(),
            cancel_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Subscribe to the role and build the initial ring before returning.
    ///
    /// Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the subscription fails.
    pub async fn start(&self) -> Result<(), Error> {
        if !self.status.try_start() {
            return Ok(());
        }

        let subscription = self.provider.subscribe(&self.state.role).await?;
        self.state.install(subscription.initial);

        let handle = Self::spawn_update_task(
            self.state.clone(),
            subscription.updates,
            self.cancel_token.clone(),
        );
        *self.task.lock() = Some((subscription.id, handle));

        tracing::info!(
            role = %self.state.role,
            count = self.member_count(),
            "Service resolver started"
        );
        Ok(())
    }

    /// Unsubscribe, release listeners and drop the ring.
    pub async fn stop(&self) {
        if !self.status.try_stop() {
            return;
        }

        self.cancel_token.cancel();
        let task = self.task.lock().take();
        if let Some((id, handle)) = task {
            let _ = handle.await;
            self.provider.unsubscribe(id).await;
        }

        self.state.listeners.clear();
        {
            // Under the writer lock so a concurrent evict cannot republish.
            let _writer = self.state.writer.lock();
            self.state.ring.store(Arc::new(HashRing::empty()));
        }
        tracing::info!(role = %self.state.role, "Service resolver stopped");
    }

    /// Exclude `address` from this role's ring for the rest of the process.
    pub fn evict(&self, address: &str) {
        self.state.exclude(address);
    }

    /// Current ring snapshot.
    pub fn snapshot(&self) -> Arc<HashRing> {
        self.state.ring.load_full()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.len()
    }

    fn spawn_update_task(
        state: Arc<RingState>,
        mut updates: mpsc::UnboundedReceiver<MembershipDelta>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::debug!(role = %state.role, "Resolver update task shutting down");
                        break;
                    }

                    delta = updates.recv() => {
                        let Some(delta) = delta else {
                            tracing::warn!(role = %state.role, "Membership subscription closed");
                            break;
                        };

                        // Coalesce whatever else is already queued into one rebuild.
                        let mut batch = vec![delta];
                        while let Ok(more) = updates.try_recv() {
                            batch.push(more);
                        }

                        let rejected = state.apply(&batch);
                        if rejected > 0 {
                            tracing::warn!(
                                role = %state.role,
                                deltas = batch.len(),
                                rejected,
                                "Membership batch applied with rejected deltas"
                            );
                        }
                    }
                }
            }
        })
    }
}

impl ServiceResolver for RingResolver {
    fn role(&self) -> &str {
        &self.state.role
    }

    fn lookup(&self, key: &str) -> Result<HostInfo, Error> {
        match self.state.ring.load().lookup(key) {
            Ok(host) => Ok(host.clone()),
            Err(e) => {
                METRICS.inc_insufficient_hosts();
                tracing::debug!(role = %self.state.role, key, "Lookup failed: {}", e);
                Err(e)
            }
        }
    }

    fn members(&self) -> Vec<HostInfo> {
        self.state.ring.load().members()
    }

    fn member_count(&self) -> usize {
        self.state.ring.load().member_count()
    }

    fn add_listener(&self, name: &str, sink: ChangedEventSender) -> Result<(), Error> {
        self.state.listeners.add(name, sink)
    }

    fn remove_listener(&self, name: &str) -> Result<(), Error> {
        self.state.listeners.remove(name)
    }
}
