use crate::host::Labels;
use crate::provider::{LabelStore, MembershipDelta, MembershipProvider, Subscription, SubscriptionId};
use crate::{Error, HostInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process membership provider.
///
/// Keeps a member table that the embedding process feeds (from static
/// configuration, a service registry, or a test) and fans role-filtered
/// deltas out to subscribers. The local host joins the table on `start` and
/// leaves it permanently on `self_evict`.
pub struct LocalProvider {
    state: Arc<Mutex<LocalState>>,
}

struct Subscriber {
    role: String,
    tx: mpsc::UnboundedSender<MembershipDelta>,
}

struct LocalState {
    self_address: String,
    self_labels: Labels,
    started: bool,
    evicted: bool,
    members: BTreeMap<String, HostInfo>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
}

/// A single member transition: `(before, after)`.
type Change = (Option<HostInfo>, Option<HostInfo>);

impl LocalState {
    fn self_host(&self) -> HostInfo {
        HostInfo::new(self.self_address.clone(), self.self_labels.clone())
    }

    fn upsert(&mut self, host: HostInfo, changes: &mut Vec<Change>) {
        if host.address() == self.self_address && self.evicted {
            tracing::warn!(address = %host.address(), "Ignoring re-join of evicted local host");
            return;
        }
        let previous = self.members.insert(host.address().to_string(), host.clone());
        if let Some(ref old) = previous {
            if !old.labels_differ(&host) {
                return;
            }
        }
        changes.push((previous, Some(host)));
    }

    fn remove(&mut self, address: &str, changes: &mut Vec<Change>) {
        if let Some(old) = self.members.remove(address) {
            changes.push((Some(old), None));
        }
    }

    /// Send each subscriber the part of `changes` visible through its role.
    fn publish(&mut self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }

        let mut closed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            let delta = role_delta(&subscriber.role, changes);
            if delta.is_empty() {
                continue;
            }
            if subscriber.tx.send(delta).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            tracing::debug!(subscription = id, "Pruning closed subscription");
            self.subscribers.remove(&id);
        }
    }
}

fn role_delta(role: &str, changes: &[Change]) -> MembershipDelta {
    let mut delta = MembershipDelta::default();
    for (before, after) in changes {
        let was_member = before.as_ref().is_some_and(|h| h.has_role(role));
        let is_member = after.as_ref().is_some_and(|h| h.has_role(role));
        match (before, after, was_member, is_member) {
            (_, Some(host), false, true) => delta.added.push(host.clone()),
            (_, Some(host), true, true) => delta.updated.push(host.clone()),
            (Some(host), _, true, false) => delta.removed.push(host.address().to_string()),
            _ => {}
        }
    }
    delta
}

impl LocalProvider {
    pub fn new(self_address: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                self_address: self_address.into(),
                self_labels: Labels::new(),
                started: false,
                evicted: false,
                members: BTreeMap::new(),
                subscribers: HashMap::new(),
                next_subscription: 0,
            })),
        }
    }

    /// Add a member or replace its labels.
    pub fn upsert_member(&self, host: HostInfo) {
        self.update_members(vec![host], Vec::new());
    }

    pub fn remove_member(&self, address: &str) {
        self.update_members(Vec::new(), vec![address.to_string()]);
    }

    /// Apply upserts and removals as one batch; each subscriber receives at
    /// most one delta for it.
    pub fn update_members(&self, upserts: Vec<HostInfo>, removals: Vec<String>) {
        let mut state = self.state.lock();
        let mut changes = Vec::new();
        for host in upserts {
            state.upsert(host, &mut changes);
        }
        for address in removals {
            state.remove(&address, &mut changes);
        }
        state.publish(&changes);
    }

    pub fn is_evicted(&self) -> bool {
        self.state.lock().evicted
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

#[async_trait]
impl MembershipProvider for LocalProvider {
    async fn start(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.started {
            return Ok(());
        }
        state.started = true;
        if !state.evicted {
            let mut changes = Vec::new();
            let host = state.self_host();
            state.upsert(host, &mut changes);
            state.publish(&changes);
        }
        tracing::info!(address = %state.self_address, "Local membership provider started");
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock();
        if !state.started {
            return;
        }
        state.started = false;
        // Dropping the senders ends every subscriber's update stream.
        state.subscribers.clear();
        tracing::info!(address = %state.self_address, "Local membership provider stopped");
    }

    async fn who_am_i(&self) -> Result<String, Error> {
        Ok(self.state.lock().self_address.clone())
    }

    async fn labels(&self) -> Result<Arc<dyn LabelStore>, Error> {
        Ok(Arc::new(LocalLabels {
            state: self.state.clone(),
        }))
    }

    async fn self_evict(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.evicted {
            return Ok(());
        }
        state.evicted = true;
        let address = state.self_address.clone();
        let mut changes = Vec::new();
        state.remove(&address, &mut changes);
        state.publish(&changes);
        tracing::info!(%address, "Local host evicted from membership");
        Ok(())
    }

    async fn reachable_members(&self) -> Result<Vec<String>, Error> {
        let state = self.state.lock();
        if !state.started {
            return Err(Error::provider("membership provider is not started"));
        }
        Ok(state.members.keys().cloned().collect())
    }

    async fn subscribe(&self, role: &str) -> Result<Subscription, Error> {
        let mut state = self.state.lock();
        let (tx, updates) = mpsc::unbounded_channel();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                role: role.to_string(),
                tx,
            },
        );

        let initial = state
            .members
            .values()
            .filter(|h| h.has_role(role))
            .cloned()
            .collect();
        tracing::debug!(role, subscription = id, "Subscribed to role membership");

        Ok(Subscription {
            id: SubscriptionId(id),
            initial,
            updates,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscribers.remove(&id.0);
    }
}

/// Labels of the local host; setting one re-gossips the host as updated.
struct LocalLabels {
    state: Arc<Mutex<LocalState>>,
}

#[async_trait]
impl LabelStore for LocalLabels {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.state.lock().self_labels.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.self_labels.insert(key.to_string(), value.to_string());

        let address = state.self_address.clone();
        if state.members.contains_key(&address) {
            let mut changes = Vec::new();
            let host = state.self_host();
            state.upsert(host, &mut changes);
            state.publish(&changes);
        }
        Ok(())
    }

    async fn as_map(&self) -> Result<Labels, Error> {
        Ok(self.state.lock().self_labels.clone())
    }
}
