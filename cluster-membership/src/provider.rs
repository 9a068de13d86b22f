use crate::host::Labels;
use crate::{Error, HostInfo};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle identifying one role subscription with a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Raw batch of membership changes for one role, as pushed by a provider.
///
/// Updated hosts are those whose labels changed. Removed hosts are identified
/// by address only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: Vec<HostInfo>,
    pub updated: Vec<HostInfo>,
    pub removed: Vec<String>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Result of subscribing to a role: the members at subscription time plus
/// the stream of changes that follow.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub initial: Vec<HostInfo>,
    pub updates: mpsc::UnboundedReceiver<MembershipDelta>,
}

/// Key-value metadata attached to the local host and gossiped to peers.
#[async_trait]
pub trait LabelStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    async fn as_map(&self) -> Result<Labels, Error>;
}

/// Source of raw cluster liveness: discovery, failure detection and
/// dissemination all happen behind this trait.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn start(&self) -> Result<(), Error>;

    async fn stop(&self);

    /// Network identity of this process.
    async fn who_am_i(&self) -> Result<String, Error>;

    async fn labels(&self) -> Result<Arc<dyn LabelStore>, Error>;

    /// Permanently remove this host from the membership view.
    async fn self_evict(&self) -> Result<(), Error>;

    /// Addresses of every reachable member, regardless of role.
    async fn reachable_members(&self) -> Result<Vec<String>, Error>;

    /// Subscribe to members carrying `role` under [`crate::ROLE_KEY`].
    async fn subscribe(&self, role: &str) -> Result<Subscription, Error>;

    async fn unsubscribe(&self, id: SubscriptionId);
}
