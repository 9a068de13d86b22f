use crate::metrics::METRICS;
use crate::provider::MembershipProvider;
use crate::resolver::{RingResolver, ServiceResolver};
use crate::status::{DaemonStatus, StatusGuard};
use crate::{ChangedEventSender, Error, HostInfo, MembershipConfig, ROLE_KEY};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Process-wide membership facade.
///
/// Owns the provider handle and one [`RingResolver`] per tracked role. The
/// set of tracked roles is fixed at construction.
pub struct MembershipMonitor {
    service_name: String,
    provider: Arc<dyn MembershipProvider>,
    resolvers: HashMap<String, Arc<RingResolver>>,
    status: StatusGuard,
}

impl MembershipMonitor {
    pub fn new<I, S>(service_name: &str, tracked_roles: I, provider: Arc<dyn MembershipProvider>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolvers = tracked_roles
            .into_iter()
            .map(|role| {
                let role = role.as_ref().to_string();
                let resolver = Arc::new(RingResolver::new(&role, provider.clone()));
                (role, resolver)
            })
            .collect();

        Self {
            service_name: service_name.to_string(),
            provider,
            resolvers,
            status: StatusGuard::new(),
        }
    }

    pub fn from_config(config: &MembershipConfig, provider: Arc<dyn MembershipProvider>) -> Self {
        Self::new(&config.service_name, &config.tracked_roles, provider)
    }

    /// Start the provider, advertise this process's role, then start every
    /// resolver. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Any provider failure aborts startup and is returned unchanged. The
    /// process must not serve traffic without a correct role label.
    /// A failure before any resolver starts stops the provider again and
    /// leaves the monitor `Initialized`, so `start` can be retried. If a
    /// resolver fails, the ones already started are left running and
    /// `stop` tears them down.
    pub async fn start(&self) -> Result<(), Error> {
        if !self.status.try_start() {
            return Ok(());
        }

        if let Err(e) = self.advertise().await {
            self.provider.stop().await;
            self.status.abort_start();
            return Err(e);
        }

        for resolver in self.resolvers.values() {
            resolver.start().await?;
        }

        tracing::info!(
            service = %self.service_name,
            roles = self.resolvers.len(),
            "Membership monitor started"
        );
        Ok(())
    }

    async fn advertise(&self) -> Result<(), Error> {
        self.provider.start().await?;

        let labels = self.provider.labels().await.map_err(|e| {
            tracing::error!("Unable to get membership labels: {}", e);
            e
        })?;
        labels.set(ROLE_KEY, &self.service_name).await.map_err(|e| {
            tracing::error!("Unable to set membership labels: {}", e);
            e
        })
    }

    /// Stop every resolver, then the provider. No-op unless started.
    pub async fn stop(&self) {
        if !self.status.try_stop() {
            return;
        }

        for resolver in self.resolvers.values() {
            resolver.stop().await;
        }
        self.provider.stop().await;

        tracing::info!(service = %self.service_name, "Membership monitor stopped");
    }

    pub fn status(&self) -> DaemonStatus {
        self.status.get()
    }

    /// This process's address and current labels.
    pub async fn who_am_i(&self) -> Result<HostInfo, Error> {
        let address = self.provider.who_am_i().await?;
        let labels = self.provider.labels().await?.as_map().await?;
        Ok(HostInfo::new(address, labels))
    }

    /// Permanently remove this host from the membership view.
    ///
    /// Peers converge on the removal within the provider's propagation delay.
    /// Local resolvers drop this host immediately.
    pub async fn evict_self(&self) -> Result<(), Error> {
        self.provider.self_evict().await?;
        METRICS.inc_self_eviction();

        match self.provider.who_am_i().await {
            Ok(address) => {
                for resolver in self.resolvers.values() {
                    resolver.evict(&address);
                }
                tracing::info!(%address, "Evicted self from membership");
            }
            Err(e) => {
                tracing::warn!("Evicted self but could not resolve own address: {}", e);
            }
        }
        Ok(())
    }

    /// Evict self, wait `drain` for peers to redirect traffic, then stop.
    ///
    /// The monitor is stopped even if eviction fails; the eviction error is
    /// returned afterwards.
    pub async fn graceful_shutdown(&self, drain: Duration) -> Result<(), Error> {
        let evicted = self.evict_self().await;
        if let Err(e) = &evicted {
            tracing::warn!("Self-eviction failed during shutdown: {}", e);
        }
        tokio::time::sleep(drain).await;
        self.stop().await;

        tracing::debug!(drain_ms = drain.as_millis() as u64, "Shutdown complete");
        evicted
    }

    pub fn get_resolver(&self, role: &str) -> Result<Arc<dyn ServiceResolver>, Error> {
        let resolver: Arc<dyn ServiceResolver> = self.ring_resolver(role)?;
        Ok(resolver)
    }

    pub fn lookup(&self, role: &str, key: &str) -> Result<HostInfo, Error> {
        self.ring_resolver(role)?.lookup(key)
    }

    pub fn add_listener(&self, role: &str, name: &str, sink: ChangedEventSender) -> Result<(), Error> {
        self.ring_resolver(role)?.add_listener(name, sink)
    }

    pub fn remove_listener(&self, role: &str, name: &str) -> Result<(), Error> {
        self.ring_resolver(role)?.remove_listener(name)
    }

    pub fn get_member_count(&self, role: &str) -> Result<usize, Error> {
        Ok(self.ring_resolver(role)?.member_count())
    }

    /// Every reachable member address, across all roles.
    pub async fn get_reachable_members(&self) -> Result<Vec<String>, Error> {
        self.provider.reachable_members().await
    }

    fn ring_resolver(&self, role: &str) -> Result<Arc<RingResolver>, Error> {
        self.resolvers
            .get(role)
            .cloned()
            .ok_or_else(|| Error::RoleNotTracked(role.to_string()))
    }
}
