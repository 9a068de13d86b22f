use crate::HostInfo;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sink a listener registers to receive membership changes for one role.
///
/// Delivery never waits: when the channel is full the event is dropped for
/// that listener and counted in [`crate::metrics::METRICS`].
pub type ChangedEventSender = mpsc::Sender<Arc<ChangedEvent>>;

/// Exact delta between two consecutive ring snapshots of one role.
///
/// Hosts in each list are ordered by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedEvent {
    pub hosts_added: Vec<HostInfo>,
    pub hosts_updated: Vec<HostInfo>,
    pub hosts_removed: Vec<HostInfo>,
}

impl ChangedEvent {
    /// Compute the delta between two member sets, keyed by address.
    ///
    /// Hosts present in both sets are reported as updated only when their
    /// labels differ. Updated hosts carry the new labels; removed hosts carry
    /// the last labels observed.
    pub fn diff<'a, O, N>(old: O, new: N) -> Self
    where
        O: IntoIterator<Item = &'a HostInfo>,
        N: IntoIterator<Item = &'a HostInfo>,
    {
        let old: BTreeMap<&str, &HostInfo> = old.into_iter().map(|h| (h.address(), h)).collect();
        let new: BTreeMap<&str, &HostInfo> = new.into_iter().map(|h| (h.address(), h)).collect();

        let mut event = Self::default();
        for (address, host) in &new {
            match old.get(address) {
                None => event.hosts_added.push((*host).clone()),
                Some(previous) if previous.labels_differ(host) => {
                    event.hosts_updated.push((*host).clone())
                }
                Some(_) => {}
            }
        }
        for (address, host) in &old {
            if !new.contains_key(address) {
                event.hosts_removed.push((*host).clone());
            }
        }
        event
    }

    pub fn is_empty(&self) -> bool {
        self.hosts_added.is_empty() && self.hosts_updated.is_empty() && self.hosts_removed.is_empty()
    }
}
