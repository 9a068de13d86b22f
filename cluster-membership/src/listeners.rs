use crate::metrics::METRICS;
use crate::{ChangedEvent, ChangedEventSender, Error};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

/// Named listener sinks for one role.
///
/// The lock guards registration only; sends happen after it is released.
pub(crate) struct ListenerRegistry {
    role: String,
    sinks: Mutex<HashMap<String, ChangedEventSender>>,
}

impl ListenerRegistry {
    pub(crate) fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add(&self, name: &str, sink: ChangedEventSender) -> Result<(), Error> {
        let mut sinks = self.sinks.lock();
        if sinks.contains_key(name) {
            return Err(Error::ListenerNameConflict {
                role: self.role.clone(),
                name: name.to_string(),
            });
        }
        sinks.insert(name.to_string(), sink);
        tracing::debug!(role = %self.role, listener = name, "Listener added");
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Result<(), Error> {
        if self.sinks.lock().remove(name).is_none() {
            return Err(Error::ListenerNotFound {
                role: self.role.clone(),
                name: name.to_string(),
            });
        }
        tracing::debug!(role = %self.role, listener = name, "Listener removed");
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.sinks.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Offer `event` to every listener without waiting on any of them.
    ///
    /// Returns how many listeners accepted the event.
    pub(crate) fn notify(&self, event: ChangedEvent) -> usize {
        let targets: Vec<(String, ChangedEventSender)> = self
            .sinks
            .lock()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.clone()))
            .collect();

        let event = Arc::new(event);
        let mut delivered = 0;
        for (name, sink) in targets {
            match sink.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    METRICS.inc_event_delivered();
                }
                Err(TrySendError::Full(_)) => {
                    METRICS.inc_event_dropped();
                    tracing::warn!(
                        role = %self.role,
                        listener = %name,
                        "Listener channel full, dropping membership change event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    METRICS.inc_event_dropped();
                    tracing::warn!(
                        role = %self.role,
                        listener = %name,
                        "Listener channel closed, dropping membership change event"
                    );
                }
            }
        }
        delivered
    }
}
