use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a daemon: `Initialized → Started → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DaemonStatus {
    Initialized = 0,
    Started = 1,
    Stopped = 2,
}

impl DaemonStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initialized,
            1 => Self::Started,
            _ => Self::Stopped,
        }
    }
}

/// Compare-and-swap guard making `start`/`stop` idempotent.
#[derive(Debug)]
pub struct StatusGuard {
    status: AtomicU8,
}

impl StatusGuard {
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(DaemonStatus::Initialized as u8),
        }
    }

    pub fn get(&self) -> DaemonStatus {
        DaemonStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move `Initialized → Started`. Returns false if already started or stopped.
    pub fn try_start(&self) -> bool {
        self.transition(DaemonStatus::Initialized, DaemonStatus::Started)
    }

    /// Move `Started → Stopped`. Returns false if never started or already stopped.
    pub fn try_stop(&self) -> bool {
        self.transition(DaemonStatus::Started, DaemonStatus::Stopped)
    }

    /// Move `Started → Initialized` after a start that failed before doing
    /// any work that `stop` would need to undo.
    pub fn abort_start(&self) -> bool {
        self.transition(DaemonStatus::Started, DaemonStatus::Initialized)
    }

    fn transition(&self, from: DaemonStatus, to: DaemonStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StatusGuard {
    fn default() -> Self {
        Self::new()
    }
}
