use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The role's ring has no members. Retry after backoff.
    #[error("Not enough hosts to serve the request")]
    InsufficientHosts,

    #[error("Role {0:?} is not tracked by the membership monitor")]
    RoleNotTracked(String),

    #[error("Listener {name:?} is already registered for role {role:?}")]
    ListenerNameConflict { role: String, name: String },

    #[error("Listener {name:?} is not registered for role {role:?}")]
    ListenerNotFound { role: String, name: String },

    /// Error reported by the membership provider, passed through unchanged.
    #[error("Membership provider error: {0}")]
    Provider(String),

    #[error("Malformed membership delta: {0}")]
    MalformedDelta(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the caller may retry the same call later and expect it to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientHosts | Self::Provider(_))
    }
}
