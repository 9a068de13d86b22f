use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Label key under which every member advertises the role it serves.
pub const ROLE_KEY: &str = "role";

/// Metadata gossiped alongside a member's address.
pub type Labels = BTreeMap<String, String>;

/// One cluster member as seen through the membership provider.
///
/// Identity is the address alone: two `HostInfo` values with the same address
/// compare equal even when their labels differ. A label change is an update of
/// the same host, never a different host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    address: String,
    labels: Labels,
}

impl HostInfo {
    pub fn new(address: impl Into<String>, labels: Labels) -> Self {
        Self {
            address: address.into(),
            labels,
        }
    }

    /// Convenience constructor for a host carrying only a role label.
    pub fn with_role(address: impl Into<String>, role: &str) -> Self {
        let mut labels = Labels::new();
        labels.insert(ROLE_KEY.to_string(), role.to_string());
        Self::new(address, labels)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Key used when placing this host on a hash ring.
    pub fn identity(&self) -> &str {
        &self.address
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.label(ROLE_KEY)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role() == Some(role)
    }

    /// True when `other` is the same host carrying different metadata.
    pub fn labels_differ(&self, other: &HostInfo) -> bool {
        self.labels != other.labels
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for HostInfo {}

impl Hash for HostInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
