use crate::{ChangedEvent, Error, HostInfo};
use siphasher::sip::SipHasher24;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Virtual positions per host.
pub const REPLICA_POINTS: usize = 150;

/// Immutable consistent-hash ring over one role's members.
///
/// Provides:
/// - Deterministic key→host lookups (same member set ⇒ same ring)
/// - Minimal remapping on membership change (~1/N of keys move)
/// - Uniform load distribution through `REPLICA_POINTS` virtual positions per host
///
/// A ring is never mutated after it is built. Membership changes build a new
/// ring which is then published in place of the old one.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    positions: BTreeMap<u64, String>,
    members: BTreeMap<String, HostInfo>,
}

impl HashRing {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a ring from a set of hosts.
    ///
    /// Hosts are deduplicated by address; if the same address appears twice
    /// the later entry wins. Arrival order does not affect positions.
    pub fn build<I>(hosts: I) -> Self
    where
        I: IntoIterator<Item = HostInfo>,
    {
        let members: BTreeMap<String, HostInfo> = hosts
            .into_iter()
            .map(|host| (host.identity().to_string(), host))
            .collect();

        let mut positions = BTreeMap::new();
        for address in members.keys() {
            for replica in 0..REPLICA_POINTS {
                let point = Self::hash_key(&format!("{}:{}", address, replica));
                // Two hosts landing on the same point: smallest address keeps it.
                let taken = positions
                    .get(&point)
                    .is_some_and(|owner: &String| owner <= address);
                if !taken {
                    positions.insert(point, address.clone());
                }
            }
        }

        Self { positions, members }
    }

    /// Find the host owning `key`: the first position at or after the key's
    /// hash, wrapping around to the start of the ring.
    pub fn lookup(&self, key: &str) -> Result<&HostInfo, Error> {
        if self.members.is_empty() {
            return Err(Error::InsufficientHosts);
        }

        let hash = Self::hash_key(key);
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .and_then(|(_, address)| self.members.get(address))
            .ok_or(Error::InsufficientHosts)
    }

    /// Copy of the member set, ordered by address.
    pub fn members(&self) -> Vec<HostInfo> {
        self.members.values().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.members.contains_key(address)
    }

    /// Number of occupied virtual positions.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn iter_members(&self) -> impl Iterator<Item = &HostInfo> {
        self.members.values()
    }

    /// Delta that turns this ring's member set into `next`'s.
    pub fn diff(&self, next: &HashRing) -> ChangedEvent {
        ChangedEvent::diff(self.members.values(), next.members.values())
    }

    #[inline]
    fn hash_key(key: &str) -> u64 {
        let mut hasher = SipHasher24::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}
