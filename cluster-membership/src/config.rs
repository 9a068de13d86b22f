use crate::Error;
use std::env;
use std::time::Duration;

const DEFAULT_DRAIN_SECS: u64 = 5;
const DEFAULT_ADDRESS: &str = "127.0.0.1:7933";

/// Membership settings for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    /// Role this process serves; advertised under [`crate::ROLE_KEY`].
    pub service_name: String,
    /// Roles whose rings this process maintains. Always includes `service_name`.
    pub tracked_roles: Vec<String>,
    /// Time between self-eviction and stopping, so peers can redirect traffic.
    pub drain_interval: Duration,
    /// Address this process is reachable at.
    pub listen_address: String,
}

impl MembershipConfig {
    pub fn new(service_name: impl Into<String>, tracked_roles: &[&str]) -> Self {
        let service_name = service_name.into();
        let mut roles: Vec<String> = tracked_roles.iter().map(|r| r.to_string()).collect();
        if !roles.contains(&service_name) {
            roles.push(service_name.clone());
        }
        Self {
            service_name,
            tracked_roles: roles,
            drain_interval: Duration::from_secs(DEFAULT_DRAIN_SECS),
            listen_address: DEFAULT_ADDRESS.to_string(),
        }
    }

    /// Read settings from the environment.
    ///
    /// - `MEMBERSHIP_SERVICE` (required)
    /// - `MEMBERSHIP_TRACKED_ROLES`: comma separated, defaults to the service
    /// - `MEMBERSHIP_DRAIN_SECS`: defaults to 5
    /// - `MEMBERSHIP_ADDRESS`: defaults to `127.0.0.1:7933`
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name = lookup("MEMBERSHIP_SERVICE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("MEMBERSHIP_SERVICE is required"))?;

        let roles_var = lookup("MEMBERSHIP_TRACKED_ROLES").unwrap_or_default();
        let roles: Vec<&str> = roles_var
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect();

        let mut config = Self::new(service_name, &roles);

        if let Some(secs) = lookup("MEMBERSHIP_DRAIN_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("MEMBERSHIP_DRAIN_SECS must be an integer, got {:?}", secs))
            })?;
            config.drain_interval = Duration::from_secs(secs);
        }

        if let Some(address) = lookup("MEMBERSHIP_ADDRESS").filter(|a| !a.trim().is_empty()) {
            config.listen_address = address.trim().to_string();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_service_name_is_required() {
        let err = MembershipConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = MembershipConfig::from_lookup(lookup_from(&[("MEMBERSHIP_SERVICE", "  ")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config =
            MembershipConfig::from_lookup(lookup_from(&[("MEMBERSHIP_SERVICE", "history")]))
                .unwrap();
        assert_eq!(config.service_name, "history");
        assert_eq!(config.tracked_roles, vec!["history".to_string()]);
        assert_eq!(config.drain_interval, Duration::from_secs(5));
        assert_eq!(config.listen_address, "127.0.0.1:7933");
    }

    #[test]
    fn test_tracked_roles_include_service() {
        let config = MembershipConfig::from_lookup(lookup_from(&[
            ("MEMBERSHIP_SERVICE", "frontend"),
            ("MEMBERSHIP_TRACKED_ROLES", "history, matching,,"),
            ("MEMBERSHIP_DRAIN_SECS", "30"),
            ("MEMBERSHIP_ADDRESS", "10.0.0.7:7933"),
        ]))
        .unwrap();
        assert_eq!(
            config.tracked_roles,
            vec!["history".to_string(), "matching".to_string(), "frontend".to_string()]
        );
        assert_eq!(config.drain_interval, Duration::from_secs(30));
        assert_eq!(config.listen_address, "10.0.0.7:7933");
    }

    #[test]
    fn test_invalid_drain_interval() {
        let err = MembershipConfig::from_lookup(lookup_from(&[
            ("MEMBERSHIP_SERVICE", "history"),
            ("MEMBERSHIP_DRAIN_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
