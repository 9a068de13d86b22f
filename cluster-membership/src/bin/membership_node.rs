//! Standalone membership node.
//!
//! Starts a monitor over a [`LocalProvider`] seeded from `MEMBERSHIP_PEERS`
//! (comma separated `address=role` pairs), logs every ring change, and on
//! Ctrl-C evicts itself, drains, and stops.
//!
//!   MEMBERSHIP_SERVICE=history MEMBERSHIP_TRACKED_ROLES=history,matching \
//!   MEMBERSHIP_PEERS=10.0.0.2:7933=history cargo run -p cluster-membership

use cluster_membership::metrics::METRICS;
use cluster_membership::{HostInfo, LocalProvider, MembershipConfig, MembershipMonitor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let is_production = std::env::var("NODE_ENV").unwrap_or_default() == "production";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn parse_peers(raw: &str) -> Vec<HostInfo> {
    raw.split(',')
        .filter_map(|entry| {
            let (address, role) = entry.trim().rsplit_once('=')?;
            Some(HostInfo::with_role(address.trim(), role.trim()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = MembershipConfig::from_env()?;
    let provider = Arc::new(LocalProvider::new(config.listen_address.clone()));
    for peer in parse_peers(&std::env::var("MEMBERSHIP_PEERS").unwrap_or_default()) {
        provider.upsert_member(peer);
    }

    let monitor = MembershipMonitor::from_config(&config, provider.clone());
    monitor.start().await?;

    let me = monitor.who_am_i().await?;
    tracing::info!(address = %me.address(), role = ?me.role(), "Node is up");

    for role in &config.tracked_roles {
        let (tx, mut rx) = mpsc::channel(64);
        monitor.add_listener(role, "membership-node-log", tx)?;
        let members = monitor.get_member_count(role)?;
        tracing::info!(%role, members, "Tracking role");

        let role = role.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!(
                    %role,
                    added = event.hosts_added.len(),
                    updated = event.hosts_updated.len(),
                    removed = event.hosts_removed.len(),
                    "Ring changed"
                );
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(drain_secs = config.drain_interval.as_secs(), "Shutting down");
    monitor.graceful_shutdown(config.drain_interval).await?;

    tracing::debug!("{}", METRICS.to_prometheus());
    Ok(())
}
