//! Multi-instance simulation tests for cluster-membership.
//!
//! Each simulated process owns a `LocalProvider`; the test plays the gossip
//! layer by pushing every node's identity into every provider.

use cluster_membership::{ChangedEvent, HostInfo, LocalProvider, MembershipMonitor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Node {
    address: String,
    provider: Arc<LocalProvider>,
    monitor: MembershipMonitor,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cluster_membership=debug")
        .with_test_writer()
        .try_init();
}

async fn start_node(address: &str, role: &str, tracked: &[&str]) -> Node {
    let provider = Arc::new(LocalProvider::new(address));
    let monitor = MembershipMonitor::new(role, tracked.iter().copied(), provider.clone());
    monitor.start().await.unwrap();
    Node {
        address: address.to_string(),
        provider,
        monitor,
    }
}

/// Make every node's provider aware of every other node.
fn gossip(nodes: &[Node], roles: &HashMap<&str, &str>) {
    for node in nodes {
        for peer in nodes {
            if peer.address != node.address {
                node.provider
                    .upsert_member(HostInfo::with_role(&peer.address, roles[peer.address.as_str()]));
            }
        }
    }
}

async fn wait_for_count(monitor: &MembershipMonitor, role: &str, expected: usize) {
    for _ in 0..100 {
        if monitor.get_member_count(role).unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} members for {}, got {}",
        expected,
        role,
        monitor.get_member_count(role).unwrap()
    );
}

async fn next_event(rx: &mut mpsc::Receiver<Arc<ChangedEvent>>) -> Arc<ChangedEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timeout waiting for change event")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_all_nodes_agree_on_owner() {
    init_tracing();
    let addresses = ["10.0.0.1:7933", "10.0.0.2:7933", "10.0.0.3:7933"];
    let roles: HashMap<&str, &str> = addresses.iter().map(|a| (*a, "history")).collect();

    let mut nodes = Vec::new();
    for address in addresses {
        nodes.push(start_node(address, "history", &["history"]).await);
    }
    gossip(&nodes, &roles);
    for node in &nodes {
        wait_for_count(&node.monitor, "history", 3).await;
    }

    let mut owned: HashMap<String, usize> = HashMap::new();
    for i in 0..300 {
        let key = format!("shard-{}", i);
        let owner = nodes[0].monitor.lookup("history", &key).unwrap();
        for node in &nodes[1..] {
            assert_eq!(node.monitor.lookup("history", &key).unwrap(), owner);
        }
        *owned.entry(owner.address().to_string()).or_default() += 1;
    }

    assert_eq!(owned.len(), 3, "every node should own some shards");
    for (address, count) in &owned {
        assert!(
            (40..=180).contains(count),
            "{} owns {} of 300 shards",
            address,
            count
        );
    }

    for node in nodes {
        node.monitor.stop().await;
    }
}

#[tokio::test]
async fn test_scale_down_gracefully() {
    init_tracing();
    let addresses = ["10.0.0.1:7933", "10.0.0.2:7933", "10.0.0.3:7933"];
    let roles: HashMap<&str, &str> = addresses.iter().map(|a| (*a, "history")).collect();

    let mut nodes = Vec::new();
    for address in addresses {
        nodes.push(start_node(address, "history", &["history"]).await);
    }
    gossip(&nodes, &roles);
    for node in &nodes {
        wait_for_count(&node.monitor, "history", 3).await;
    }

    let before: Vec<HostInfo> = (0..200)
        .map(|i| nodes[0].monitor.lookup("history", &format!("shard-{}", i)).unwrap())
        .collect();

    let (tx, mut rx) = mpsc::channel(8);
    nodes[0]
        .monitor
        .add_listener("history", "shard-controller", tx)
        .unwrap();

    // Node 2 leaves; its peers learn about it through their providers.
    let leaving = nodes.remove(1);
    leaving.monitor.evict_self().await.unwrap();
    for node in &nodes {
        node.provider.remove_member(&leaving.address);
    }

    // The listener may still observe the tail of the join phase.
    let mut event = next_event(&mut rx).await;
    while event.hosts_removed.is_empty() {
        event = next_event(&mut rx).await;
    }
    assert!(event.hosts_added.is_empty());
    assert!(event.hosts_updated.is_empty());
    assert_eq!(event.hosts_removed.len(), 1);
    assert_eq!(event.hosts_removed[0].address(), leaving.address);

    for node in &nodes {
        wait_for_count(&node.monitor, "history", 2).await;
    }

    for (i, previous_owner) in before.iter().enumerate() {
        let key = format!("shard-{}", i);
        let owner = nodes[0].monitor.lookup("history", &key).unwrap();
        assert_eq!(owner, nodes[1].monitor.lookup("history", &key).unwrap());
        if previous_owner.address() == leaving.address {
            assert_ne!(owner.address(), leaving.address);
        } else {
            assert_eq!(&owner, previous_owner, "shard {} moved needlessly", key);
        }
    }

    leaving.monitor.stop().await;
    for node in nodes {
        node.monitor.stop().await;
    }
}

#[tokio::test]
async fn test_roles_are_routed_independently() {
    init_tracing();
    let tracked = ["history", "matching"];
    let roles: HashMap<&str, &str> = [
        ("10.0.0.1:7933", "history"),
        ("10.0.0.2:7933", "history"),
        ("10.0.0.3:7933", "matching"),
    ]
    .into_iter()
    .collect();

    let nodes = vec![
        start_node("10.0.0.1:7933", "history", &tracked).await,
        start_node("10.0.0.2:7933", "history", &tracked).await,
        start_node("10.0.0.3:7933", "matching", &tracked).await,
    ];
    gossip(&nodes, &roles);

    for node in &nodes {
        wait_for_count(&node.monitor, "history", 2).await;
        wait_for_count(&node.monitor, "matching", 1).await;
    }

    for i in 0..50 {
        let owner = nodes[2]
            .monitor
            .lookup("matching", &format!("tasklist-{}", i))
            .unwrap();
        assert_eq!(owner.address(), "10.0.0.3:7933");
        let owner = nodes[2]
            .monitor
            .lookup("history", &format!("shard-{}", i))
            .unwrap();
        assert!(owner.has_role("history"));
    }

    let reachable = nodes[0].monitor.get_reachable_members().await.unwrap();
    assert_eq!(reachable.len(), 3);

    for node in nodes {
        node.monitor.stop().await;
    }
}

#[tokio::test]
async fn test_member_count_matches_members_through_churn() {
    init_tracing();
    let node = start_node("10.0.0.1:7933", "frontend", &["frontend", "history"]).await;
    let resolver = node.monitor.get_resolver("history").unwrap();
    assert_eq!(resolver.member_count(), 0);
    assert_eq!(resolver.members().len(), 0);

    let (tx, mut rx) = mpsc::channel(64);
    resolver.add_listener("churn", tx).unwrap();

    for i in 0..10 {
        node.provider
            .upsert_member(HostInfo::with_role(format!("10.0.1.{}:7933", i), "history"));
        next_event(&mut rx).await;
        assert_eq!(resolver.member_count(), resolver.members().len());
    }
    for i in 0..10 {
        node.provider.remove_member(&format!("10.0.1.{}:7933", i));
        next_event(&mut rx).await;
        assert_eq!(resolver.member_count(), resolver.members().len());
    }

    assert_eq!(resolver.member_count(), 0);
    assert!(resolver.lookup("anything").is_err());

    node.monitor.stop().await;
}
