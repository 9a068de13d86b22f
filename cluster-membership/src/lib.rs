//! Role-scoped cluster membership with consistent-hash request routing.
//!
//! This crate provides:
//! - A membership monitor tracking which instances are alive for each role
//! - Consistent hashing with virtual nodes (minimal remapping on churn)
//! - Lock-free lookups against immutable, atomically swapped ring snapshots
//! - Exact added/updated/removed change events fanned out to named listeners
//! - Graceful self-eviction for draining a host before shutdown
//!
//! Discovery and failure detection live behind [`MembershipProvider`].
//! [`LocalProvider`] is an in-process implementation fed by the embedder.
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_membership::{LocalProvider, MembershipMonitor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(LocalProvider::new("10.0.0.1:7933"));
//!     let monitor = MembershipMonitor::new("history", ["history", "matching"], provider);
//!
//!     // Start - labels this host with its role, builds every ring
//!     monitor.start().await?;
//!
//!     // Route a shard to the history host that owns it
//!     let owner = monitor.lookup("history", "shard-42")?;
//!     println!("shard-42 is owned by {}", owner.address());
//!
//!     // Graceful shutdown - leave the ring, let peers redirect, then stop
//!     monitor.graceful_shutdown(std::time::Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery semantics
//!
//! - Listeners see events for one role in ring order, starting from registration
//! - Deltas queued while a rebuild runs are coalesced into one event
//! - A full listener channel drops that event for that listener only; the drop
//!   is logged and counted in [`metrics::METRICS`]

mod config;
mod error;
mod event;
mod host;
mod listeners;
mod local;
pub mod metrics;
mod monitor;
mod provider;
mod resolver;
mod ring;
mod status;

pub use config::MembershipConfig;
pub use error::Error;
pub use event::{ChangedEvent, ChangedEventSender};
pub use host::{HostInfo, Labels, ROLE_KEY};
pub use local::LocalProvider;
pub use monitor::MembershipMonitor;
pub use provider::{LabelStore, MembershipDelta, MembershipProvider, Subscription, SubscriptionId};
pub use resolver::{RingResolver, ServiceResolver};
pub use ring::{HashRing, REPLICA_POINTS};
pub use status::{DaemonStatus, StatusGuard};
