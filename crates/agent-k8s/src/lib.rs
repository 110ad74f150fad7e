//! The Kubernetes watch fabric, leader election, and secret-sync execution
//! for the fleet agent: everything in the workspace that actually talks to
//! the cluster API, built on top of [`kube`].

pub mod cluster_domain;
pub mod cluster_id;
pub mod group;
pub mod lease;
pub mod resources;
pub mod secret_sync;
pub mod watcher;

pub use group::WatcherGroup;
pub use lease::{LeaseLock, LeaseOutcome};
pub use watcher::{Watchable, Watcher};
