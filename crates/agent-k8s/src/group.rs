//! Fan-in of several [`Watcher`]s — typically one per watched namespace —
//! behind a single subscription channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::watcher::{Watchable, Watcher};

pub struct WatcherGroup<T: Watchable> {
    notify: Arc<Notify>,
    members: Vec<Arc<Watcher<T>>>,
    started: AtomicBool,
}

impl<T: Watchable> WatcherGroup<T> {
    pub fn new() -> Self {
        WatcherGroup {
            notify: Arc::new(Notify::new()),
            members: Vec::new(),
            started: AtomicBool::new(false),
        }
    }

    /// The shared notification handle every member wakes on a change.
    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Adds a watcher to the group. Rejected once the group has started,
    /// since a watcher added afterwards would never receive `start`.
    pub fn add_watcher(&mut self, watcher: Watcher<T>) -> anyhow::Result<()> {
        if self.started.load(Ordering::SeqCst) {
            anyhow::bail!("cannot add a watcher to a group that has already started");
        }
        self.members.push(Arc::new(watcher));
        Ok(())
    }

    /// Starts every member watcher, sharing this group's notification
    /// handle rather than each member's own.
    pub fn start(&self, cancel: CancellationToken) {
        self.started.store(true, Ordering::SeqCst);
        for member in &self.members {
            member.start(cancel.clone());
        }
    }

    pub fn cancel(&self) {
        for member in &self.members {
            member.cancel();
        }
    }

    /// Concatenates the current cache of every member, in unspecified
    /// order.
    pub fn list(&self) -> Vec<T> {
        self.members.iter().flat_map(|m| m.list()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<T: Watchable> Default for WatcherGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a watcher that shares `group`'s notification handle, the
/// constructor every call site should use in preference to
/// [`Watcher::new`] when the watcher is destined for a group.
pub fn member_watcher<T: Watchable>(
    group: &WatcherGroup<T>,
    api: kube::Api<T>,
    list_params: kube::api::ListParams,
) -> Watcher<T> {
    Watcher::with_notify(api, list_params, group.notify())
}
