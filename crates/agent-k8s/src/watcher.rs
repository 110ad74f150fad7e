//! A single-resource, single-namespace long-lived observer: list once,
//! then stream watch events into a name-indexed cache, coalescing
//! notifications for subscribers behind one `Notify`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams, WatchEvent};
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Everything this module needs out of a watched Kubernetes type. Blanket
/// implemented for every typed `k8s-openapi` resource `kube` knows how to
/// list and watch, and for `DynamicObject` (the argo watchers' dynamic
/// type carries its own `ApiResource`, not `()`, which is why this bound
/// doesn't pin `DynamicType`).
pub trait Watchable: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static {}

impl<T> Watchable for T where
    T: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static
{
}

type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;
type OnPermanentError = Arc<dyn Fn(&kube::Error) + Send + Sync>;

/// The cache key: `(namespace, name)`. Cluster-scoped resources use the
/// empty string for namespace.
type CacheKey = (String, String);

/// A single-resource, single-namespace watcher. Cheap to construct; does
/// nothing until [`Watcher::start`] is called.
pub struct Watcher<T: Watchable> {
    api: Api<T>,
    list_params: ListParams,
    cache: Mutex<HashMap<CacheKey, T>>,
    notify: Arc<Notify>,
    equals: Option<EqualsFn<T>>,
    on_permanent_error: Option<OnPermanentError>,
    handle: Mutex<Option<JoinHandle<()>>>,
    forbidden: AtomicBool,
}

fn key_of<T: Watchable>(obj: &T) -> CacheKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl<T: Watchable> Watcher<T> {
    pub fn new(api: Api<T>, list_params: ListParams) -> Self {
        Self::with_notify(api, list_params, Arc::new(Notify::new()))
    }

    /// Builds a watcher sharing an externally owned `Notify`, so several
    /// watchers can wake a single subscriber — this is how [`super::group::WatcherGroup`]
    /// fans several namespaces' watchers into one subscription channel.
    pub fn with_notify(api: Api<T>, list_params: ListParams, notify: Arc<Notify>) -> Self {
        Watcher {
            api,
            list_params,
            cache: Mutex::new(HashMap::new()),
            notify,
            equals: None,
            on_permanent_error: None,
            handle: Mutex::new(None),
            forbidden: AtomicBool::new(false),
        }
    }

    /// Installs a deduplication predicate: a change that compares equal to
    /// the previous value under this predicate does not wake subscribers.
    pub fn with_equals(mut self, equals: EqualsFn<T>) -> Self {
        self.equals = Some(equals);
        self
    }

    /// Installs a callback invoked once, the first time the watcher
    /// encounters a permanent (forbidden) error, so the caller can degrade
    /// gracefully (e.g. skip leader election) instead of polling `List`.
    pub fn on_permanent_error(mut self, cb: OnPermanentError) -> Self {
        self.on_permanent_error = Some(cb);
        self
    }

    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Whether the watcher is inert after hitting a permanent error.
    pub fn is_forbidden(&self) -> bool {
        self.forbidden.load(Ordering::SeqCst)
    }

    /// A snapshot of the current cache, in unspecified order.
    pub fn list(&self) -> Vec<T> {
        self.cache.lock().values().cloned().collect()
    }

    /// Begins listing then watching. Idempotent and non-blocking: calling
    /// this twice on an already-started watcher is a no-op.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken)
    where
        T: Send + Sync,
    {
        let mut handle_slot = self.handle.lock();
        if handle_slot.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *handle_slot = Some(tokio::spawn(async move {
            this.run(cancel).await;
        }));
    }

    /// Stops the underlying stream.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.list_and_watch(&cancel).await {
                Ok(()) => {
                    // The watch stream ended cleanly (e.g. a bookmark-only
                    // timeout); relist immediately, no backoff.
                    backoff = INITIAL_BACKOFF;
                }
                Err(err) if is_permanent(&err) => {
                    warn!(error = %err, "watcher hit a permanent error, going inert");
                    self.forbidden.store(true, Ordering::SeqCst);
                    if let Some(cb) = &self.on_permanent_error {
                        cb(&err);
                    }
                    return;
                }
                Err(err) => {
                    warn!(error = %err, backoff_secs = backoff.as_secs(), "watch stream error, retrying");
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff + jitter) => {}
                        _ = cancel.cancelled() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn list_and_watch(&self, cancel: &CancellationToken) -> Result<(), kube::Error> {
        let list = self.api.list(&self.list_params).await?;
        {
            let mut cache = self.cache.lock();
            cache.clear();
            for item in &list.items {
                cache.insert(key_of(item), item.clone());
            }
        }
        self.notify.notify_waiters();

        let resource_version = list
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default();
        let watch_params = self.list_params.clone();
        let mut stream = self.api.watch(&watch_params, &resource_version).await?.boxed();

        loop {
            tokio::select! {
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => self.apply(event),
                        Some(Err(err)) => return Err(err),
                        None => return Ok(()),
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    fn apply(&self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = key_of(&obj);
                let changed = {
                    let mut cache = self.cache.lock();
                    let previous = cache.insert(key, obj.clone());
                    match (&previous, &self.equals) {
                        (Some(prev), Some(equals)) => !equals(prev, &obj),
                        _ => true,
                    }
                };
                if changed {
                    self.notify.notify_waiters();
                }
            }
            WatchEvent::Deleted(obj) => {
                self.cache.lock().remove(&key_of(&obj));
                self.notify.notify_waiters();
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(err) => {
                debug!(?err, "watch stream reported an inline error event");
            }
        }
    }
}

fn is_permanent(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Api(resp) if resp.code == 403 || resp.reason == "Forbidden"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_response_is_permanent() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "nope".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(is_permanent(&err));
    }

    #[test]
    fn not_found_is_not_permanent() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "nope".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(!is_permanent(&err));
    }
}
