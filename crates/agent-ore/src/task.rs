//! Named task spawning.
//!
//! Plain `tokio::spawn` gives every task the same blank name in a panic
//! backtrace or a `tokio-console` dump. Routing every spawn through here
//! costs nothing and means an operator can tell which long-running loop
//! died.

use std::future::Future;

use tokio::task::JoinHandle;

/// Spawns `future` as a new task, tagged with a human-readable name produced
/// by `name` (a closure so the name can be formatted lazily, only if it's
/// ever actually inspected).
pub fn spawn<Fut, F, S>(name: F, future: Fut) -> JoinHandle<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
    F: FnOnce() -> S,
    S: Into<String>,
{
    let name = name().into();
    let span = tracing::info_span!("task", name = %name);
    tokio::spawn(tracing::Instrument::instrument(future, span))
}
