//! Time sources.
//!
//! Indirecting "what time is it" through a trait object lets tests substitute
//! a fake clock without threading a generic parameter through every
//! function that needs a timestamp.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

/// The number of milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// A source of the current time, boxed so it can be swapped out in tests.
pub type NowFn = Arc<dyn Fn() -> EpochMillis + Send + Sync>;

/// The real wall-clock time source, shared by every binary in the workspace.
pub static SYSTEM_TIME: Lazy<NowFn> = Lazy::new(|| Arc::new(now_system_time));

fn now_system_time() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis()
        .try_into()
        .expect("current time overflows u64 milliseconds")
}

/// A fixed time source for deterministic tests.
pub fn fixed(millis: EpochMillis) -> NowFn {
    Arc::new(move || millis)
}
