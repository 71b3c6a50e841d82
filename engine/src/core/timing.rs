//! High-resolution timing utilities for task engines.
//!
//! Engine operations never read the clock themselves; the hosting shell calls
//! [`now`] and passes the stamp in. That keeps every state transition
//! replayable from recorded timestamps in tests.

/// Milliseconds on the platform's monotonic-ish clock.
///
/// On the web this is `performance.now()`; natively it is elapsed time since
/// the first call in this process. Only differences between stamps are
/// meaningful.
pub type InstantStamp = f64;

#[cfg(target_arch = "wasm32")]
pub fn now() -> InstantStamp {
    web_sys::window()
        .and_then(|window| window.performance())
        .map(|perf| perf.now())
        .unwrap_or(0.0)
}

#[cfg(not(target_arch = "wasm32"))]
pub fn now() -> InstantStamp {
    use once_cell::sync::Lazy;
    use std::time::Instant;

    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
    EPOCH.elapsed().as_secs_f64() * 1_000.0
}

/// Sleep for `ms` milliseconds on the current task.
#[cfg(target_arch = "wasm32")]
pub async fn sleep_ms(ms: u64) {
    gloo_timers::future::TimeoutFuture::new(ms as u32).await;
}

#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
