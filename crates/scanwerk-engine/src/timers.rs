// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Timer registry: the single owner of every delayed callback the engine arms.
//
// Each timer is a spawned task that waits for its delay or for the session's
// cancellation token, whichever comes first. A firing timer removes its own
// entry before running the callback, so callbacks may freely schedule or
// cancel other timers. `cancel_all` signals the token, aborts every task and
// leaves the registry closed until the next session rearms it.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use scanwerk_core::error::{Result, ScanError};

/// Opaque identifier of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct RegistryState {
    next_id: u64,
    timers: HashMap<TimerHandle, JoinHandle<()>>,
    token: CancellationToken,
    /// Set by `cancel_all`; cleared by `rearm`.
    closed: bool,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 0,
            timers: HashMap::new(),
            token: CancellationToken::new(),
            closed: false,
        }
    }
}

/// Tracks outstanding timers for one engine instance.
///
/// Cheap to clone; all clones share the same handle set. Must be used from
/// within a tokio runtime.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `callback` once `delay` after this call, unless cancelled first.
    ///
    /// After `cancel_all` and before the next `rearm`, the returned handle is
    /// inert and the callback is dropped without running.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        state.next_id += 1;
        let handle = TimerHandle(state.next_id);

        if state.closed || state.token.is_cancelled() {
            debug!(?handle, "registry is cancelled; timer not armed");
            return handle;
        }

        let deadline = Instant::now() + delay;
        let token = state.token.clone();
        let registry = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            if !claim(&registry, handle) {
                return;
            }
            trace!(?handle, "timer fired");
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!(?handle, "timer callback panicked; continuing");
            }
        });

        // Held lock guarantees the task cannot claim itself before it is tracked.
        state.timers.insert(handle, task);
        handle
    }

    /// Cancel one timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        match self.lock().timers.remove(&handle) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked timer and signal the session token.
    ///
    /// Idempotent, and safe to call from inside a firing callback.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.token.cancel();
        let count = state.timers.len();
        for (_, task) in state.timers.drain() {
            task.abort();
        }
        if count > 0 {
            debug!(count, "cancelled outstanding timers");
        }
        count
    }

    /// Open the registry for a new session and return its cancellation token.
    pub fn rearm(&self) -> CancellationToken {
        let mut state = self.lock();
        for (_, task) in state.timers.drain() {
            task.abort();
        }
        state.token = CancellationToken::new();
        state.closed = false;
        state.token.clone()
    }

    /// The current session's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.lock().token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        let state = self.lock();
        state.closed || state.token.is_cancelled()
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn active_count(&self) -> usize {
        self.lock().timers.len()
    }

    /// A future that completes after `delay`, tracked like any other timer.
    ///
    /// Resolves to `Err(ScanError::Cancelled)` if the registry is cancelled
    /// first. Dropping it cancels the underlying timer.
    pub fn sleep(&self, delay: Duration) -> TimerSleep {
        let (tx, rx) = oneshot::channel();
        let handle = self.schedule(delay, move || {
            let _ = tx.send(());
        });
        TimerSleep {
            registry: self.clone(),
            handle,
            rx,
        }
    }
}

/// Remove a firing timer from the registry. Only the caller that removes the
/// entry may run the callback.
fn claim(registry: &Weak<Mutex<RegistryState>>, handle: TimerHandle) -> bool {
    let Some(inner) = registry.upgrade() else {
        return false;
    };
    let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if state.token.is_cancelled() {
        return false;
    }
    state.timers.remove(&handle).is_some()
}

/// Future returned by [`TimerRegistry::sleep`].
pub struct TimerSleep {
    registry: TimerRegistry,
    handle: TimerHandle,
    rx: oneshot::Receiver<()>,
}

impl TimerSleep {
    pub fn handle(&self) -> TimerHandle {
        self.handle
    }
}

impl Future for TimerSleep {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|fired| fired.map_err(|_| ScanError::Cancelled))
    }
}

impl Drop for TimerSleep {
    fn drop(&mut self) {
        self.registry.cancel(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let hits = Arc::new(AtomicU32::new(0));
        let for_cb = Arc::clone(&hits);
        let make = move || {
            let hits = Arc::clone(&for_cb);
            Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (hits, make)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        registry.schedule(Duration::from_millis(100), make());
        assert_eq!(registry.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_from_schedule_not_first_poll() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        let t0 = Instant::now();
        registry.schedule(Duration::from_millis(100), make());

        // Clock moves before the timer task has had a chance to run.
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::time::sleep_until(t0 + Duration::from_millis(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_everything() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        for ms in [10, 50, 100] {
            registry.schedule(Duration::from_millis(ms), make());
        }
        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.cancel_all(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_after_cancel_is_inert_until_rearm() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        registry.cancel_all();

        registry.schedule(Duration::from_millis(10), make());
        assert_eq!(registry.active_count(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let token = registry.rearm();
        assert!(!token.is_cancelled());
        registry.schedule(Duration::from_millis(10), make());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_may_cancel_from_within() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        let inner = registry.clone();
        registry.schedule(Duration::from_millis(10), move || {
            inner.cancel_all();
        });
        registry.schedule(Duration::from_millis(20), make());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_handle_never_fires() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        let handle = registry.schedule(Duration::from_millis(10), make());
        assert!(registry.cancel(handle));
        assert!(!registry.cancel(handle));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_is_contained() {
        let registry = TimerRegistry::new();
        let (hits, make) = counter();
        registry.schedule(Duration::from_millis(10), || panic!("boom"));
        registry.schedule(Duration::from_millis(20), make());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_resolves_and_untracks() {
        let registry = TimerRegistry::new();
        let start = tokio::time::Instant::now();
        registry.sleep(Duration::from_millis(40)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(40));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_reports_cancellation() {
        let registry = TimerRegistry::new();
        let sleeper = registry.sleep(Duration::from_secs(5));
        let canceller = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel_all();
        });
        assert!(matches!(sleeper.await, Err(ScanError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sleep_is_untracked() {
        let registry = TimerRegistry::new();
        let sleeper = registry.sleep(Duration::from_secs(5));
        assert_eq!(registry.active_count(), 1);
        drop(sleeper);
        assert_eq!(registry.active_count(), 0);
    }
}
