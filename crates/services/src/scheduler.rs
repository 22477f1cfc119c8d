//! Cancellable delayed actions, at most one pending per owner.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    /// Id of the pending action, zero when idle.
    armed: u64,
    issued: u64,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one delayed action at a time.
///
/// Arming a new action cancels the pending one, so a rapid second completion
/// can never advance twice. Actions run while the slot lock is held: an
/// action must not arm or cancel on the scheduler that runs it.
///
/// Delayed actions run on the tokio runtime, so `arm` with a non-zero delay
/// must be called from within one.
#[derive(Debug, Default)]
pub struct AutoAdvanceScheduler {
    slot: Arc<Mutex<Slot>>,
    task: Option<JoinHandle<()>>,
}

/// Cancels the action it was returned for, if that action is still pending.
#[derive(Debug)]
pub struct CancelHandle {
    id: u64,
    slot: Arc<Mutex<Slot>>,
    abort: Option<AbortHandle>,
}

impl CancelHandle {
    /// Returns `true` if this call stopped the action from firing.
    pub fn cancel(self) -> bool {
        let mut slot = lock(&self.slot);
        let was_pending = slot.armed == self.id;
        if was_pending {
            slot.armed = 0;
        }
        drop(slot);
        if let Some(abort) = self.abort {
            abort.abort();
        }
        was_pending
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).armed == self.id
    }
}

impl AutoAdvanceScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` after `delay`, superseding any pending action.
    ///
    /// A zero delay runs `action` before returning. A delayed `action` runs on
    /// whichever runtime worker polls the timer, not on the caller's task, and
    /// with the slot lock held. It must only hand its result off (a channel
    /// send such as `watch::Sender::send_replace`) so the owner observes it
    /// on its own task.
    pub fn arm<F>(&mut self, delay: Duration, action: F) -> CancelHandle
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut slot = lock(&self.slot);
        if slot.armed != 0 {
            debug!(superseded = slot.armed, "replacing pending auto-advance");
        }
        slot.issued += 1;
        let id = slot.issued;

        if delay.is_zero() {
            slot.armed = 0;
            action();
            return CancelHandle {
                id,
                slot: Arc::clone(&self.slot),
                abort: None,
            };
        }

        slot.armed = id;
        drop(slot);

        let shared = Arc::clone(&self.slot);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut slot = lock(&shared);
            if slot.armed == id {
                slot.armed = 0;
                action();
            }
        });
        let abort = task.abort_handle();
        self.task = Some(task);
        debug!(id, delay_ms = delay.as_millis(), "auto-advance armed");

        CancelHandle {
            id,
            slot: Arc::clone(&self.slot),
            abort: Some(abort),
        }
    }

    /// Drop the pending action, if any. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        let mut slot = lock(&self.slot);
        let was_pending = slot.armed != 0;
        slot.armed = 0;
        drop(slot);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        was_pending
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).armed != 0
    }
}

impl Drop for AutoAdvanceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, impl Fn(u32) -> Box<dyn FnOnce() + Send>) {
        let hits = Arc::new(AtomicU32::new(0));
        let shared = Arc::clone(&hits);
        let make = move |value: u32| {
            let hits = Arc::clone(&shared);
            Box::new(move || {
                hits.fetch_add(value, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (hits, make)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let handle = scheduler.arm(Duration::from_millis(1500), make(1));

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_pending());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_first_action() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let first = scheduler.arm(Duration::from_millis(1500), make(1));
        let _second = scheduler.arm(Duration::from_millis(3000), make(10));
        assert!(!first.is_pending());

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_cancels_before_firing() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let handle = scheduler.arm(Duration::from_millis(300), make(1));
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_does_not_cancel_newer_action() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let first = scheduler.arm(Duration::from_millis(300), make(1));
        let _second = scheduler.arm(Duration::from_millis(300), make(10));
        assert!(!first.cancel());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_runs_inline_and_supersedes_pending() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let _forward = scheduler.arm(Duration::from_millis(1500), make(1));
        let _back = scheduler.arm(Duration::ZERO, make(100));
        assert_eq!(hits.load(Ordering::SeqCst), 100);
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_cancels() {
        let (hits, make) = counter();
        let mut scheduler = AutoAdvanceScheduler::new();
        let _handle = scheduler.arm(Duration::from_millis(300), make(1));
        drop(scheduler);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delayed_action_hands_off_to_the_owner_task() {
        let (sender, mut pages) = tokio::sync::watch::channel(1_u32);
        let sender = Arc::new(sender);
        let mut scheduler = AutoAdvanceScheduler::new();

        let superseded = Arc::clone(&sender);
        scheduler.arm(Duration::from_millis(20), move || {
            superseded.send_replace(2);
        });
        let latest = Arc::clone(&sender);
        scheduler.arm(Duration::from_millis(40), move || {
            latest.send_replace(3);
        });

        tokio::time::timeout(Duration::from_secs(5), pages.changed())
            .await
            .expect("action fired")
            .unwrap();
        assert_eq!(*pages.borrow_and_update(), 3);
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!pages.has_changed().unwrap());
    }
}
