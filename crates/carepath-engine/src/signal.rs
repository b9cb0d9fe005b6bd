use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::debug;

use carepath_core::types::Signal;

/// One pending-flag slot per signal kind plus a shared wakeup.
///
/// Raising the same signal twice before a poll coalesces into a single
/// delivery, and polls drain in fixed priority order (reset, previous,
/// detail, next) regardless of arrival order. Waiters park on a
/// notification instead of sleeping and re-checking.
pub struct SignalSlots {
    reset: AtomicBool,
    previous: AtomicBool,
    detail: AtomicBool,
    next: AtomicBool,
    notify: Notify,
}

impl SignalSlots {
    pub fn new() -> Self {
        Self {
            reset: AtomicBool::new(false),
            previous: AtomicBool::new(false),
            detail: AtomicBool::new(false),
            next: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Mark a signal pending and wake any waiter.
    pub fn raise(&self, signal: Signal) {
        let slot = match signal {
            Signal::ResetToStart => &self.reset,
            Signal::BackPrevious => &self.previous,
            Signal::GoDetail => &self.detail,
            Signal::GoNext => &self.next,
        };
        slot.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Take the highest-priority pending signal, if any.
    ///
    /// A pending detail signal on a node without children is dropped here:
    /// it can never be honored and would otherwise shadow later polls.
    fn take(&self, allow_detail: bool) -> Option<Signal> {
        if self.reset.swap(false, Ordering::SeqCst) {
            return Some(Signal::ResetToStart);
        }
        if self.previous.swap(false, Ordering::SeqCst) {
            return Some(Signal::BackPrevious);
        }
        if self.detail.swap(false, Ordering::SeqCst) {
            if allow_detail {
                return Some(Signal::GoDetail);
            }
            debug!("Discarding detail signal on a node without children");
        }
        if self.next.swap(false, Ordering::SeqCst) {
            return Some(Signal::GoNext);
        }
        None
    }

    /// Block until a signal is pending, then take it by priority.
    pub async fn wait(&self, allow_detail: bool) -> Signal {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flags so a raise that
            // lands between the check and the await still wakes us.
            notified.as_mut().enable();
            if let Some(signal) = self.take(allow_detail) {
                return signal;
            }
            notified.await;
        }
    }
}

impl Default for SignalSlots {
    fn default() -> Self {
        Self::new()
    }
}
