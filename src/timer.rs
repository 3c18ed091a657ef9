use std::{
    fmt,
    sync::{
        atomic::{AtomicIsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::scheduler::TimerScheduler;

/// Function run by the dispatcher when a timer fires.
///
/// Receives the firing time and the timer's notification sender. It runs on
/// the dispatcher thread with the queue lock held, so it must be short, must
/// not block and must not call back into the scheduler (doing so deadlocks).
pub type Callback = Box<dyn Fn(Instant, &Sender<Instant>) + Send + Sync>;

/// Back-pointer value of a timer that is not in the heap.
pub(crate) const NOT_QUEUED: isize = -1;

/// Default callback: post the firing time without blocking.
///
/// If the notification buffer is still occupied the value is dropped.
pub fn send_time(now: Instant, notify: &Sender<Instant>) {
    if let Err(TrySendError::Full(_)) = notify.try_send(now) {
        log::warn!("timer notification dropped, buffer already full");
    }
}

/// Schedulable state shared between a [`TimerHandle`] and the heap.
pub(crate) struct TimerNode {
    /// Position in the heap array, or [`NOT_QUEUED`].
    ///
    /// Only written while the queue lock is held; the lock orders all
    /// accesses, so relaxed loads and stores are enough.
    index: AtomicIsize,
    callback: Callback,
    notify_tx: Sender<Instant>,
    // Drain side, used by reset to discard a value left from the previous arm.
    notify_rx: Receiver<Instant>,
}

impl TimerNode {
    pub(crate) fn new(callback: Callback) -> (Arc<Self>, Receiver<Instant>) {
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(1);

        let node = Arc::new(Self {
            index: AtomicIsize::new(NOT_QUEUED),
            callback,
            notify_tx,
            notify_rx: notify_rx.clone(),
        });

        (node, notify_rx)
    }

    /// Stored heap position; may be stale, callers must verify the slot.
    pub(crate) fn index(&self) -> Option<usize> {
        usize::try_from(self.index.load(Ordering::Relaxed)).ok()
    }

    pub(crate) fn set_index(&self, index: Option<usize>) {
        let raw = index.map_or(NOT_QUEUED, |i| i as isize);
        self.index.store(raw, Ordering::Relaxed);
    }

    pub(crate) fn fire(&self, now: Instant) {
        (self.callback)(now, &self.notify_tx);
    }

    /// Discard an undelivered notification without blocking.
    pub(crate) fn drain(&self) -> bool {
        self.notify_rx.try_recv().is_ok()
    }
}

impl fmt::Debug for TimerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerNode")
            .field("index", &self.index.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle to a timer armed on a [`TimerScheduler`].
///
/// Cloning the handle does not clone the timer; all clones control the same
/// timer. Dropping every handle does not stop a pending timer.
#[derive(Clone)]
pub struct TimerHandle {
    pub(crate) node: Arc<TimerNode>,
    pub(crate) scheduler: TimerScheduler,
    notify: Receiver<Instant>,
}

impl TimerHandle {
    pub(crate) fn new(
        node: Arc<TimerNode>,
        scheduler: TimerScheduler,
        notify: Receiver<Instant>,
    ) -> Self {
        Self {
            node,
            scheduler,
            notify,
        }
    }

    /// Remove the timer from the queue.
    ///
    /// Returns `false` if the timer had already fired, was already stopped or
    /// was never armed.
    pub fn stop(&self) -> bool {
        self.scheduler.stop(self)
    }

    /// Rearm the timer to fire after `delay`.
    ///
    /// Any undelivered notification from the previous arm is discarded before
    /// this returns. Returns whether the timer was pending before the call.
    pub fn reset(&self, delay: Duration) -> bool {
        self.scheduler.reset(self, delay)
    }

    /// Whether the timer is currently queued.
    pub fn is_active(&self) -> bool {
        self.scheduler.deadline_of(self).is_some()
    }

    /// Deadline of the current arm, if the timer is queued.
    pub fn deadline(&self) -> Option<Instant> {
        self.scheduler.deadline_of(self)
    }

    /// Receiving side of the timer's capacity-1 notification buffer.
    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.notify
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}
